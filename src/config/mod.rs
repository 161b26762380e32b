// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,
    /// 会话回收配置
    #[serde(default)]
    pub session: SessionConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upload: UploadConfig::default(),
            storage: StorageConfig::default(),
            session: SessionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7230
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 上传配置
///
/// 客户端与服务端共用同一分片大小，状态接口也会回报它，
/// 续传方案因此永远和会话创建时一致
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小 (MB)
    #[serde(default = "default_chunk_size_mb")]
    pub chunk_size_mb: u64,
    /// 单文件大小上限 (MB)，超额的初始化声明直接拒绝
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    /// 窗口并发数
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// 单分片最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_chunk_size_mb() -> u64 {
    1
}

fn default_max_file_size_mb() -> u64 {
    // 4GB，对标普通网盘账号的单文件上限
    4096
}

fn default_max_parallel() -> usize {
    3
}

fn default_max_retries() -> u32 {
    3
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: default_chunk_size_mb(),
            max_file_size_mb: default_max_file_size_mb(),
            max_parallel: default_max_parallel(),
            max_retries: default_max_retries(),
        }
    }
}

impl UploadConfig {
    /// 分片大小（字节）
    pub fn chunk_size_bytes(&self) -> u64 {
        self.chunk_size_mb * 1024 * 1024
    }

    /// 单文件大小上限（字节）
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 分片暂存根目录
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    /// 最终产物输出目录
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data/staging")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            output_dir: default_output_dir(),
        }
    }
}

/// 会话回收配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// 滞留会话保留时长（小时）
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    /// 清扫间隔（秒）
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
}

fn default_retention_hours() -> u32 {
    24
}

fn default_reap_interval_secs() -> u64 {
    3600
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retention_hours: default_retention_hours(),
            reap_interval_secs: default_reap_interval_secs(),
        }
    }
}

impl SessionConfig {
    /// 保留时长（秒）
    pub fn retention_secs(&self) -> i64 {
        self.retention_hours as i64 * 3600
    }

    /// 清扫间隔
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 校验配置的基本约束
    pub fn validate(&self) -> Result<()> {
        if self.upload.chunk_size_mb == 0 {
            anyhow::bail!("upload.chunk_size_mb 必须大于 0");
        }
        if self.upload.max_parallel == 0 {
            anyhow::bail!("upload.max_parallel 必须大于 0");
        }
        if self.upload.max_file_size_mb == 0 {
            anyhow::bail!("upload.max_file_size_mb 必须大于 0");
        }
        if self.storage.staging_dir == self.storage.output_dir {
            anyhow::bail!("storage.staging_dir 与 storage.output_dir 不能相同");
        }
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("读取配置文件失败")?;

        let config: AppConfig = toml::from_str(&content).context("解析配置文件失败")?;
        config.validate().context("配置文件校验失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("序列化配置失败")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent)
                .await
                .context("创建配置父目录失败")?;
        }

        fs::write(path, content)
            .await
            .context("写入配置文件失败")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {}", e);
                let default_config = Self::default();

                // 首次启动：写出默认配置，方便用户修改
                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7230);
        assert_eq!(config.upload.chunk_size_mb, 1);
        assert_eq!(config.upload.chunk_size_bytes(), 1024 * 1024);
        assert_eq!(config.upload.max_file_size_mb, 4096);
        assert_eq!(config.upload.max_file_size_bytes(), 4096 * 1024 * 1024);
        assert_eq!(config.upload.max_parallel, 3);
        assert_eq!(config.upload.max_retries, 3);
        assert_eq!(config.storage.staging_dir, PathBuf::from("data/staging"));
        assert_eq!(config.storage.output_dir, PathBuf::from("data/uploads"));
        assert_eq!(config.session.retention_hours, 24);
        assert_eq!(config.session.retention_secs(), 24 * 3600);
        assert_eq!(config.session.reap_interval_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.toml");
        let path_str = path.to_str().unwrap();

        let mut config = AppConfig::default();
        config.server.port = 9000;
        config.upload.chunk_size_mb = 4;
        config.save_to_file(path_str).await.unwrap();

        let loaded = AppConfig::load_from_file(path_str).await.unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.upload.chunk_size_bytes(), 4 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_partial_toml_uses_section_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.toml");
        tokio::fs::write(&path, "[server]\nport = 8080\n").await.unwrap();

        let loaded = AppConfig::load_from_file(path.to_str().unwrap()).await.unwrap();
        assert_eq!(loaded.server.port, 8080);
        // 未出现的节与字段全部落默认值
        assert_eq!(loaded.server.host, "127.0.0.1");
        assert_eq!(loaded.upload.max_parallel, 3);
        assert_eq!(loaded.session.retention_hours, 24);
    }

    #[tokio::test]
    async fn test_invalid_chunk_size_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.toml");
        tokio::fs::write(&path, "[upload]\nchunk_size_mb = 0\n")
            .await
            .unwrap();

        assert!(AppConfig::load_from_file(path.to_str().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_load_or_default_writes_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config").join("app.toml");
        let path_str = path.to_str().unwrap();

        let config = AppConfig::load_or_default(path_str).await;
        assert_eq!(config.server.port, 7230);
        // 首次启动已写出默认配置
        assert!(path.is_file());
    }
}
