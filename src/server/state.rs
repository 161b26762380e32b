// 应用状态

use crate::config::AppConfig;
use crate::session::{Finalizer, UploadSessionStore};
use anyhow::{Context, Result};
use std::sync::Arc;

/// 应用全局状态
///
/// 组合根：会话注册表与合并器在这里创建一次，所有处理器共享同一实例
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Arc<AppConfig>,
    /// 上传会话注册表
    pub sessions: Arc<UploadSessionStore>,
    /// 分片合并器
    pub finalizer: Arc<Finalizer>,
}

impl AppState {
    /// 创建新的应用状态并准备存储目录
    pub async fn new(config: AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.storage.staging_dir)
            .await
            .with_context(|| format!("创建暂存目录失败: {:?}", config.storage.staging_dir))?;
        tokio::fs::create_dir_all(&config.storage.output_dir)
            .await
            .with_context(|| format!("创建输出目录失败: {:?}", config.storage.output_dir))?;

        let sessions = Arc::new(UploadSessionStore::new(
            &config.storage.staging_dir,
            config.upload.chunk_size_bytes(),
            config.upload.max_file_size_bytes(),
        ));
        let finalizer = Arc::new(Finalizer::new(&config.storage.output_dir));

        Ok(Self {
            config: Arc::new(config),
            sessions,
            finalizer,
        })
    }
}
