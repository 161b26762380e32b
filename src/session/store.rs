// 会话注册表
//
// DashMap 注册表，每个会话持有独占暂存目录。
// 分片登记顺序：先校验（validate_chunk）、落盘成功后再标记（record_index），
// 避免位图领先于磁盘内容。

use crate::session::types::{SessionEntry, SessionError, SessionMeta, SessionStatus};
use crate::uploader::chunk::chunk_count;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 上传会话注册表
pub struct UploadSessionStore {
    /// 活动会话（并发安全）
    sessions: DashMap<String, Arc<SessionEntry>>,
    /// 暂存根目录，每个会话一个子目录
    staging_root: PathBuf,
    /// 服务端统一分片大小（字节）
    chunk_size: u64,
    /// 单文件大小上限（字节）
    ///
    /// 接收位图容量按声明的分片总数分配，上限同时约束住位图规模
    max_file_size: u64,
}

impl UploadSessionStore {
    pub fn new(staging_root: impl Into<PathBuf>, chunk_size: u64, max_file_size: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            staging_root: staging_root.into(),
            chunk_size,
            max_file_size,
        }
    }

    /// 初始化新会话
    ///
    /// 分配 uuid 会话ID并创建独占暂存目录。
    /// 声明的文件大小先过单文件上限，再与声明的分片总数交叉校验，
    /// 任何一步不过直接拒绝，不分配任何会话资源。
    ///
    /// # 参数
    /// * `file_name` - 原始文件名（仅保留基础名部分）
    /// * `file_size` - 文件总大小
    /// * `file_type` - MIME 类型
    /// * `declared_chunks` - 客户端声明的分片总数
    pub async fn initialize(
        &self,
        file_name: &str,
        file_size: u64,
        file_type: &str,
        declared_chunks: usize,
    ) -> Result<Arc<SessionEntry>, SessionError> {
        let file_name = sanitize_file_name(file_name)?;

        if file_size > self.max_file_size {
            warn!(
                "会话初始化被拒绝: file={}, 声明大小 {} bytes 超出上限 {} bytes",
                file_name, file_size, self.max_file_size
            );
            return Err(SessionError::FileTooLarge {
                size: file_size,
                max: self.max_file_size,
            });
        }

        let expected = chunk_count(file_size, self.chunk_size);
        if declared_chunks != expected {
            warn!(
                "会话初始化被拒绝: file={}, 声明分片 {} 与推算分片 {} 不一致",
                file_name, declared_chunks, expected
            );
            return Err(SessionError::ChunkCountMismatch {
                expected,
                declared: declared_chunks,
            });
        }

        let session_id = Uuid::new_v4().to_string();
        let staging_dir = self.staging_root.join(&session_id);
        tokio::fs::create_dir_all(&staging_dir).await?;

        let meta = SessionMeta {
            session_id: session_id.clone(),
            file_name: file_name.clone(),
            file_size,
            file_type: file_type.to_string(),
            total_chunks: declared_chunks,
            chunk_size: self.chunk_size,
            staging_dir,
            created_at: chrono::Utc::now().timestamp(),
        };
        let entry = Arc::new(SessionEntry::new(meta));
        self.sessions.insert(session_id.clone(), entry.clone());

        info!(
            "📋 会话已创建: id={}, file={}, size={} bytes, chunks={}",
            session_id, file_name, file_size, declared_chunks
        );
        Ok(entry)
    }

    /// 取会话
    pub fn get(&self, session_id: &str) -> Result<Arc<SessionEntry>, SessionError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or(SessionError::NotFound)
    }

    /// 校验一次分片提交（会话存在、声明总数一致、索引在界内）
    ///
    /// 校验通过返回会话；调用方落盘成功后再 `record_index` 标记
    pub fn validate_chunk(
        &self,
        session_id: &str,
        chunk_index: usize,
        declared_total: usize,
    ) -> Result<Arc<SessionEntry>, SessionError> {
        let entry = self.get(session_id)?;
        let total = entry.meta.total_chunks;

        if declared_total != total {
            return Err(SessionError::ChunkCountMismatch {
                expected: total,
                declared: declared_total,
            });
        }
        if chunk_index >= total {
            return Err(SessionError::InvalidChunkIndex {
                index: chunk_index,
                total,
            });
        }
        Ok(entry)
    }

    /// 会话状态快照
    pub fn status(&self, session_id: &str) -> Result<SessionStatus, SessionError> {
        Ok(self.get(session_id)?.status_snapshot())
    }

    /// 取消会话：移除注册并清理暂存目录
    ///
    /// 幂等：重复取消、取消不存在的会话都视为成功。
    /// 返回本次是否真正移除了一个活动会话。
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.remove(session_id) {
            Some(entry) => {
                if let Err(e) = tokio::fs::remove_dir_all(&entry.meta.staging_dir).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("清理暂存目录失败: {:?}: {}", entry.meta.staging_dir, e);
                    }
                }
                info!("会话已取消: id={}", session_id);
                true
            }
            None => {
                debug!("取消的会话不存在或已清理: id={}", session_id);
                false
            }
        }
    }

    /// 从注册表移除会话（不触碰磁盘）
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.remove(session_id).map(|(_, entry)| entry)
    }

    /// 活动会话数
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// 最近活跃时间早于 cutoff 的会话ID列表
    pub fn expired_sessions(&self, cutoff: i64) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().last_activity() < cutoff)
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

/// 净化文件名：只保留基础名，拒绝空名与纯路径成分
fn sanitize_file_name(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SessionError::InvalidFileName);
    }
    let name = Path::new(trimmed)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(SessionError::InvalidFileName)?;
    if name.contains('\\') || name.contains('\0') {
        return Err(SessionError::InvalidFileName);
    }
    Ok(name.to_string())
}
