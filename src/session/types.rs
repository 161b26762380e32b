// 会话数据类型
//
// SessionEntry 的接收集由内部互斥锁保护，可在多个接收请求间共享

use bit_set::BitSet;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// 会话操作错误
///
/// 错误消息原样进入 HTTP 响应体
#[derive(Debug, Error)]
pub enum SessionError {
    /// 会话不存在（未知ID、已取消或已被回收）
    #[error("session not found")]
    NotFound,

    /// 文件名为空或含非法路径成分
    #[error("invalid file name")]
    InvalidFileName,

    /// 声明的文件大小超出服务端单文件上限
    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    /// 声明的分片总数与按文件大小推算的方案不一致
    #[error("chunk count mismatch: expected {expected}, got {declared}")]
    ChunkCountMismatch { expected: usize, declared: usize },

    /// 分片索引越界
    #[error("invalid chunk index {index} (total {total})")]
    InvalidChunkIndex { index: usize, total: usize },

    /// 合并时仍有分片缺失
    #[error("missing chunks: {0:?}")]
    MissingChunks(Vec<usize>),

    /// 存储层IO失败
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// 会话元信息（初始化后不变）
#[derive(Debug, Clone)]
pub struct SessionMeta {
    /// 会话ID（uuid v4）
    pub session_id: String,
    /// 净化后的原始文件名
    pub file_name: String,
    /// 文件总大小（字节）
    pub file_size: u64,
    /// MIME 类型
    pub file_type: String,
    /// 分片总数
    pub total_chunks: usize,
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 本会话独占的暂存目录
    pub staging_dir: PathBuf,
    /// 创建时间（Unix 秒）
    pub created_at: i64,
}

/// 会话状态快照
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub uploaded_chunks: Vec<usize>,
    pub total_chunks: usize,
    pub progress: f64,
    pub file_name: String,
    pub chunk_size: u64,
}

/// 合并产物描述
#[derive(Debug, Clone)]
pub struct FinalizedArtifact {
    pub file_path: String,
    pub file_name: String,
}

/// 活动会话
///
/// 接收集（位图）与活跃时间都可被并发更新
#[derive(Debug)]
pub struct SessionEntry {
    pub meta: SessionMeta,
    received: Mutex<BitSet>,
    last_activity: AtomicI64,
}

impl SessionEntry {
    pub fn new(meta: SessionMeta) -> Self {
        let capacity = meta.total_chunks.max(1);
        Self {
            meta,
            received: Mutex::new(BitSet::with_capacity(capacity)),
            last_activity: AtomicI64::new(chrono::Utc::now().timestamp()),
        }
    }

    /// 标记一个分片已接收并刷新活跃时间
    ///
    /// 重复标记幂等
    pub fn record_index(&self, index: usize) {
        self.received.lock().insert(index);
        self.touch();
    }

    /// 已接收的分片索引（升序）
    pub fn received_indices(&self) -> Vec<usize> {
        self.received.lock().iter().collect()
    }

    /// 已接收分片数
    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }

    /// 尚未接收的分片索引（升序）
    pub fn missing_indices(&self) -> Vec<usize> {
        let received = self.received.lock();
        (0..self.meta.total_chunks)
            .filter(|i| !received.contains(*i))
            .collect()
    }

    /// 是否已收齐全部分片（零分片会话视为收齐）
    pub fn is_complete(&self) -> bool {
        self.received_count() >= self.meta.total_chunks
    }

    /// 接收进度百分比
    pub fn progress(&self) -> f64 {
        if self.meta.total_chunks == 0 {
            return 100.0;
        }
        self.received_count() as f64 / self.meta.total_chunks as f64 * 100.0
    }

    /// 刷新活跃时间
    pub fn touch(&self) {
        self.last_activity
            .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
    }

    /// 最近活跃时间（Unix 秒）
    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    pub fn status_snapshot(&self) -> SessionStatus {
        SessionStatus {
            uploaded_chunks: self.received_indices(),
            total_chunks: self.meta.total_chunks,
            progress: self.progress(),
            file_name: self.meta.file_name.clone(),
            chunk_size: self.meta.chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn meta_with_chunks(total_chunks: usize) -> SessionMeta {
        SessionMeta {
            session_id: "test-session".to_string(),
            file_name: "book.epub".to_string(),
            file_size: total_chunks as u64 * 1024,
            file_type: "application/epub+zip".to_string(),
            total_chunks,
            chunk_size: 1024,
            staging_dir: PathBuf::from("/tmp/staging/test-session"),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    #[test]
    fn test_record_and_missing_indices() {
        let entry = SessionEntry::new(meta_with_chunks(5));
        assert_eq!(entry.received_count(), 0);
        assert_eq!(entry.missing_indices(), vec![0, 1, 2, 3, 4]);

        entry.record_index(1);
        entry.record_index(3);
        assert_eq!(entry.received_indices(), vec![1, 3]);
        assert_eq!(entry.missing_indices(), vec![0, 2, 4]);
        assert!(!entry.is_complete());
    }

    #[test]
    fn test_duplicate_record_is_idempotent() {
        let entry = SessionEntry::new(meta_with_chunks(3));
        entry.record_index(2);
        entry.record_index(2);
        entry.record_index(2);

        assert_eq!(entry.received_count(), 1);
        assert_eq!(entry.received_indices(), vec![2]);
    }

    #[test]
    fn test_zero_chunk_session_is_complete() {
        let entry = SessionEntry::new(meta_with_chunks(0));
        assert!(entry.is_complete());
        assert_eq!(entry.progress(), 100.0);
        assert!(entry.missing_indices().is_empty());
    }

    #[test]
    fn test_progress_percentage() {
        let entry = SessionEntry::new(meta_with_chunks(4));
        entry.record_index(0);
        assert_eq!(entry.progress(), 25.0);
        entry.record_index(1);
        entry.record_index(2);
        entry.record_index(3);
        assert_eq!(entry.progress(), 100.0);
        assert!(entry.is_complete());
    }

    #[test]
    fn test_concurrent_records_never_lose_an_index() {
        let total = 64;
        let entry = Arc::new(SessionEntry::new(meta_with_chunks(total)));

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let entry = entry.clone();
                std::thread::spawn(move || {
                    for index in (worker..total).step_by(8) {
                        entry.record_index(index);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(entry.received_count(), total);
        assert!(entry.is_complete());
        assert!(entry.missing_indices().is_empty());
    }

    #[test]
    fn test_touch_advances_last_activity() {
        let entry = SessionEntry::new(meta_with_chunks(1));
        let before = entry.last_activity();
        // 人为回拨后 touch 应恢复到当前时间
        entry.last_activity.store(before - 3600, Ordering::SeqCst);
        entry.touch();
        assert!(entry.last_activity() >= before);
    }

    #[test]
    fn test_entry_renders_via_debug() {
        // 断言辅助（unwrap_err 等）依赖 Debug 输出
        let entry = SessionEntry::new(meta_with_chunks(2));
        entry.record_index(1);

        let rendered = format!("{:?}", entry);
        assert!(rendered.contains("test-session"));
        assert!(rendered.contains("book.epub"));
    }

    #[test]
    fn test_status_snapshot_fields() {
        let entry = SessionEntry::new(meta_with_chunks(2));
        entry.record_index(0);

        let status = entry.status_snapshot();
        assert_eq!(status.uploaded_chunks, vec![0]);
        assert_eq!(status.total_chunks, 2);
        assert_eq!(status.progress, 50.0);
        assert_eq!(status.file_name, "book.epub");
        assert_eq!(status.chunk_size, 1024);
    }
}
