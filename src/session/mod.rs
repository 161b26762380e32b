// 服务端会话模块
//
// 分层结构：
// - types: 会话元数据、接收位图、错误类型
// - store: 会话注册表（DashMap + 独占暂存目录）
// - persister: 分片落盘
// - finalizer: 分片合并与清理
// - reaper: 滞留会话周期回收

pub mod finalizer;
pub mod persister;
pub mod reaper;
pub mod store;
pub mod types;

pub use finalizer::Finalizer;
pub use reaper::{SessionReaper, DEFAULT_RETENTION_SECS, DEFAULT_SWEEP_INTERVAL};
pub use store::UploadSessionStore;
pub use types::{FinalizedArtifact, SessionEntry, SessionError, SessionMeta, SessionStatus};
