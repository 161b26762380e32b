// Audiobook Upload Rust Library
// 有声书分片上传核心库

// 配置管理模块
pub mod config;

// 日志系统模块
pub mod logging;

// 双端共用的线格式
pub mod protocol;

// Web服务器模块
pub mod server;

// 服务端会话模块
pub mod session;

// 上传客户端模块
pub mod uploader;

// 导出常用类型
pub use config::AppConfig;
pub use server::AppState;
pub use session::{FinalizedArtifact, Finalizer, SessionReaper, UploadSessionStore};
pub use uploader::{
    ChunkTransmitter, HttpUploadTransport, UploadCoordinator, UploadOptions, UploadProgress,
    UploadTask, UploadTaskStatus, UploadTransport,
};
