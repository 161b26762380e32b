// 上传客户端模块
//
// 分层结构：
// - chunk: 分片方案计算与本地记账
// - transport: 传输层抽象（HTTP 实现 + 测试替身）
// - transmitter: 单分片发送（指数退避重试 + 取消协作）
// - task: 任务状态机与进度计算
// - coordinator: 流程编排（窗口并发、断点续传、取消收尾）

pub mod chunk;
pub mod coordinator;
pub mod task;
pub mod transmitter;
pub mod transport;

pub use chunk::{
    calculate_chunks, chunk_count, UploadChunk, UploadChunkManager, DEFAULT_UPLOAD_CHUNK_SIZE,
};
pub use coordinator::{
    ProgressCallback, UploadCoordinator, UploadError, UploadOptions, DEFAULT_MAX_PARALLEL,
};
pub use task::{UploadProgress, UploadTask, UploadTaskStatus};
pub use transmitter::{
    calculate_backoff_delay, ChunkTransmitter, Sleeper, TokioSleeper, TransmitError,
    DEFAULT_MAX_RETRIES, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS,
};
pub use transport::{HttpUploadTransport, UploadTransport};
