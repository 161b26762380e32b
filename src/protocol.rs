// 上传协议数据类型
//
// 客户端传输层与服务端处理器共用的线上契约，字段统一为 camelCase

use serde::{Deserialize, Serialize};

/// 初始化上传请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    /// 原始文件名
    pub file_name: String,

    /// 文件总大小（字节）
    pub file_size: u64,

    /// MIME 类型
    pub file_type: String,

    /// 客户端本地计算的分片总数（服务端交叉校验）
    pub total_chunks: usize,
}

/// 初始化上传响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    /// 会话ID（后续所有请求的凭据）
    pub session_id: String,
}

/// 分片上传响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    /// 是否成功
    pub success: bool,
}

/// 会话状态响应
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStatusResponse {
    /// 已接收的分片索引（升序）
    pub uploaded_chunks: Vec<usize>,

    /// 分片总数
    pub total_chunks: usize,

    /// 接收进度（百分比，按分片数计算）
    pub progress: f64,

    /// 原始文件名
    pub file_name: String,

    /// 会话初始化时固定的分片大小（字节）
    ///
    /// 断点续传的客户端用它重建分片方案，而不是自行假设
    pub chunk_size: u64,
}

/// 合并上传请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadRequest {
    /// 会话ID
    pub session_id: String,
}

/// 合并产物描述
///
/// 交给下游文档摄取方（文本提取）的句柄
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadResponse {
    /// 合并后文件的落盘路径
    pub file_path: String,

    /// 原始文件名
    pub file_name: String,
}

/// 取消上传响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelUploadResponse {
    /// 是否成功（重复取消同样返回 true）
    pub success: bool,
}

/// 错误响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// 人类可读的错误信息
    pub message: String,
}

/// 分片上传 multipart 表单字段名
pub mod fields {
    pub const SESSION_ID: &str = "sessionId";
    pub const CHUNK_INDEX: &str = "chunkIndex";
    pub const TOTAL_CHUNKS: &str = "totalChunks";
    pub const CHUNK: &str = "chunk";
}
