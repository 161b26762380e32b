// 上传任务定义
//
// 状态机：idle → initializing → transmitting → finalizing → {completed | failed | cancelled}
// 终态吸收：进入终态后任何 mark_* 都不再生效

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadTaskStatus {
    /// 空闲（未开始）
    Idle,
    /// 初始化中（创建会话）
    Initializing,
    /// 分片传输中
    Transmitting,
    /// 合并中
    Finalizing,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 已取消
    Cancelled,
}

impl UploadTaskStatus {
    /// 是否终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadTaskStatus::Completed | UploadTaskStatus::Failed | UploadTaskStatus::Cancelled
        )
    }

    /// 是否处于可取消的活跃阶段
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            UploadTaskStatus::Initializing
                | UploadTaskStatus::Transmitting
                | UploadTaskStatus::Finalizing
        )
    }
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    /// 任务ID
    pub id: String,
    /// 本地文件路径
    pub file_path: PathBuf,
    /// 文件名（展示与服务端登记用）
    pub file_name: String,
    /// MIME 类型
    pub mime_type: String,
    /// 文件大小
    pub file_size: u64,
    /// 分片大小
    pub chunk_size: u64,
    /// 总分片数
    #[serde(default)]
    pub total_chunks: usize,
    /// 已完成分片数
    #[serde(default)]
    pub completed_chunks: usize,
    /// 已上传大小
    pub uploaded_size: u64,
    /// 服务端会话ID（初始化后可用，断点续传凭据）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// 任务状态
    pub status: UploadTaskStatus,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
    /// 错误信息
    pub error: Option<String>,
}

impl UploadTask {
    /// 创建新的上传任务
    ///
    /// 文件大小与分片方案在初始化阶段读取文件元数据后填入
    pub fn new(file_path: PathBuf, file_name: String, mime_type: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_path,
            file_name,
            mime_type,
            file_size: 0,
            chunk_size: 0,
            total_chunks: 0,
            completed_chunks: 0,
            uploaded_size: 0,
            session_id: None,
            status: UploadTaskStatus::Idle,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// 填入分片方案
    pub fn set_plan(&mut self, file_size: u64, chunk_size: u64, total_chunks: usize) {
        self.file_size = file_size;
        self.chunk_size = chunk_size;
        self.total_chunks = total_chunks;
    }

    /// 计算进度百分比
    pub fn progress(&self) -> f64 {
        if self.file_size == 0 {
            return 0.0;
        }
        (self.uploaded_size as f64 / self.file_size as f64) * 100.0
    }

    /// 标记为初始化中
    pub fn mark_initializing(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UploadTaskStatus::Initializing;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 标记为传输中
    pub fn mark_transmitting(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UploadTaskStatus::Transmitting;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 标记为合并中
    pub fn mark_finalizing(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UploadTaskStatus::Finalizing;
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UploadTaskStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.uploaded_size = self.file_size;
        self.completed_chunks = self.total_chunks;
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UploadTaskStatus::Failed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.error = Some(error);
    }

    /// 标记为已取消
    ///
    /// 重复调用是无害的空操作
    pub fn mark_cancelled(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = UploadTaskStatus::Cancelled;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }
}

/// 上传进度快照
///
/// 每次分片确认后重算的只读模型，仅供展示，不参与控制决策
#[derive(Debug, Clone, Serialize)]
pub struct UploadProgress {
    /// 已上传字节数
    pub uploaded_bytes: u64,
    /// 总字节数
    pub total_bytes: u64,
    /// 进度百分比
    pub percentage: f64,
    /// 已完成分片数
    pub completed_chunks: usize,
    /// 总分片数
    pub total_chunks: usize,
    /// 吞吐量 (bytes/s)
    pub throughput_bps: f64,
    /// 预计剩余秒数（吞吐量为 0 时为 0）
    pub eta_seconds: f64,
}

impl UploadProgress {
    /// 根据当前计数与已消耗时间计算进度
    ///
    /// # 参数
    /// * `uploaded_bytes` - 已上传字节数（续传时含已在服务端的字节）
    /// * `total_bytes` - 文件总大小
    /// * `completed_chunks` - 已完成分片数
    /// * `total_chunks` - 总分片数
    /// * `elapsed_secs` - 自传输开始的秒数
    pub fn compute(
        uploaded_bytes: u64,
        total_bytes: u64,
        completed_chunks: usize,
        total_chunks: usize,
        elapsed_secs: f64,
    ) -> Self {
        let percentage = if total_bytes == 0 {
            100.0
        } else {
            (uploaded_bytes as f64 / total_bytes as f64) * 100.0
        };

        let throughput_bps = if elapsed_secs > 0.0 {
            uploaded_bytes as f64 / elapsed_secs
        } else {
            0.0
        };

        let remaining = total_bytes.saturating_sub(uploaded_bytes);
        let eta_seconds = if throughput_bps > 0.0 {
            remaining as f64 / throughput_bps
        } else {
            0.0
        };

        Self {
            uploaded_bytes,
            total_bytes,
            percentage,
            completed_chunks,
            total_chunks,
            throughput_bps,
            eta_seconds,
        }
    }
}
