// 上传协调器
//
// 编排完整上传流程：初始化 → 窗口并发传输 → 合并
//
// 调度策略：
// - 待传分片按 max_parallel 切成窗口，整窗并发、整窗等待，再开下一窗
// - 任一分片终局失败立即中止剩余窗口，整个上传失败
// - 取消协作式：共享取消令牌，收尾时尽力通知服务端释放会话
// - 断点续传：按服务端会话状态播种本地记账，只补传缺失分片

use crate::protocol::{FinalizeUploadResponse, InitUploadRequest};
use crate::uploader::chunk::{chunk_count, UploadChunkManager, DEFAULT_UPLOAD_CHUNK_SIZE};
use crate::uploader::task::{UploadProgress, UploadTask, UploadTaskStatus};
use crate::uploader::transmitter::{
    ChunkTransmitter, Sleeper, TransmitError, DEFAULT_MAX_RETRIES,
};
use crate::uploader::transport::UploadTransport;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 默认窗口并发数
pub const DEFAULT_MAX_PARALLEL: usize = 3;

/// 上传的终局错误
///
/// 无论内部经历多少次分片级重试，调用方只会看到一个终局结果
#[derive(Debug, Error)]
pub enum UploadError {
    /// 上传被取消
    #[error("上传已取消")]
    Cancelled,

    /// 协调器不可重入，重复启动被拒绝
    #[error("上传已启动，不能重复启动")]
    AlreadyStarted,

    /// 某个分片重试耗尽
    #[error("{0}")]
    Transmit(TransmitError),

    /// 本地文件读取失败
    #[error("读取上传文件失败: {0}")]
    Io(#[from] std::io::Error),

    /// 协议层失败（初始化、状态查询、合并等）
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<TransmitError> for UploadError {
    fn from(e: TransmitError) -> Self {
        match e {
            TransmitError::Cancelled => UploadError::Cancelled,
            other => UploadError::Transmit(other),
        }
    }
}

/// 协调器配置
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// 分片大小（字节）
    pub chunk_size: u64,
    /// 窗口并发数
    pub max_parallel: usize,
    /// 单分片最大重试次数
    pub max_retries: u32,
    /// MIME 类型
    pub mime_type: String,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            max_parallel: DEFAULT_MAX_PARALLEL,
            max_retries: DEFAULT_MAX_RETRIES,
            mime_type: "application/octet-stream".to_string(),
        }
    }
}

impl UploadOptions {
    /// 从应用配置构造
    pub fn from_config(config: &crate::config::UploadConfig) -> Self {
        Self {
            chunk_size: config.chunk_size_bytes(),
            max_parallel: config.max_parallel,
            max_retries: config.max_retries,
            mime_type: "application/octet-stream".to_string(),
        }
    }
}

/// 进度回调
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// 上传协调器
pub struct UploadCoordinator {
    /// 任务记录
    task: Arc<RwLock<UploadTask>>,
    /// 分片管理器（初始化阶段按文件大小重建）
    chunk_manager: Arc<RwLock<UploadChunkManager>>,
    /// 传输层
    transport: Arc<dyn UploadTransport>,
    /// 分片发送器
    transmitter: Arc<ChunkTransmitter>,
    /// 取消令牌
    cancel_token: CancellationToken,
    /// 已上传字节数（原子计数，续传时预置）
    uploaded_bytes: Arc<AtomicU64>,
    /// 启动闩锁（协调器不可重入）
    started: AtomicBool,
    /// 传输开始时刻（吞吐量基准）
    transfer_started_at: Arc<RwLock<Option<std::time::Instant>>>,
    /// 配置
    options: UploadOptions,
    /// 进度回调
    progress_callback: Option<ProgressCallback>,
}

impl UploadCoordinator {
    /// 创建协调器
    ///
    /// # 参数
    /// * `file_path` - 本地文件路径
    /// * `transport` - 传输层实现
    /// * `options` - 配置
    pub fn new(
        file_path: impl Into<PathBuf>,
        transport: Arc<dyn UploadTransport>,
        options: UploadOptions,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let transmitter = Arc::new(ChunkTransmitter::new(
            transport.clone(),
            options.max_retries,
            cancel_token.clone(),
        ));
        Self::build(file_path.into(), transport, transmitter, cancel_token, options)
    }

    /// 创建协调器（注入退避睡眠实现，测试用）
    pub fn with_sleeper(
        file_path: impl Into<PathBuf>,
        transport: Arc<dyn UploadTransport>,
        options: UploadOptions,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let transmitter = Arc::new(ChunkTransmitter::with_sleeper(
            transport.clone(),
            options.max_retries,
            cancel_token.clone(),
            sleeper,
        ));
        Self::build(file_path.into(), transport, transmitter, cancel_token, options)
    }

    fn build(
        file_path: PathBuf,
        transport: Arc<dyn UploadTransport>,
        transmitter: Arc<ChunkTransmitter>,
        cancel_token: CancellationToken,
        options: UploadOptions,
    ) -> Self {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        let task = UploadTask::new(file_path, file_name, options.mime_type.clone());

        Self {
            task: Arc::new(RwLock::new(task)),
            chunk_manager: Arc::new(RwLock::new(UploadChunkManager::new(0, options.chunk_size))),
            transport,
            transmitter,
            cancel_token,
            uploaded_bytes: Arc::new(AtomicU64::new(0)),
            started: AtomicBool::new(false),
            transfer_started_at: Arc::new(RwLock::new(None)),
            options,
            progress_callback: None,
        }
    }

    /// 注册进度回调（每次分片确认后调用）
    pub fn on_progress(mut self, callback: impl Fn(UploadProgress) + Send + Sync + 'static) -> Self {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// 执行完整上传
    ///
    /// # 上传流程
    /// 1. 读取文件元数据，本地计算分片方案
    /// 2. 初始化会话（分片总数交由服务端交叉校验）
    /// 3. 窗口并发传输所有分片（空文件跳过本步）
    /// 4. 合并分片，返回产物描述
    pub async fn upload(&self) -> Result<FinalizeUploadResponse, UploadError> {
        self.ensure_started()?;
        match self.run_upload().await {
            Ok(artifact) => Ok(artifact),
            Err(e) => Err(self.settle_failure(e).await),
        }
    }

    /// 断点续传
    ///
    /// 根据服务端会话状态重建分片方案，只补传缺失分片后合并。
    /// 会话已被回收或未知时，以"session not found"失败。
    pub async fn resume(&self, session_id: &str) -> Result<FinalizeUploadResponse, UploadError> {
        self.ensure_started()?;
        match self.run_resume(session_id).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => Err(self.settle_failure(e).await),
        }
    }

    /// 取消上传
    ///
    /// 幂等：重复调用与已终态下调用都是无害空操作。
    /// 运行中的上传会尽快观察到令牌，丢弃在途请求并转入 cancelled。
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// 当前任务状态
    pub async fn status(&self) -> UploadTaskStatus {
        self.task.read().await.status
    }

    /// 任务快照
    pub async fn task_snapshot(&self) -> UploadTask {
        self.task.read().await.clone()
    }

    /// 服务端会话ID（初始化后可用）
    pub async fn session_id(&self) -> Option<String> {
        self.task.read().await.session_id.clone()
    }

    /// 当前进度快照
    pub async fn progress(&self) -> UploadProgress {
        let elapsed = self
            .transfer_started_at
            .read()
            .await
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let (total_bytes, completed, total_chunks) = {
            let cm = self.chunk_manager.read().await;
            (cm.total_size(), cm.completed_count(), cm.chunk_count())
        };
        UploadProgress::compute(
            self.uploaded_bytes.load(Ordering::SeqCst),
            total_bytes,
            completed,
            total_chunks,
            elapsed,
        )
    }

    // =====================================================
    // 内部流程
    // =====================================================

    fn ensure_started(&self) -> Result<(), UploadError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(UploadError::AlreadyStarted);
        }
        Ok(())
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }

    /// 失败收尾：归一取消语义，落任务终态，尽力通知服务端
    async fn settle_failure(&self, error: UploadError) -> UploadError {
        let error = if self.cancel_token.is_cancelled() {
            UploadError::Cancelled
        } else {
            error
        };

        match &error {
            UploadError::Cancelled => {
                // 尽力释放服务端会话，失败不影响取消结果
                if let Some(session_id) = self.session_id().await {
                    if let Err(e) = self.transport.cancel(&session_id).await {
                        debug!("取消通知服务端失败（忽略）: {}", e);
                    }
                }
                self.task.write().await.mark_cancelled();
                info!("上传已取消");
            }
            other => {
                self.task.write().await.mark_failed(other.to_string());
                error!("上传失败: {}", other);
            }
        }

        error
    }

    async fn run_upload(&self) -> Result<FinalizeUploadResponse, UploadError> {
        self.task.write().await.mark_initializing();
        self.check_cancelled()?;

        // 1. 本地计算分片方案
        let file_path = { self.task.read().await.file_path.clone() };
        let metadata = tokio::fs::metadata(&file_path).await?;
        let file_size = metadata.len();
        let total_chunks = chunk_count(file_size, self.options.chunk_size);

        {
            let mut cm = self.chunk_manager.write().await;
            *cm = UploadChunkManager::new(file_size, self.options.chunk_size);
        }

        let file_name = {
            let mut task = self.task.write().await;
            task.set_plan(file_size, self.options.chunk_size, total_chunks);
            task.file_name.clone()
        };

        info!(
            "开始上传: file={:?}, size={} bytes, chunks={}",
            file_path, file_size, total_chunks
        );

        // 2. 初始化会话（在途请求参与取消竞争）
        let init_request = InitUploadRequest {
            file_name,
            file_size,
            file_type: self.options.mime_type.clone(),
            total_chunks,
        };
        let session_id = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => {
                return Err(UploadError::Cancelled);
            }
            result = self.transport.init_session(&init_request) => result?,
        };
        self.task.write().await.session_id = Some(session_id.clone());

        // 3. 窗口并发传输（空文件没有分片，直接合并）
        {
            let mut task = self.task.write().await;
            task.mark_transmitting();
        }
        *self.transfer_started_at.write().await = Some(std::time::Instant::now());

        self.transmit_pending(&session_id).await?;

        // 4. 合并
        self.finish(&session_id).await
    }

    async fn run_resume(&self, session_id: &str) -> Result<FinalizeUploadResponse, UploadError> {
        self.task.write().await.mark_initializing();
        self.check_cancelled()?;

        // 1. 取回会话状态，分片大小以会话记录为准
        let status = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => {
                return Err(UploadError::Cancelled);
            }
            result = self.transport.fetch_status(session_id) => result?,
        };

        let file_path = { self.task.read().await.file_path.clone() };
        let metadata = tokio::fs::metadata(&file_path).await?;
        let file_size = metadata.len();

        let local_chunks = chunk_count(file_size, status.chunk_size);
        if local_chunks != status.total_chunks {
            return Err(UploadError::Other(anyhow::anyhow!(
                "本地文件与会话不匹配: 本地 {} 个分片, 会话记录 {} 个",
                local_chunks,
                status.total_chunks
            )));
        }

        // 2. 播种本地记账，进度从真实起点继续
        let seeded_bytes = {
            let mut cm = self.chunk_manager.write().await;
            *cm = UploadChunkManager::new(file_size, status.chunk_size);
            for index in &status.uploaded_chunks {
                cm.mark_completed(*index);
            }
            cm.uploaded_bytes()
        };
        self.uploaded_bytes.store(seeded_bytes, Ordering::SeqCst);

        {
            let mut task = self.task.write().await;
            task.set_plan(file_size, status.chunk_size, status.total_chunks);
            task.session_id = Some(session_id.to_string());
            task.uploaded_size = seeded_bytes;
            task.completed_chunks = status.uploaded_chunks.len();
        }

        info!(
            "断点续传: session={}, 已接收 {}/{} 分片, 预置 {} bytes",
            session_id,
            status.uploaded_chunks.len(),
            status.total_chunks,
            seeded_bytes
        );

        // 3. 只补传缺失分片
        {
            let mut task = self.task.write().await;
            task.mark_transmitting();
        }
        *self.transfer_started_at.write().await = Some(std::time::Instant::now());
        self.emit_progress().await;

        self.transmit_pending(session_id).await?;

        self.finish(session_id).await
    }

    /// 窗口并发传输所有待传分片
    async fn transmit_pending(&self, session_id: &str) -> Result<(), UploadError> {
        let (pending, total_chunks) = {
            let cm = self.chunk_manager.read().await;
            (cm.pending_chunks(), cm.chunk_count())
        };

        if pending.is_empty() {
            debug!("没有待传分片，直接进入合并");
            return Ok(());
        }

        let max_parallel = self.options.max_parallel.max(1);
        info!(
            "[窗口调度] 待传分片 {} 个, 窗口大小 {}",
            pending.len(),
            max_parallel
        );

        let file_path = { self.task.read().await.file_path.clone() };

        for window in pending.chunks(max_parallel) {
            self.check_cancelled()?;

            let mut join_set: JoinSet<Result<(usize, u64), UploadError>> = JoinSet::new();

            for chunk in window {
                let chunk = chunk.clone();
                let transmitter = self.transmitter.clone();
                let file_path = file_path.clone();
                let session_id = session_id.to_string();

                join_set.spawn(async move {
                    let data = chunk.read_data(&file_path).await?;
                    let size = chunk.size();
                    transmitter
                        .send(&session_id, &chunk, data, total_chunks)
                        .await?;
                    Ok((chunk.index, size))
                });
            }

            // 整窗等待；首个终局失败中止剩余分片
            let mut window_error: Option<UploadError> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(Ok((index, size))) => {
                        self.record_chunk_done(index, size, total_chunks).await;
                    }
                    Ok(Err(e)) => {
                        if window_error.is_none() {
                            join_set.abort_all();
                            window_error = Some(e);
                        }
                    }
                    Err(join_err) => {
                        // 被 abort 的任务正常回收
                        if join_err.is_cancelled() {
                            continue;
                        }
                        if window_error.is_none() {
                            window_error =
                                Some(UploadError::Other(anyhow::anyhow!("分片任务异常: {}", join_err)));
                        }
                    }
                }
            }

            if let Some(e) = window_error {
                return Err(e);
            }
        }

        Ok(())
    }

    /// 单分片确认后的记账与进度重算
    async fn record_chunk_done(&self, index: usize, size: u64, total_chunks: usize) {
        let new_uploaded = self.uploaded_bytes.fetch_add(size, Ordering::SeqCst) + size;

        let completed = {
            let mut cm = self.chunk_manager.write().await;
            cm.mark_completed(index);
            cm.completed_count()
        };

        {
            let mut task = self.task.write().await;
            task.uploaded_size = new_uploaded;
            task.completed_chunks = completed;
        }

        info!("[分片#{}] ✓ 已确认 ({}/{} 完成)", index, completed, total_chunks);
        self.emit_progress().await;
    }

    /// 合并收尾
    ///
    /// 合并请求同样参与取消竞争：令牌触发时丢弃在途请求，上传以取消告终
    async fn finish(&self, session_id: &str) -> Result<FinalizeUploadResponse, UploadError> {
        self.check_cancelled()?;
        self.task.write().await.mark_finalizing();

        let artifact = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => {
                return Err(UploadError::Cancelled);
            }
            result = self.transport.finalize(session_id) => result?,
        };

        self.task.write().await.mark_completed();
        self.emit_progress().await;

        info!("上传完成: {} -> {}", artifact.file_name, artifact.file_path);
        Ok(artifact)
    }

    async fn emit_progress(&self) {
        if let Some(callback) = &self.progress_callback {
            callback(self.progress().await);
        }
    }
}
