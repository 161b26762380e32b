// 分片发送器
//
// 核心功能：
// 1. 单分片发送，指数退避重试
// 2. 取消令牌感知：在途请求立即中断，取消后绝不再重试
// 3. 退避等待通过 Sleeper 注入，测试无需真实延时

use crate::uploader::chunk::UploadChunk;
use crate::uploader::transport::UploadTransport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

// =====================================================
// 重试配置
// =====================================================

/// 默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 初始退避延迟（毫秒）
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// 最大退避延迟（毫秒）
pub const MAX_BACKOFF_MS: u64 = 10_000;

/// 计算指数退避延迟
///
/// # 延迟序列
/// - retry_count=0: 1000ms
/// - retry_count=1: 2000ms
/// - retry_count=2: 4000ms
/// - retry_count=3: 8000ms
/// - 最大: 10000ms
pub fn calculate_backoff_delay(retry_count: u32) -> u64 {
    let base_delay = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    base_delay.min(MAX_BACKOFF_MS)
}

// =====================================================
// 睡眠抽象
// =====================================================

/// 退避等待抽象
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, millis: u64);
}

/// 默认实现：真实的 tokio 睡眠
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

// =====================================================
// 发送器
// =====================================================

/// 分片发送的终局错误
#[derive(Debug, Error)]
pub enum TransmitError {
    /// 上传被取消（不计为失败，不再重试）
    #[error("上传已取消")]
    Cancelled,

    /// 重试耗尽，携带最后一次错误信息和分片索引
    #[error("分片 #{index} 发送失败（共尝试 {attempts} 次）: {message}")]
    Exhausted {
        index: usize,
        attempts: u32,
        message: String,
    },
}

/// 分片发送器
///
/// 包装传输层的单次发送，提供有界重试与指数退避
pub struct ChunkTransmitter {
    /// 传输层
    transport: Arc<dyn UploadTransport>,
    /// 最大重试次数
    max_retries: u32,
    /// 取消令牌（与协调器共享）
    cancel_token: CancellationToken,
    /// 退避等待实现
    sleeper: Arc<dyn Sleeper>,
}

impl ChunkTransmitter {
    /// 创建发送器（真实睡眠）
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        max_retries: u32,
        cancel_token: CancellationToken,
    ) -> Self {
        Self::with_sleeper(transport, max_retries, cancel_token, Arc::new(TokioSleeper))
    }

    /// 创建发送器（注入睡眠实现，测试用）
    pub fn with_sleeper(
        transport: Arc<dyn UploadTransport>,
        max_retries: u32,
        cancel_token: CancellationToken,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            transport,
            max_retries,
            cancel_token,
            sleeper,
        }
    }

    /// 发送单个分片
    ///
    /// 最多尝试 `max_retries + 1` 次；两次尝试之间按指数退避等待。
    /// 取消令牌触发时立即返回 `Cancelled`，在途请求被丢弃，不再安排重试。
    ///
    /// # 参数
    /// * `session_id` - 会话ID
    /// * `chunk` - 分片描述
    /// * `data` - 分片数据
    /// * `total_chunks` - 分片总数（随请求声明，服务端校验）
    pub async fn send(
        &self,
        session_id: &str,
        chunk: &UploadChunk,
        data: Vec<u8>,
        total_chunks: usize,
    ) -> Result<(), TransmitError> {
        let mut last_error: Option<anyhow::Error> = None;

        for retry in 0..=self.max_retries {
            // 检查取消
            if self.cancel_token.is_cancelled() {
                return Err(TransmitError::Cancelled);
            }

            let attempt = self
                .transport
                .send_chunk(session_id, chunk.index, total_chunks, data.clone());

            // biased: 取消优先于请求结果
            let result = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    return Err(TransmitError::Cancelled);
                }
                result = attempt => result,
            };

            match result {
                Ok(()) => {
                    debug!("[分片#{}] ✓ 发送成功 (第 {} 次尝试)", chunk.index, retry + 1);
                    return Ok(());
                }
                Err(e) => {
                    if retry < self.max_retries {
                        let backoff_ms = calculate_backoff_delay(retry);
                        warn!(
                            "[分片#{}] 发送失败，等待 {}ms 后重试 ({}/{}): {}",
                            chunk.index,
                            backoff_ms,
                            retry + 1,
                            self.max_retries,
                            e
                        );

                        // 退避等待期间同样响应取消，取消优先
                        tokio::select! {
                            biased;
                            _ = self.cancel_token.cancelled() => {
                                return Err(TransmitError::Cancelled);
                            }
                            _ = self.sleeper.sleep(backoff_ms) => {}
                        }
                    }

                    last_error = Some(e);
                }
            }
        }

        // 达到最大重试次数
        error!(
            "[分片#{}] 发送失败，已达最大重试次数 ({})",
            chunk.index, self.max_retries
        );

        Err(TransmitError::Exhausted {
            index: chunk.index,
            attempts: self.max_retries + 1,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "发送失败".to_string()),
        })
    }
}
