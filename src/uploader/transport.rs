// 上传传输层
//
// 定义五个线上操作的抽象接口，并提供 reqwest 实现
// 协调器与发送器只依赖接口，测试中可替换为进程内假实现

use crate::protocol::{
    fields, ChunkUploadResponse, FinalizeUploadRequest, FinalizeUploadResponse,
    InitUploadRequest, InitUploadResponse, UploadStatusResponse,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info};

/// 上传传输接口
///
/// 对应线上协议的五个操作
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// 初始化上传会话，返回会话ID
    async fn init_session(&self, request: &InitUploadRequest) -> Result<String>;

    /// 发送单个分片（单次尝试，重试由发送器负责）
    async fn send_chunk(
        &self,
        session_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        data: Vec<u8>,
    ) -> Result<()>;

    /// 查询会话状态（断点续传入口）
    async fn fetch_status(&self, session_id: &str) -> Result<UploadStatusResponse>;

    /// 合并分片，返回产物描述
    async fn finalize(&self, session_id: &str) -> Result<FinalizeUploadResponse>;

    /// 取消会话（服务端释放暂存目录）
    async fn cancel(&self, session_id: &str) -> Result<()>;
}

/// 基于 reqwest 的 HTTP 传输实现
pub struct HttpUploadTransport {
    /// HTTP客户端
    client: Client,
    /// 服务端基地址（不含尾部斜杠）
    base_url: String,
}

impl HttpUploadTransport {
    /// 创建 HTTP 传输
    ///
    /// # 参数
    /// * `base_url` - 服务端基地址，如 `http://127.0.0.1:7230`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("创建 HTTP 客户端失败")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 从非成功响应中提取 `{message}` 错误体
    async fn error_from_response(status: StatusCode, response: Response) -> anyhow::Error {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<crate::protocol::ErrorBody>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        anyhow::anyhow!("HTTP {}: {}", status.as_u16(), message)
    }
}

#[async_trait]
impl UploadTransport for HttpUploadTransport {
    async fn init_session(&self, request: &InitUploadRequest) -> Result<String> {
        info!(
            "初始化上传会话: file={}, size={}, chunks={}",
            request.file_name, request.file_size, request.total_chunks
        );

        let response = self
            .client
            .post(self.url("/upload/init"))
            .json(request)
            .send()
            .await
            .context("初始化请求发送失败")?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_response(status, response).await);
        }

        let init: InitUploadResponse = response.json().await.context("解析初始化响应失败")?;
        debug!("会话已创建: {}", init.session_id);
        Ok(init.session_id)
    }

    async fn send_chunk(
        &self,
        session_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        data: Vec<u8>,
    ) -> Result<()> {
        debug!(
            "发送分片: session={}, part={}, size={}",
            session_id,
            chunk_index,
            data.len()
        );

        // 构建 multipart form
        let part = multipart::Part::bytes(data)
            .file_name("chunk")
            .mime_str("application/octet-stream")?;

        let form = multipart::Form::new()
            .text(fields::SESSION_ID, session_id.to_string())
            .text(fields::CHUNK_INDEX, chunk_index.to_string())
            .text(fields::TOTAL_CHUNKS, total_chunks.to_string())
            .part(fields::CHUNK, part);

        let response = self
            .client
            .post(self.url("/upload/chunk"))
            .multipart(form)
            .send()
            .await
            .context("分片请求发送失败")?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_response(status, response).await);
        }

        let ack: ChunkUploadResponse = response.json().await.context("解析分片响应失败")?;
        if !ack.success {
            anyhow::bail!("服务端未确认分片 #{}", chunk_index);
        }

        Ok(())
    }

    async fn fetch_status(&self, session_id: &str) -> Result<UploadStatusResponse> {
        let url = self.url(&format!(
            "/upload/status/{}",
            urlencoding::encode(session_id)
        ));

        let response = self.client.get(url).send().await.context("状态查询失败")?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_response(status, response).await);
        }

        response.json().await.context("解析状态响应失败")
    }

    async fn finalize(&self, session_id: &str) -> Result<FinalizeUploadResponse> {
        info!("请求合并分片: session={}", session_id);

        let response = self
            .client
            .post(self.url("/upload/finalize"))
            .json(&FinalizeUploadRequest {
                session_id: session_id.to_string(),
            })
            .send()
            .await
            .context("合并请求发送失败")?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_response(status, response).await);
        }

        response.json().await.context("解析合并响应失败")
    }

    async fn cancel(&self, session_id: &str) -> Result<()> {
        let url = self.url(&format!(
            "/upload/cancel/{}",
            urlencoding::encode(session_id)
        ));

        let response = self.client.post(url).send().await.context("取消请求发送失败")?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::error_from_response(status, response).await);
        }

        Ok(())
    }
}
