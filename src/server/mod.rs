// Web服务器模块

pub mod error;
pub mod handlers;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// 健康检查响应结构
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    /// 当前在途的上传会话数
    active_sessions: usize,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "audiobook-upload-rust".to_string(),
        active_sessions: state.sessions.session_count(),
    })
}

/// 构建完整路由
///
/// 请求体上限 = 分片大小 + 1MB multipart 报文余量
pub fn build_router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http()) // HTTP 请求日志
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let body_limit = (state.config.upload.chunk_size_bytes() as usize).saturating_add(1024 * 1024);

    Router::new()
        .route("/upload/init", post(handlers::init_upload))
        .route("/upload/chunk", post(handlers::upload_chunk))
        .route("/upload/finalize", post(handlers::finalize_upload))
        .route("/upload/status/:session_id", get(handlers::upload_status))
        .route("/upload/cancel/:session_id", post(handlers::cancel_upload))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(middleware)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::protocol::InitUploadRequest;
    use crate::uploader::{
        HttpUploadTransport, UploadCoordinator, UploadOptions, UploadTransport,
    };
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::{tempdir, NamedTempFile, TempDir};

    const MIB: usize = 1024 * 1024;

    /// 起一个真实监听的服务端，返回 base_url
    async fn spawn_server() -> (String, AppState, TempDir) {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.staging_dir = dir.path().join("staging");
        config.storage.output_dir = dir.path().join("uploads");

        let state = AppState::new(config).await.unwrap();
        let router = build_router(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        (format!("http://{}", addr), state, dir)
    }

    fn patterned_bytes(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn temp_file_with(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_full_upload_round_trip() {
        let (base, state, dir) = spawn_server().await;

        // 2.5MB 文件 → 3 个分片 [1MB, 1MB, 0.5MB]
        let content = patterned_bytes(2 * MIB + MIB / 2);
        let file = temp_file_with(&content);

        let transport = Arc::new(HttpUploadTransport::new(&base).unwrap());
        let coordinator =
            UploadCoordinator::new(file.path(), transport, UploadOptions::default());
        let artifact = coordinator.upload().await.unwrap();

        // 产物字节级还原
        assert_eq!(
            artifact.file_name,
            file.path().file_name().unwrap().to_string_lossy()
        );
        let merged = std::fs::read(&artifact.file_path).unwrap();
        assert_eq!(merged, content);

        // 会话注销、暂存目录清空
        assert_eq!(state.sessions.session_count(), 0);
        let staging_entries = std::fs::read_dir(dir.path().join("staging")).unwrap().count();
        assert_eq!(staging_entries, 0);
    }

    #[tokio::test]
    async fn test_empty_file_round_trip() {
        let (base, _state, _dir) = spawn_server().await;
        let file = temp_file_with(b"");

        let transport = Arc::new(HttpUploadTransport::new(&base).unwrap());
        let coordinator =
            UploadCoordinator::new(file.path(), transport, UploadOptions::default());
        let artifact = coordinator.upload().await.unwrap();

        let merged = std::fs::read(&artifact.file_path).unwrap();
        assert!(merged.is_empty());
    }

    #[tokio::test]
    async fn test_resume_round_trip() {
        let (base, _state, _dir) = spawn_server().await;

        let content = patterned_bytes(2 * MIB + MIB / 2);
        let file = temp_file_with(&content);
        let transport = HttpUploadTransport::new(&base).unwrap();

        // 第一段"中断前"的上传：只送出分片 0 和 2
        let session_id = transport
            .init_session(&InitUploadRequest {
                file_name: "resume.bin".to_string(),
                file_size: content.len() as u64,
                file_type: "application/octet-stream".to_string(),
                total_chunks: 3,
            })
            .await
            .unwrap();
        transport
            .send_chunk(&session_id, 0, 3, content[..MIB].to_vec())
            .await
            .unwrap();
        transport
            .send_chunk(&session_id, 2, 3, content[2 * MIB..].to_vec())
            .await
            .unwrap();

        let status = transport.fetch_status(&session_id).await.unwrap();
        assert_eq!(status.uploaded_chunks, vec![0, 2]);
        assert_eq!(status.total_chunks, 3);
        assert_eq!(status.chunk_size, MIB as u64);
        assert_eq!(status.file_name, "resume.bin");

        // 新协调器按会话状态续传，只补缺失分片
        let transport = Arc::new(transport);
        let coordinator =
            UploadCoordinator::new(file.path(), transport, UploadOptions::default());
        let artifact = coordinator.resume(&session_id).await.unwrap();

        // 产物沿用会话登记的文件名，字节与本地文件一致
        assert_eq!(artifact.file_name, "resume.bin");
        let merged = std::fs::read(&artifact.file_path).unwrap();
        assert_eq!(merged, content);
    }

    #[tokio::test]
    async fn test_status_of_unknown_session_is_404() {
        let (base, _state, _dir) = spawn_server().await;
        let transport = HttpUploadTransport::new(&base).unwrap();

        let err = transport.fetch_status("ghost").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HTTP 404"));
        assert!(message.contains("session not found"));
    }

    #[tokio::test]
    async fn test_init_rejects_mismatched_chunk_count() {
        let (base, _state, _dir) = spawn_server().await;
        let transport = HttpUploadTransport::new(&base).unwrap();

        let err = transport
            .init_session(&InitUploadRequest {
                file_name: "bad.bin".to_string(),
                file_size: (2 * MIB + 512) as u64,
                file_type: "application/octet-stream".to_string(),
                total_chunks: 7,
            })
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HTTP 400"));
        assert!(message.contains("chunk count mismatch"));
    }

    #[tokio::test]
    async fn test_init_rejects_oversized_declaration() {
        let (base, state, _dir) = spawn_server().await;
        let transport = HttpUploadTransport::new(&base).unwrap();

        // 32PB 的声明（分片总数自洽）不能换来 2^35 位的接收位图
        let file_size: u64 = 32 * 1024 * 1024 * 1024 * 1024 * 1024;
        let err = transport
            .init_session(&InitUploadRequest {
                file_name: "colossal.bin".to_string(),
                file_size,
                file_type: "application/octet-stream".to_string(),
                total_chunks: (file_size / MIB as u64) as usize,
            })
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HTTP 400"));
        assert!(message.contains("file too large"));
        assert_eq!(state.sessions.session_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_redundant_safe_over_http() {
        let (base, state, _dir) = spawn_server().await;
        let transport = HttpUploadTransport::new(&base).unwrap();

        let session_id = transport
            .init_session(&InitUploadRequest {
                file_name: "cancel.bin".to_string(),
                file_size: MIB as u64,
                file_type: "application/octet-stream".to_string(),
                total_chunks: 1,
            })
            .await
            .unwrap();
        assert_eq!(state.sessions.session_count(), 1);

        transport.cancel(&session_id).await.unwrap();
        assert_eq!(state.sessions.session_count(), 0);

        // 重复取消、取消未知会话都返回成功
        transport.cancel(&session_id).await.unwrap();
        transport.cancel("ghost").await.unwrap();

        // 取消后的会话查询按不存在处理
        let err = transport.fetch_status(&session_id).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_chunk_upload_with_missing_fields_is_400() {
        let (base, _state, _dir) = spawn_server().await;

        let form = reqwest::multipart::Form::new().text("chunkIndex", "0");
        let response = reqwest::Client::new()
            .post(format!("{}/upload/chunk", base))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "missing field: sessionId");
    }

    #[tokio::test]
    async fn test_chunk_upload_to_unknown_session_is_404() {
        let (base, _state, _dir) = spawn_server().await;

        let form = reqwest::multipart::Form::new()
            .text("sessionId", "ghost")
            .text("chunkIndex", "0")
            .text("totalChunks", "1")
            .part("chunk", reqwest::multipart::Part::bytes(vec![1u8, 2, 3]));
        let response = reqwest::Client::new()
            .post(format!("{}/upload/chunk", base))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["message"], "session not found");
    }

    #[tokio::test]
    async fn test_finalize_with_missing_chunks_is_400() {
        let (base, _state, _dir) = spawn_server().await;
        let transport = HttpUploadTransport::new(&base).unwrap();

        let session_id = transport
            .init_session(&InitUploadRequest {
                file_name: "gap.bin".to_string(),
                file_size: (2 * MIB) as u64,
                file_type: "application/octet-stream".to_string(),
                total_chunks: 2,
            })
            .await
            .unwrap();
        transport
            .send_chunk(&session_id, 0, 2, vec![0u8; MIB])
            .await
            .unwrap();

        let err = transport.finalize(&session_id).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("HTTP 400"));
        assert!(message.contains("missing chunks: [1]"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (base, _state, _dir) = spawn_server().await;

        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "audiobook-upload-rust");
        assert_eq!(body["active_sessions"], 0);
    }
}
