// 上传接口处理器

use crate::protocol::{
    fields, CancelUploadResponse, ChunkUploadResponse, FinalizeUploadRequest,
    FinalizeUploadResponse, InitUploadRequest, InitUploadResponse, UploadStatusResponse,
};
use crate::server::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::session::persister;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::response::Json;
use tracing::{debug, info};

/// POST /upload/init
/// 创建上传会话
pub async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitUploadRequest>,
) -> ApiResult<Json<InitUploadResponse>> {
    let entry = state
        .sessions
        .initialize(&req.file_name, req.file_size, &req.file_type, req.total_chunks)
        .await?;

    Ok(Json(InitUploadResponse {
        session_id: entry.meta.session_id.clone(),
    }))
}

/// POST /upload/chunk
/// 接收单个分片（multipart/form-data）
///
/// 字段：sessionId、chunkIndex、totalChunks、chunk。
/// 校验通过先落盘、后登记位图，重传同一分片幂等覆盖。
pub async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ChunkUploadResponse>> {
    let mut session_id: Option<String> = None;
    let mut chunk_index: Option<usize> = None;
    let mut declared_total: Option<usize> = None;
    let mut data: Option<Bytes> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            fields::SESSION_ID => session_id = Some(field.text().await?),
            fields::CHUNK_INDEX => {
                let raw = field.text().await?;
                chunk_index = Some(parse_count_field(fields::CHUNK_INDEX, &raw)?);
            }
            fields::TOTAL_CHUNKS => {
                let raw = field.text().await?;
                declared_total = Some(parse_count_field(fields::TOTAL_CHUNKS, &raw)?);
            }
            fields::CHUNK => data = Some(field.bytes().await?),
            _ => {
                debug!("忽略未知 multipart 字段: {}", name);
            }
        }
    }

    let session_id = session_id.ok_or_else(|| missing_field(fields::SESSION_ID))?;
    let chunk_index = chunk_index.ok_or_else(|| missing_field(fields::CHUNK_INDEX))?;
    let declared_total = declared_total.ok_or_else(|| missing_field(fields::TOTAL_CHUNKS))?;
    let data = data.ok_or_else(|| missing_field(fields::CHUNK))?;

    let entry = state
        .sessions
        .validate_chunk(&session_id, chunk_index, declared_total)?;
    persister::write_chunk(&entry.meta.staging_dir, chunk_index, &data).await?;
    entry.record_index(chunk_index);

    info!(
        "📤 收到分片: session={}, chunk=#{} ({}/{} 已接收), {} bytes",
        session_id,
        chunk_index,
        entry.received_count(),
        entry.meta.total_chunks,
        data.len()
    );
    Ok(Json(ChunkUploadResponse { success: true }))
}

/// POST /upload/finalize
/// 合并所有分片为最终文件
pub async fn finalize_upload(
    State(state): State<AppState>,
    Json(req): Json<FinalizeUploadRequest>,
) -> ApiResult<Json<FinalizeUploadResponse>> {
    let artifact = state
        .finalizer
        .finalize(&state.sessions, &req.session_id)
        .await?;

    Ok(Json(FinalizeUploadResponse {
        file_path: artifact.file_path,
        file_name: artifact.file_name,
    }))
}

/// GET /upload/status/:session_id
/// 查询会话进度（断点续传的恢复依据）
pub async fn upload_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<UploadStatusResponse>> {
    let status = state.sessions.status(&session_id)?;

    Ok(Json(UploadStatusResponse {
        uploaded_chunks: status.uploaded_chunks,
        total_chunks: status.total_chunks,
        progress: status.progress,
        file_name: status.file_name,
        chunk_size: status.chunk_size,
    }))
}

/// POST /upload/cancel/:session_id
/// 取消会话并丢弃已接收分片
///
/// 幂等：取消不存在的会话同样返回成功
pub async fn cancel_upload(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<CancelUploadResponse>> {
    state.sessions.cancel(&session_id).await;
    Ok(Json(CancelUploadResponse { success: true }))
}

fn missing_field(name: &str) -> ApiError {
    ApiError::BadRequest(format!("missing field: {}", name))
}

fn parse_count_field(name: &str, raw: &str) -> Result<usize, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid field {}: {}", name, raw)))
}
