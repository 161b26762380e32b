// API错误类型
//
// 所有处理器错误统一转换为 { "message": ... } 响应体。
// 响应体消息保持英文，日志消息用中文。

use crate::protocol::ErrorBody;
use crate::session::SessionError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;
use tracing::error;

/// API错误
#[derive(Debug, Error)]
pub enum ApiError {
    /// 请求本身的问题（缺字段、非法取值、multipart 解析失败）
    #[error("{0}")]
    BadRequest(String),

    /// 会话层错误
    #[error("{0}")]
    Session(#[from] SessionError),

    /// 其他内部错误
    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Session(SessionError::Io(e))
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(format!("invalid multipart payload: {}", e))
    }
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Session(e) => match e {
                SessionError::NotFound => StatusCode::NOT_FOUND,
                SessionError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
                // 其余会话错误都是调用方的请求问题
                _ => StatusCode::BAD_REQUEST,
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("请求处理失败: {}", self);
        }
        (
            status,
            Json(ErrorBody {
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// API结果
pub type ApiResult<T> = Result<T, ApiError>;
