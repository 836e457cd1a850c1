use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::error::FaceSearchError;

pub type Result<T, E = AppError> = std::result::Result<T, E>;

/// 服务端自身的错误
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("an indexing job is already running")]
    JobRunning,
    #[error("no indexing job has been started")]
    NoJob,
}

/// API错误类型
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        if let Some(e) = self.0.downcast_ref::<FaceSearchError>() {
            return match e {
                FaceSearchError::NoFaceDetected { .. }
                | FaceSearchError::InvalidTolerance(_)
                | FaceSearchError::UnreadableImage { .. }
                | FaceSearchError::DimensionMismatch { .. }
                | FaceSearchError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
                FaceSearchError::VersionMismatch { .. } => StatusCode::CONFLICT,
                FaceSearchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                FaceSearchError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
        }
        match self.0.downcast_ref::<ServerError>() {
            Some(ServerError::JobRunning) => StatusCode::CONFLICT,
            Some(ServerError::NoJob) => StatusCode::NOT_FOUND,
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("请求处理失败: {:#}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
