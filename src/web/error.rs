use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::shared::cache::CacheError;
use crate::shared::event_log::EventLogError;
use crate::shared::pod::PodError;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden(String),
    BadRequest(String),
    /// The user's container address is not known yet.
    NotReady,
    /// The sandbox service could not be reached or answered garbage.
    Upstream(String),
    Internal(anyhow::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not ready".to_string()),
            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Internal error: {}", e),
            ),
        };
        (status, Json(ErrorResponse { message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<EventLogError> for ApiError {
    fn from(e: EventLogError) -> Self {
        ApiError::Internal(e.into())
    }
}

impl From<PodError> for ApiError {
    fn from(e: PodError) -> Self {
        ApiError::Internal(e.into())
    }
}
