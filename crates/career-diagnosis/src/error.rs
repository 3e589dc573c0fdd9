use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use diagnosis_common::error::CommonError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("unknown questionnaire version: {0}")]
    UnknownVersion(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("rate limit exceeded, retry in ~{retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Common(e) => {
                tracing::error!(error = %e, "store failure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "system temporarily unavailable, please retry".to_string(),
                )
            }
            AppError::Config(detail) => {
                tracing::error!(detail, "configuration error at request time");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "system temporarily unavailable, please retry".to_string(),
                )
            }
            AppError::BadRequest(_) | AppError::UnknownVersion(_) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", self.to_string())
            }
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "AUTH_REQUIRED", self.to_string()),
            AppError::RateLimited { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", self.to_string())
            }
        };

        let mut response = (status, Json(ErrorBody { error: code, message })).into_response();
        if matches!(self, AppError::Unauthorized) {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Basic realm=\"admin\""),
            );
        }
        response
    }
}
