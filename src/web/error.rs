//! API error type shared by all handlers.
//!
//! Database and cache failures are logged with their context here and
//! surfaced to clients as an opaque "internal error"; details never leak
//! into responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use crate::cache::CacheError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Log a database failure with its context and return an opaque error.
pub fn db_error(context: &str, err: sqlx::Error) -> ApiError {
    error!(context, error = %err, "database query failed");
    ApiError::Internal("internal error".to_owned())
}

/// Log a cache failure with its context and return an opaque error.
pub fn cache_error(context: &str, err: CacheError) -> ApiError {
    error!(context, error = %err, "cache operation failed");
    ApiError::Internal("internal error".to_owned())
}
