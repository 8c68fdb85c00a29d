//! Health endpoint.

use axum::extract::State;
use axum::response::Response;
use serde::Serialize;
use ts_rs::TS;

use crate::state::AppState;
use crate::web::error::{ApiError, db_error};
use crate::web::routes::{cache, with_cache_control};

#[derive(Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache_entries: usize,
}

/// `GET /api/health`
pub(super) async fn health(State(state): State<AppState>) -> Result<Response, ApiError> {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db_pool)
        .await
        .map_err(|e| db_error("Health check", e))?;
    Ok(with_cache_control(
        HealthResponse {
            status: "ok",
            cache_entries: state.cache.len(),
        },
        cache::NONE,
    ))
}
