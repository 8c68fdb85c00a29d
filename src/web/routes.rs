//! Web API router construction and shared response utilities.

use std::time::Duration;

use axum::http::HeaderValue;
use axum::response::{IntoResponse, Json, Response};
use axum::{Router, routing::get};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::web::{search, status};

/// Cache-Control presets for public endpoints.
///
/// The CDN respects `s-maxage` for edge caching and `stale-while-revalidate`
/// for serving stale content while re-fetching in the background.
pub mod cache {
    /// Spot/event search results.
    pub const SEARCH: &str = "public, max-age=60, s-maxage=300, stale-while-revalidate=120";
    /// Health and status endpoints -- never cache.
    pub const NONE: &str = "private, no-store, must-revalidate";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response.headers_mut().insert(
        axum::http::header::CACHE_CONTROL,
        HeaderValue::from_static(header),
    );
    response
}

/// Creates the web server router
pub fn create_router(app_state: AppState) -> Router {
    let api_router = Router::new()
        .route("/health", get(status::health))
        .route("/spots/search", get(search::search_spots))
        .route("/events/search", get(search::search_events))
        .with_state(app_state);

    Router::new()
        .nest("/api", api_router)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
}
