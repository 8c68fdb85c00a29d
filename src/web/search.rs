//! Spot and event search handlers.
//!
//! Responses are served through the cache service (60 s TTL, 120 s grace,
//! background refresh), so a hot query never waits on the database. The
//! `search-method` response header reports which search path actually ran
//! for the cached page: `fulltext` or `legacy`.

use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::cache::RefreshOptions;
use crate::data::models::{Event, Spot};
use crate::data::search::{self, SearchPage, SearchRequest};
use crate::state::AppState;
use crate::web::error::{ApiError, cache_error};
use crate::web::routes::{cache, with_cache_control};

use std::time::Duration;

const SEARCH_REFRESH: RefreshOptions = RefreshOptions {
    ttl: Duration::from_secs(60),
    stale_while_revalidate: Some(Duration::from_secs(120)),
    background_refresh: true,
    compress: true,
};

const SEARCH_METHOD_HEADER: HeaderName = HeaderName::from_static("search-method");

fn default_limit() -> i64 {
    20
}

fn default_full_text() -> bool {
    true
}

#[derive(Deserialize, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SearchParams {
    #[serde(default, alias = "q")]
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_full_text", alias = "fulltext")]
    pub full_text: bool,
}

impl SearchParams {
    fn into_request(self) -> SearchRequest {
        SearchRequest {
            query: self.query.trim().to_owned(),
            limit: self.limit,
            offset: self.offset,
            use_full_text: self.full_text,
        }
    }
}

/// Cache key from normalized parameters, so equivalent requests share an
/// entry regardless of how the caller spelled them.
fn search_cache_key(kind: &str, req: &SearchRequest) -> String {
    format!(
        "search:{kind}:q={}:l={}:o={}:ft={}",
        req.query,
        search::clamp_limit(req.limit),
        search::clamp_offset(req.offset),
        req.use_full_text,
    )
}

fn search_response<T: Serialize>(page: SearchPage<T>) -> Response {
    let method = page.method;
    let mut response = with_cache_control(page, cache::SEARCH);
    response
        .headers_mut()
        .insert(SEARCH_METHOD_HEADER, HeaderValue::from_static(method.as_str()));
    response
}

/// `GET /api/spots/search`
pub(super) async fn search_spots(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let req = params.into_request();
    let key = search_cache_key("spots", &req);
    let pool = state.db_pool.clone();
    let page: SearchPage<Spot> = state
        .cache
        .get_or_refresh(
            &key,
            move || async move { Ok(search::search_spots(&pool, &req).await?) },
            &SEARCH_REFRESH,
        )
        .await
        .map_err(|e| cache_error("Spot search", e))?;
    Ok(search_response(page))
}

/// `GET /api/events/search`
pub(super) async fn search_events(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let req = params.into_request();
    let key = search_cache_key("events", &req);
    let pool = state.db_pool.clone();
    let page: SearchPage<Event> = state
        .cache
        .get_or_refresh(
            &key,
            move || async move { Ok(search::search_events(&pool, &req).await?) },
            &SEARCH_REFRESH,
        )
        .await
        .map_err(|e| cache_error("Event search", e))?;
    Ok(search_response(page))
}
