//! HTTP refresh helpers for remote JSON resources.
//!
//! Refresh functions handed to the cache service wrap [`fetch_json`];
//! [`prefetch_into`] warms a [`PageCache`] ahead of navigation and treats
//! every failure as advisory.

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::cache::page::PageCache;

/// Fetch a JSON body, treating non-2xx statuses as errors.
pub async fn fetch_json(client: &Client, url: &str) -> anyhow::Result<Value> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.json().await?)
}

/// Fetch `url` and store the body under `key`. Prefetching is an
/// optimization: failures are logged at debug and dropped.
pub async fn prefetch_into(
    cache: &PageCache,
    client: &Client,
    url: &str,
    key: &str,
    ttl_seconds: u64,
) {
    match fetch_json(client, url).await {
        Ok(body) => cache.set(key, body, ttl_seconds),
        Err(e) => debug!(url, key, error = %e, "prefetch failed"),
    }
}
