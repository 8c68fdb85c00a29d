//! Dual-tier caching layer.
//!
//! [`service::CacheService`] is the server-side tier: TTL entries with
//! stale-while-revalidate serving, single-flight refresh dedup, optional gzip
//! compression of large payloads, and a periodic cleanup sweep.
//! [`page::PageCache`] is the simplified per-view peer with manual
//! invalidation.

pub mod codec;
pub mod page;
pub mod service;
pub mod store;

use std::sync::Arc;

pub use service::{CacheService, RefreshOptions};
pub use store::{GetOptions, SetOptions};

/// Errors surfaced by the cache layer.
///
/// Only refresh failures with no fallback value and payload codec mismatches
/// reach callers; all store-internal inconsistencies self-heal as misses.
/// Clone so every waiter joined on a single-flight refresh can own the
/// failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache refresh failed: {0}")]
    Refresh(Arc<anyhow::Error>),
    #[error("failed to encode cache payload: {0}")]
    Encode(Arc<serde_json::Error>),
    #[error("failed to decode cache payload: {0}")]
    Decode(Arc<serde_json::Error>),
}
