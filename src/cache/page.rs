//! Page-level TTL cache, the simplified peer of the server-side store.
//!
//! One instance lives for the lifetime of a view context (a tab session in
//! the frontend bridge). No stale serving, no eviction pressure, no
//! cross-context sharing. Invalidation is a manual discipline: every call
//! site that mutates a resource must `delete` or overwrite the matching key
//! as a side effect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

#[derive(Clone, Default)]
pub struct PageCache {
    /// key → (cached_at, ttl, value)
    entries: Arc<DashMap<String, (Instant, Duration, Arc<Value>)>>,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a cached value if it exists and is fresh.
    pub fn get(&self, key: &str) -> Option<Arc<Value>> {
        let entry = self.entries.get(key)?;
        let (cached_at, ttl, ref value) = *entry;
        if cached_at.elapsed() < ttl {
            Some(value.clone())
        } else {
            None
        }
    }

    /// Store a value with a per-entry TTL.
    pub fn set(&self, key: &str, value: Value, ttl_seconds: u64) {
        self.entries.insert(
            key.to_owned(),
            (Instant::now(), Duration::from_secs(ttl_seconds), Arc::new(value)),
        );
    }

    /// Drop a key. Mutating call sites call this for the resource they touched.
    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
