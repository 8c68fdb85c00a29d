//! Bounded in-memory entry store with TTL and stale bookkeeping.
//!
//! Entries hold serialized payloads (`serde_json::Value`), optionally
//! gzip-compressed above [`COMPRESS_THRESHOLD`]. Expiry is strict by default:
//! a hard-expired entry is invisible and deleted on read unless the reader
//! opts into a stale-while-revalidate grace window *on that read* — a grace
//! window requested at write time is deliberately not remembered.
//!
//! Capacity is a soft bound restored after every write by evicting the
//! entries with the oldest write timestamps (recency-of-write, not true LRU).

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::CacheError;
use super::codec::{COMPRESS_THRESHOLD, Codec};

pub const DEFAULT_CAPACITY: usize = 1000;

/// Stored payload form. Compressed payloads are decompressed and re-parsed
/// on every read; hot keys stay below the threshold in practice.
#[derive(Clone)]
enum Payload {
    Plain(Arc<Value>),
    Compressed(Arc<[u8]>),
}

struct CacheEntry {
    payload: Payload,
    created: Instant,
    ttl: Duration,
    /// Set once the entry has been observed past `ttl - grace`.
    stale: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SetOptions {
    pub ttl: Duration,
    pub compress: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            compress: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Grace window during which expired-ish entries are still served.
    /// `None` means strict expiry: hard-expired entries read as misses.
    pub stale_while_revalidate: Option<Duration>,
}

/// Outcome of a raw lookup, before deserialization into the caller's type.
pub(crate) enum Lookup {
    Fresh(Arc<Value>),
    Stale(Arc<Value>),
    Miss,
}

impl Lookup {
    pub(crate) fn into_value(self) -> Option<Arc<Value>> {
        match self {
            Lookup::Fresh(value) | Lookup::Stale(value) => Some(value),
            Lookup::Miss => None,
        }
    }
}

/// Bounded key→entry map shared across the process.
pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    codec: Arc<dyn Codec>,
}

impl CacheStore {
    pub fn new(capacity: usize, codec: Arc<dyn Codec>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            codec,
        }
    }

    /// Serialize and store a value, then restore the capacity bound.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        opts: &SetOptions,
    ) -> Result<(), CacheError> {
        let json = serde_json::to_value(value).map_err(|e| CacheError::Encode(Arc::new(e)))?;
        self.set_value(key, json, opts);
        Ok(())
    }

    /// Store an already-serialized payload. Compression only applies when
    /// requested and the serialized text exceeds the threshold.
    pub(crate) fn set_value(&self, key: &str, value: Value, opts: &SetOptions) {
        let payload = self.encode(key, value, opts);
        self.entries.insert(
            key.to_owned(),
            CacheEntry {
                payload,
                created: Instant::now(),
                ttl: opts.ttl,
                stale: false,
            },
        );
        self.enforce_capacity();
    }

    fn encode(&self, key: &str, value: Value, opts: &SetOptions) -> Payload {
        if !opts.compress {
            return Payload::Plain(Arc::new(value));
        }
        let raw = match serde_json::to_vec(&value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize payload for compression");
                return Payload::Plain(Arc::new(value));
            }
        };
        if raw.len() <= COMPRESS_THRESHOLD {
            return Payload::Plain(Arc::new(value));
        }
        match self.codec.compress(&raw) {
            Ok(bytes) => {
                debug!(key, raw = raw.len(), compressed = bytes.len(), "compressed cache entry");
                Payload::Compressed(bytes.into())
            }
            Err(e) => {
                warn!(key, error = %e, "payload compression failed, storing plain");
                Payload::Plain(Arc::new(value))
            }
        }
    }

    /// Deserialize a stored value into the caller's type.
    ///
    /// Corrupt entries (decompression or parse failure) self-heal: they are
    /// deleted and read as a miss, never surfaced as an error.
    pub fn get<T: DeserializeOwned>(&self, key: &str, opts: &GetOptions) -> Option<T> {
        let value = self.lookup(key, opts).into_value()?;
        match serde_json::from_value(value.as_ref().clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key, error = %e, "dropping cache entry with mismatched payload shape");
                self.entries.remove(key);
                None
            }
        }
    }

    /// Raw lookup with expiry and staleness handling.
    pub(crate) fn lookup(&self, key: &str, opts: &GetOptions) -> Lookup {
        let stale;
        let payload;
        {
            let Some(mut entry) = self.entries.get_mut(key) else {
                return Lookup::Miss;
            };
            let age = entry.created.elapsed();
            if age > entry.ttl && opts.stale_while_revalidate.is_none() {
                drop(entry);
                self.entries.remove(key);
                return Lookup::Miss;
            }
            stale = match opts.stale_while_revalidate {
                Some(grace) => age > entry.ttl.saturating_sub(grace),
                None => false,
            };
            if stale {
                entry.stale = true;
            }
            payload = entry.payload.clone();
        }
        let Some(value) = self.decode(key, payload) else {
            return Lookup::Miss;
        };
        if stale {
            Lookup::Stale(value)
        } else {
            Lookup::Fresh(value)
        }
    }

    fn decode(&self, key: &str, payload: Payload) -> Option<Arc<Value>> {
        match payload {
            Payload::Plain(value) => Some(value),
            Payload::Compressed(bytes) => {
                let parsed: io::Result<Value> = self
                    .codec
                    .decompress(&bytes)
                    .and_then(|raw| serde_json::from_slice(&raw).map_err(io::Error::other));
                match parsed {
                    Ok(value) => Some(Arc::new(value)),
                    Err(e) => {
                        warn!(key, error = %e, "dropping corrupt compressed cache entry");
                        self.entries.remove(key);
                        None
                    }
                }
            }
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict oldest-write entries until the capacity bound holds again.
    fn enforce_capacity(&self) {
        let surplus = self.entries.len().saturating_sub(self.capacity);
        if surplus == 0 {
            return;
        }
        let mut by_age: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().created))
            .collect();
        by_age.sort_by_key(|&(_, created)| created);
        for (key, _) in by_age.into_iter().take(surplus) {
            self.entries.remove(&key);
        }
        debug!(evicted = surplus, entries = self.entries.len(), "cache capacity enforced");
    }

    /// Remove hard-expired entries. Snapshot first, then delete with a
    /// re-check, so concurrent writes to a swept key are never lost.
    pub(crate) fn sweep_expired(&self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().created.elapsed() > e.value().ttl)
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for key in expired {
            if self
                .entries
                .remove_if(&key, |_, entry| entry.created.elapsed() > entry.ttl)
                .is_some()
            {
                removed += 1;
            }
        }
        removed
    }

    /// Shift an entry's write timestamp into the past.
    #[cfg(test)]
    pub(crate) fn backdate(&self, key: &str, by: Duration) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.created -= by;
        }
    }

    #[cfg(test)]
    pub(crate) fn is_stale(&self, key: &str) -> Option<bool> {
        self.entries.get(key).map(|entry| entry.stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::{GzipCodec, IdentityCodec};
    use serde_json::json;

    fn store(capacity: usize) -> CacheStore {
        CacheStore::new(capacity, Arc::new(GzipCodec))
    }

    fn set_opts(ttl_ms: u64) -> SetOptions {
        SetOptions {
            ttl: Duration::from_millis(ttl_ms),
            compress: false,
        }
    }

    #[test]
    fn get_returns_value_within_ttl() {
        let store = store(10);
        store.set("a", &json!({"name": "沼津港 親水公園"}), &set_opts(60_000)).unwrap();
        let value: Value = store.get("a", &GetOptions::default()).unwrap();
        assert_eq!(value["name"], "沼津港 親水公園");
    }

    #[test]
    fn hard_expired_entry_is_deleted_on_strict_read() {
        let store = store(10);
        store.set("a", &json!(1), &set_opts(1000)).unwrap();
        store.backdate("a", Duration::from_millis(1001));
        assert_eq!(store.get::<Value>("a", &GetOptions::default()), None);
        assert!(!store.has("a"));
    }

    #[test]
    fn entry_just_inside_ttl_survives() {
        let store = store(10);
        store.set("a", &json!(1), &set_opts(1000)).unwrap();
        store.backdate("a", Duration::from_millis(900));
        assert_eq!(store.get::<i64>("a", &GetOptions::default()), Some(1));
        assert!(store.has("a"));
    }

    #[test]
    fn grace_window_serves_and_marks_stale() {
        let store = store(10);
        store.set("a", &json!("v"), &set_opts(1000)).unwrap();
        store.backdate("a", Duration::from_millis(850));
        let opts = GetOptions {
            stale_while_revalidate: Some(Duration::from_millis(200)),
        };
        assert_eq!(store.get::<String>("a", &opts), Some("v".to_owned()));
        assert_eq!(store.is_stale("a"), Some(true));
    }

    #[test]
    fn grace_window_serves_even_past_hard_expiry() {
        let store = store(10);
        store.set("a", &json!("v"), &set_opts(1000)).unwrap();
        store.backdate("a", Duration::from_millis(1100));
        let opts = GetOptions {
            stale_while_revalidate: Some(Duration::from_millis(200)),
        };
        assert_eq!(store.get::<String>("a", &opts), Some("v".to_owned()));
        assert!(store.has("a"));
    }

    // The write asked for a TTL, but expiry policy is read-time opt-in: a
    // reader that does not pass a grace window sees a miss once expired.
    #[test]
    fn write_time_policy_is_not_remembered_at_read_time() {
        let store = store(10);
        store
            .set("a", &json!("v"), &SetOptions { ttl: Duration::from_millis(500), compress: true })
            .unwrap();
        store.backdate("a", Duration::from_millis(600));
        assert_eq!(store.get::<String>("a", &GetOptions::default()), None);
        assert!(!store.has("a"));
    }

    #[test]
    fn capacity_evicts_oldest_writes() {
        let store = store(20);
        // Insert out of assertion order so eviction must go by timestamp.
        for i in 0..25 {
            store.set(&format!("k{i}"), &json!(i), &set_opts(60_000)).unwrap();
            // Distinct timestamps for a deterministic sort.
            store.backdate(&format!("k{i}"), Duration::from_millis(100 - 4 * i));
        }
        assert_eq!(store.len(), 20);
        for i in 0..5 {
            assert!(!store.has(&format!("k{i}")), "k{i} should have been evicted");
        }
        for i in 5..25 {
            assert!(store.has(&format!("k{i}")), "k{i} should survive");
        }
    }

    #[test]
    fn compression_round_trip_above_threshold() {
        let store = store(10);
        let large = json!({
            "items": (0..800)
                .map(|i| json!({"id": i, "name": format!("スポット {i}"), "tags": ["公園", "家族"]}))
                .collect::<Vec<_>>()
        });
        assert!(serde_json::to_vec(&large).unwrap().len() > COMPRESS_THRESHOLD);
        store
            .set("big", &large, &SetOptions { ttl: Duration::from_secs(60), compress: true })
            .unwrap();
        let restored: Value = store.get("big", &GetOptions::default()).unwrap();
        assert_eq!(restored, large);
    }

    #[test]
    fn compression_round_trip_with_identity_codec() {
        let store = CacheStore::new(10, Arc::new(IdentityCodec));
        let large = json!({"blob": "あ".repeat(12 * 1024)});
        store
            .set("big", &large, &SetOptions { ttl: Duration::from_secs(60), compress: true })
            .unwrap();
        let restored: Value = store.get("big", &GetOptions::default()).unwrap();
        assert_eq!(restored, large);
    }

    #[test]
    fn small_payload_skips_compression() {
        let store = store(10);
        store
            .set("small", &json!({"a": 1}), &SetOptions { ttl: Duration::from_secs(60), compress: true })
            .unwrap();
        assert_eq!(store.get::<Value>("small", &GetOptions::default()), Some(json!({"a": 1})));
    }

    #[test]
    fn corrupt_compressed_entry_reads_as_miss() {
        // Write through a gzip store, read through an identity store sharing
        // the same map shape: simulate by handing the entry garbage bytes.
        let store = store(10);
        store.entries.insert(
            "bad".to_owned(),
            CacheEntry {
                payload: Payload::Compressed(Arc::from(&b"not gzip at all"[..])),
                created: Instant::now(),
                ttl: Duration::from_secs(60),
                stale: false,
            },
        );
        assert_eq!(store.get::<Value>("bad", &GetOptions::default()), None);
        assert!(!store.has("bad"));
    }

    #[test]
    fn sweep_removes_only_hard_expired() {
        let store = store(10);
        store.set("old", &json!(1), &set_opts(100)).unwrap();
        store.set("new", &json!(2), &set_opts(60_000)).unwrap();
        store.backdate("old", Duration::from_millis(200));
        assert_eq!(store.sweep_expired(), 1);
        assert!(!store.has("old"));
        assert!(store.has("new"));
    }

    #[test]
    fn delete_and_clear() {
        let store = store(10);
        store.set("a", &json!(1), &set_opts(60_000)).unwrap();
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        store.set("b", &json!(2), &set_opts(60_000)).unwrap();
        store.clear();
        assert!(store.is_empty());
    }
}
