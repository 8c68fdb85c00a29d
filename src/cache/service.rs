//! Stale-while-revalidate controller with single-flight refresh dedup.
//!
//! One `CacheService` exists per process, constructed by the entry point and
//! handed to consumers through `AppState` — no hidden module-level global.
//! Readers get one of three behaviors: a fresh hit returns immediately, a
//! stale hit with background refresh returns immediately while the refresh
//! runs on the runtime, and everything else joins the single in-flight
//! refresh for the key. Concurrent cold callers share one `refresh` execution
//! and one result, held in the in-flight map as a `Shared` future.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::CacheError;
use super::codec::Codec;
use super::store::{CacheStore, GetOptions, Lookup, SetOptions};

/// How often the background sweep reaps hard-expired entries.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A single in-flight refresh, shared by every caller that joins it.
type RefreshHandle = Shared<BoxFuture<'static, Result<Arc<Value>, CacheError>>>;

/// Options for a `get_or_refresh` call.
#[derive(Debug, Clone, Copy)]
pub struct RefreshOptions {
    pub ttl: Duration,
    /// Grace window: serve entries past `ttl - grace` (even past `ttl`)
    /// while a refresh happens elsewhere.
    pub stale_while_revalidate: Option<Duration>,
    /// Serve stale values immediately and refresh off the caller's path.
    pub background_refresh: bool,
    pub compress: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            stale_while_revalidate: None,
            background_refresh: false,
            compress: false,
        }
    }
}

impl RefreshOptions {
    fn get_options(&self) -> GetOptions {
        GetOptions {
            stale_while_revalidate: self.stale_while_revalidate,
        }
    }

    fn set_options(&self) -> SetOptions {
        SetOptions {
            ttl: self.ttl,
            compress: self.compress,
        }
    }
}

/// Process-wide cache with explicit lifecycle. Clone-cheap.
#[derive(Clone)]
pub struct CacheService {
    store: Arc<CacheStore>,
    inflight: Arc<DashMap<String, RefreshHandle>>,
    cleanup_token: CancellationToken,
    cleanup_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl CacheService {
    pub fn new(capacity: usize, codec: Arc<dyn Codec>) -> Self {
        Self {
            store: Arc::new(CacheStore::new(capacity, codec)),
            inflight: Arc::new(DashMap::new()),
            cleanup_token: CancellationToken::new(),
            cleanup_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Read a cached value. Expiry is read-time opt-in: pass a grace window
    /// in `opts` to see entries past their TTL.
    pub fn get<T: DeserializeOwned>(&self, key: &str, opts: &GetOptions) -> Option<T> {
        self.store.get(key, opts)
    }

    /// Write a value directly, bypassing any in-flight refresh.
    /// Later writes win over concurrent refresh completions.
    pub fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        opts: &SetOptions,
    ) -> Result<(), CacheError> {
        self.store.set(key, value, opts)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.store.delete(key)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Drop all entries and all in-flight refresh handles.
    pub fn clear(&self) {
        self.store.clear();
        self.inflight.clear();
    }

    /// Serve `key` from cache, refreshing through `refresh` as needed.
    ///
    /// A refresh failure is only surfaced when no cached value was held at
    /// lookup time; otherwise the held value is served as a fallback.
    pub async fn get_or_refresh<T, F, Fut>(
        &self,
        key: &str,
        refresh: F,
        opts: &RefreshOptions,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        match self.store.lookup(key, &opts.get_options()) {
            Lookup::Fresh(value) => decode(value),
            Lookup::Stale(value) if opts.background_refresh => {
                self.spawn_background_refresh(key, refresh, opts);
                decode(value)
            }
            lookup => {
                let fallback = lookup.into_value();
                let handle = self.join_refresh(key, refresh, opts);
                match handle.await {
                    Ok(value) => decode(value),
                    Err(err) => match fallback {
                        Some(value) => {
                            warn!(key, error = %err, "cache refresh failed, serving stale value");
                            decode(value)
                        }
                        None => Err(err),
                    },
                }
            }
        }
    }

    /// Join the in-flight refresh for `key`, starting one if none exists.
    /// The handle is removed when the refresh settles, success or failure.
    fn join_refresh<T, F, Fut>(&self, key: &str, refresh: F, opts: &RefreshOptions) -> RefreshHandle
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        match self.inflight.entry(key.to_owned()) {
            Entry::Occupied(existing) => existing.get().clone(),
            Entry::Vacant(slot) => {
                let store = Arc::clone(&self.store);
                let inflight = Arc::clone(&self.inflight);
                let owned_key = key.to_owned();
                let set_opts = opts.set_options();
                let handle: RefreshHandle = async move {
                    let result = match refresh().await {
                        Ok(value) => serde_json::to_value(&value)
                            .map_err(|e| CacheError::Encode(Arc::new(e)))
                            .map(|json| {
                                store.set_value(&owned_key, json.clone(), &set_opts);
                                Arc::new(json)
                            }),
                        Err(e) => Err(CacheError::Refresh(Arc::new(e))),
                    };
                    inflight.remove(&owned_key);
                    result
                }
                .boxed()
                .shared();
                slot.insert(handle.clone());
                handle
            }
        }
    }

    /// Run a refresh off the caller's path. Failures are logged and dropped;
    /// they never reach the caller that was served the stale value.
    fn spawn_background_refresh<T, F, Fut>(&self, key: &str, refresh: F, opts: &RefreshOptions)
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let handle = self.join_refresh(key, refresh, opts);
        let key = key.to_owned();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                warn!(key, error = %e, "background cache refresh failed");
            }
        });
    }

    /// Spawn the periodic sweep of hard-expired entries.
    /// Runs until `shutdown` cancels it.
    pub fn start_cleanup(&self, interval: Duration) {
        let store = Arc::clone(&self.store);
        let token = self.cleanup_token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired();
                        if removed > 0 {
                            debug!(removed, entries = store.len(), "swept expired cache entries");
                        }
                    }
                }
            }
        });
        if let Ok(mut slot) = self.cleanup_task.lock() {
            *slot = Some(handle);
        }
    }

    /// Stop the cleanup sweep and wait for it to exit.
    pub async fn shutdown(&self) {
        self.cleanup_token.cancel();
        let handle = match self.cleanup_task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &CacheStore {
        &self.store
    }
}

fn decode<T: DeserializeOwned>(value: Arc<Value>) -> Result<T, CacheError> {
    serde_json::from_value(value.as_ref().clone()).map_err(|e| CacheError::Decode(Arc::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::GzipCodec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service() -> CacheService {
        CacheService::new(100, Arc::new(GzipCodec))
    }

    fn opts(ttl_ms: u64, grace_ms: Option<u64>, background: bool) -> RefreshOptions {
        RefreshOptions {
            ttl: Duration::from_millis(ttl_ms),
            stale_while_revalidate: grace_ms.map(Duration::from_millis),
            background_refresh: background,
            compress: false,
        }
    }

    #[tokio::test]
    async fn cold_key_refreshes_and_caches() {
        let cache = service();
        let value: String = cache
            .get_or_refresh("k", || async { Ok("fetched".to_owned()) }, &opts(60_000, None, false))
            .await
            .unwrap();
        assert_eq!(value, "fetched");
        assert_eq!(
            cache.get::<String>("k", &GetOptions::default()),
            Some("fetched".to_owned())
        );
    }

    #[tokio::test]
    async fn fresh_hit_skips_refresh() {
        let cache = service();
        cache.set("k", &"cached", &SetOptions::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let value: String = cache
            .get_or_refresh(
                "k",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("refreshed".to_owned())
                },
                &opts(60_000, None, false),
            )
            .await
            .unwrap();
        assert_eq!(value, "cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ten_concurrent_cold_callers_share_one_refresh() {
        let cache = service();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let counter = calls.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(
                        "cold",
                        move || async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(42_i64)
                        },
                        &opts(60_000, None, false),
                    )
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_hit_serves_immediately_and_refreshes_in_background() {
        let cache = service();
        cache
            .set("k", &"old", &SetOptions { ttl: Duration::from_millis(1000), compress: false })
            .unwrap();
        cache.store().backdate("k", Duration::from_millis(850));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let value: String = cache
            .get_or_refresh(
                "k",
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok("new".to_owned())
                },
                &opts(1000, Some(200), true),
            )
            .await
            .unwrap();
        // Caller got the stale value without waiting on the refresh.
        assert_eq!(value, "old");

        // The background refresh lands shortly after.
        for _ in 0..50 {
            if cache.get::<String>("k", &GetOptions::default()) == Some("new".to_owned()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            cache.get::<String>("k", &GetOptions::default()),
            Some("new".to_owned())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_background_refresh_never_reaches_caller() {
        let cache = service();
        cache
            .set("k", &"old", &SetOptions { ttl: Duration::from_millis(1000), compress: false })
            .unwrap();
        cache.store().backdate("k", Duration::from_millis(900));

        let value: String = cache
            .get_or_refresh(
                "k",
                || async { Err(anyhow::anyhow!("backend down")) },
                &opts(1000, Some(200), true),
            )
            .await
            .unwrap();
        assert_eq!(value, "old");
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The stale value is still served; the failure was swallowed.
        let opts = GetOptions { stale_while_revalidate: Some(Duration::from_millis(200)) };
        assert_eq!(cache.get::<String>("k", &opts), Some("old".to_owned()));
    }

    #[tokio::test]
    async fn refresh_failure_falls_back_to_stale_value() {
        let cache = service();
        cache
            .set("k", &"old", &SetOptions { ttl: Duration::from_millis(1000), compress: false })
            .unwrap();
        cache.store().backdate("k", Duration::from_millis(900));

        // Stale hit without background refresh: this caller refreshes inline.
        let value: String = cache
            .get_or_refresh(
                "k",
                || async { Err(anyhow::anyhow!("backend down")) },
                &opts(1000, Some(200), false),
            )
            .await
            .unwrap();
        assert_eq!(value, "old");
    }

    #[tokio::test]
    async fn refresh_failure_with_no_cached_value_propagates() {
        let cache = service();
        let result: Result<String, _> = cache
            .get_or_refresh(
                "missing",
                || async { Err(anyhow::anyhow!("backend down")) },
                &opts(1000, None, false),
            )
            .await;
        assert!(matches!(result, Err(CacheError::Refresh(_))));
    }

    #[tokio::test]
    async fn failed_refresh_releases_the_inflight_slot() {
        let cache = service();
        let result: Result<i64, _> = cache
            .get_or_refresh(
                "k",
                || async { Err(anyhow::anyhow!("first attempt fails")) },
                &opts(60_000, None, false),
            )
            .await;
        assert!(result.is_err());
        // A later attempt runs a fresh refresh rather than joining a corpse.
        let value: i64 = cache
            .get_or_refresh("k", || async { Ok(7) }, &opts(60_000, None, false))
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    // Grace windows are a read-time contract: the TTL written with the entry
    // does not grant stale serving to readers that do not ask for it.
    #[tokio::test]
    async fn expired_entry_requires_read_time_grace() {
        let cache = service();
        cache
            .set("k", &"v", &SetOptions { ttl: Duration::from_millis(500), compress: false })
            .unwrap();
        cache.store().backdate("k", Duration::from_millis(600));
        assert_eq!(cache.get::<String>("k", &GetOptions::default()), None);
        assert!(!cache.store().has("k"));
    }

    #[tokio::test]
    async fn clear_drops_entries_and_inflight_handles() {
        let cache = service();
        cache.set("k", &1, &SetOptions::default()).unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn cleanup_sweep_reaps_expired_entries() {
        let cache = service();
        cache
            .set("old", &1, &SetOptions { ttl: Duration::from_millis(50), compress: false })
            .unwrap();
        cache
            .set("new", &2, &SetOptions { ttl: Duration::from_secs(60), compress: false })
            .unwrap();
        cache.start_cleanup(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!cache.store().has("old"));
        assert!(cache.store().has("new"));
        cache.shutdown().await;
    }
}
