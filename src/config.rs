//! Application configuration, extracted from environment variables.

use serde::Deserialize;

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_cache_capacity() -> usize {
    crate::cache::store::DEFAULT_CAPACITY
}

fn default_cleanup_interval() -> u64 {
    crate::cache::service::DEFAULT_CLEANUP_INTERVAL.as_secs()
}

fn default_cache_compression() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Soft bound on server-side cache entries.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Seconds between sweeps of hard-expired cache entries.
    #[serde(default = "default_cleanup_interval")]
    pub cache_cleanup_interval_seconds: u64,
    /// Gzip large cached payloads. Off swaps in the identity codec.
    #[serde(default = "default_cache_compression")]
    pub cache_compression: bool,
}
