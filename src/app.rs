//! Application wiring: config, database pool, cache lifecycle, web server.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use figment::{Figment, providers::Env};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tracing::info;

use crate::cache::CacheService;
use crate::cache::codec::{Codec, GzipCodec, IdentityCodec};
use crate::config::Config;
use crate::state::AppState;
use crate::web;

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    state: AppState,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new() -> Result<Self, anyhow::Error> {
        let config: Config = Figment::new()
            .merge(Env::raw())
            .extract()
            .context("Failed to load config")?;

        let connect_options = PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?;

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections = 4,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            max_lifetime = "30m",
            "database pool established"
        );

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("database migrations applied");

        // Codec is selected once at startup and injected; cache paths never
        // branch on compression availability.
        let codec: Arc<dyn Codec> = if config.cache_compression {
            Arc::new(GzipCodec)
        } else {
            Arc::new(IdentityCodec)
        };
        let cache = CacheService::new(config.cache_capacity, codec);
        cache.start_cleanup(Duration::from_secs(config.cache_cleanup_interval_seconds));
        info!(
            capacity = config.cache_capacity,
            cleanup_interval_seconds = config.cache_cleanup_interval_seconds,
            compression = config.cache_compression,
            "cache service started"
        );

        let state = AppState::new(db_pool, cache);

        Ok(App { config, state })
    }

    /// Serve the web API until shutdown, then stop the cache sweep.
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let router = web::create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.config.port))
            .await
            .with_context(|| format!("Failed to bind port {}", self.config.port))?;
        info!(port = self.config.port, "web server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Web server error")?;

        self.state.cache.shutdown().await;
        info!("shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}
