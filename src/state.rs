//! Application state shared across handlers and background tasks.

use sqlx::PgPool;

use crate::cache::CacheService;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub cache: CacheService,
}

impl AppState {
    pub fn new(db_pool: PgPool, cache: CacheService) -> Self {
        Self { db_pool, cache }
    }
}
