use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::CONFIG;
use crate::database::error::StoreError;

/// Connection pools per database, created lazily from `DATABASE_URL`.
pub struct DatabaseManager {
    pools: Arc<RwLock<HashMap<String, PgPool>>>,
}

impl DatabaseManager {
    fn instance() -> &'static DatabaseManager {
        use std::sync::OnceLock;
        static INSTANCE: OnceLock<DatabaseManager> = OnceLock::new();
        INSTANCE.get_or_init(DatabaseManager::new)
    }

    pub fn new() -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Pool for the database named in `DATABASE_URL`
    pub async fn main_pool() -> Result<PgPool, StoreError> {
        let name = Self::main_database_name()?;
        Self::instance().get_pool(&name).await
    }

    /// Get existing pool or create a new one lazily
    pub async fn get_pool(&self, database_name: &str) -> Result<PgPool, StoreError> {
        // Fast path: try read lock
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(database_name) {
                return Ok(pool.clone());
            }
        }

        let connection_string = Self::build_connection_string(database_name)?;
        let pool = PgPoolOptions::new()
            .max_connections(CONFIG.database.max_connections)
            .acquire_timeout(Duration::from_secs(CONFIG.database.connection_timeout))
            .connect(&connection_string)
            .await?;

        // A concurrent caller may have connected first; keep its pool
        let mut pools = self.pools.write().await;
        let pool = pools
            .entry(database_name.to_string())
            .or_insert_with(|| {
                info!("Created database pool for: {}", database_name);
                pool
            })
            .clone();
        Ok(pool)
    }

    fn base_url() -> Result<url::Url, StoreError> {
        let base = std::env::var("DATABASE_URL").map_err(|_| StoreError::ConfigMissing("DATABASE_URL"))?;
        url::Url::parse(&base).map_err(|_| StoreError::InvalidDatabaseUrl)
    }

    fn main_database_name() -> Result<String, StoreError> {
        let url = Self::base_url()?;
        let name = url.path().trim_start_matches('/');
        if name.is_empty() {
            return Err(StoreError::InvalidDatabaseUrl);
        }
        Ok(name.to_string())
    }

    fn build_connection_string(database_name: &str) -> Result<String, StoreError> {
        let mut url = Self::base_url()?;
        // Replace the path to the database name (ensure leading slash)
        url.set_path(&format!("/{}", database_name));
        Ok(url.into())
    }

    /// Pings the main pool to ensure connectivity
    pub async fn health_check() -> Result<(), StoreError> {
        let pool = Self::main_pool().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    /// Close and remove all pools (e.g., on shutdown)
    pub async fn close_all() {
        let manager = Self::instance();
        let mut pools = manager.pools.write().await;
        for (name, pool) in pools.drain() {
            pool.close().await;
            info!("Closed database pool: {}", name);
        }
    }
}

impl Default for DatabaseManager {
    fn default() -> Self {
        Self::new()
    }
}
