//! SQLite memo cache for the payment forwarder.
//!
//! Remote-control wallets return only a hash of an invoice's description, so
//! the forwarder records the full memo of every invoice it issues here, keyed
//! by payment hash, and looks it up again when building transaction history.
//!
//! # Example
//!
//! ```no_run
//! use memo_store::{memo, MemoStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let store = MemoStore::connect("sqlite:memo_cache.db?mode=rwc").await?;
//!     store.migrate().await?;
//!
//!     memo::upsert_memo(store.pool(), "a1b2c3", "Table 4: two espressos").await?;
//!     let entry = memo::get_memo(store.pool(), "a1b2c3").await?;
//!     assert_eq!(entry.map(|e| e.memo).as_deref(), Some("Table 4: two espressos"));
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memo;
pub mod models;

pub use error::{MemoStoreError, Result};
pub use models::MemoEntry;

use async_trait::async_trait;
use ledger_core::{KeyValueStore, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Default SQLite URL used by [`MemoStore::from_env`].
pub const DEFAULT_DB_URL: &str = "sqlite:memo_cache.db?mode=rwc";

/// Memo store connection wrapper.
#[derive(Debug, Clone)]
pub struct MemoStore {
    pool: SqlitePool,
}

impl MemoStore {
    /// Default pool size for store connections.
    const DEFAULT_POOL_SIZE: u32 = 5;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    /// In-memory databases need a pool size of 1, since every connection
    /// opens its own private database.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect using `MEMO_DB_URL`, falling back to [`DEFAULT_DB_URL`].
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var("MEMO_DB_URL").unwrap_or_else(|_| DEFAULT_DB_URL.to_string());
        Self::connect(&url).await
    }

    /// Connect to a SQLite database with a custom pool size.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!("Connected to memo store: {} (pool size: {})", url, pool_size);

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running memo store migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl KeyValueStore for MemoStore {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
        let entry = memo::get_memo(&self.pool, key).await?;
        Ok(entry.map(|e| e.memo))
    }

    async fn put(&self, key: &str, value: &str) -> std::result::Result<(), StoreError> {
        memo::upsert_memo(&self.pool, key, value).await?;
        Ok(())
    }
}
