//! Redis backend for the CAS ticket registry.
//!
//! Provides [`RedisTicketStore`], a [`cas_ticket::store::TicketStore`] that
//! lets several CAS nodes share one ticket registry, and
//! [`RedisLockingStrategy`], which keeps those nodes from running the
//! cleaner at the same time.
//!
//! # Example
//!
//! ```ignore
//! let pool = cas_ticket_redis::create_pool(&config).await?;
//! let store = RedisTicketStore::new(pool, &config.key_prefix);
//! let registry = DefaultTicketRegistry::new(Arc::new(store));
//! ```

pub mod config;
pub mod error;
pub mod lock;
pub mod store;

use std::time::Duration;

pub use config::RedisStoreConfig;
pub use error::{RedisStoreError, RedisStoreResult};
pub use lock::RedisLockingStrategy;
pub use store::RedisTicketStore;

/// Creates a connection pool and checks that Redis is reachable.
///
/// # Errors
///
/// Returns an error if the URL is invalid or no connection can be made.
pub async fn create_pool(config: &RedisStoreConfig) -> RedisStoreResult<deadpool_redis::Pool> {
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let mut pool_config = redis_config.pool.take().unwrap_or_default();
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
    pool_config.timeouts.recycle = Some(Duration::from_millis(config.timeout_ms));
    redis_config.pool = Some(pool_config);

    let pool = redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;

    // Test the connection
    let _conn = pool.get().await?;

    tracing::info!(
        pool_size = config.pool_size,
        "Redis ticket store connected"
    );

    Ok(pool)
}
