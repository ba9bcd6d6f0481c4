//! PostgreSQL backend for the CAS ticket registry.
//!
//! Provides [`PostgresTicketStore`], a durable
//! [`cas_ticket::store::TicketStore`], and [`PostgresLockingStrategy`] for
//! coordinating the cleaner between nodes.
//!
//! # Example
//!
//! ```ignore
//! use cas_ticket_postgres::{PostgresTicketStore, connect};
//!
//! let pool = connect(&config).await?;
//! let store = PostgresTicketStore::new(pool);
//! store.migrate().await?;
//! ```

pub mod config;
pub mod error;
pub mod lock;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use sqlx_core::pool::{Pool, PoolOptions};
use sqlx_postgres::Postgres;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use config::PostgresStoreConfig;
pub use error::{StorageError, StorageResult};
pub use lock::PostgresLockingStrategy;
pub use store::PostgresTicketStore;

/// Opens a connection pool.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(config: &PostgresStoreConfig) -> StorageResult<Arc<PgPool>> {
    let pool = PoolOptions::<Postgres>::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .connect(&config.url)
        .await?;

    tracing::info!(pool_size = config.pool_size, "PostgreSQL ticket store connected");

    Ok(Arc::new(pool))
}
