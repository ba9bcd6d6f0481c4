//! Wires the configured ticket store into a registry, cleaner and logout
//! manager.

use std::sync::Arc;

use anyhow::Context;
use cas_ticket::cleaner::{LockingStrategy, NoOpLockingStrategy, TicketRegistryCleaner};
use cas_ticket::logout::LogoutManager;
use cas_ticket::store::DynTicketStore;
use cas_ticket::{DefaultTicketRegistry, TicketRegistry};
use cas_ticket_memory::MemoryTicketStore;
use cas_ticket_postgres::{PostgresLockingStrategy, PostgresTicketStore};
use cas_ticket_redis::{RedisLockingStrategy, RedisTicketStore};

use crate::config::{AppConfig, StorageBackend};
use crate::logout::HttpLogoutMessageSender;

/// Shared state of the admin API and the scheduled cleaner.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<dyn TicketRegistry>,
    pub cleaner: Arc<TicketRegistryCleaner>,
    pub logout_manager: LogoutManager,
    /// Largest page the admin API returns.
    pub max_page_size: usize,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("cleaner", &self.cleaner)
            .field("logout_manager", &self.logout_manager)
            .field("max_page_size", &self.max_page_size)
            .finish_non_exhaustive()
    }
}

/// Connects the configured backend and builds the application state.
///
/// # Errors
///
/// Returns an error if the backend cannot be reached, migrations fail, or
/// the ticket configuration is inconsistent.
pub async fn build_state(config: &AppConfig) -> anyhow::Result<AppState> {
    let (store, locking) = open_store(config).await?;
    tracing::info!(backend = store.name(), "Ticket store ready");

    let registry: Arc<dyn TicketRegistry> = Arc::new(
        DefaultTicketRegistry::from_config(store, &config.tickets)
            .context("ticket registry configuration")?,
    );

    let logout_manager = if config.logout.enabled {
        LogoutManager::new(Arc::new(HttpLogoutMessageSender::new(
            config.logout.timeout(),
        )?))
    } else {
        LogoutManager::disabled()
    };

    let cleaner = Arc::new(TicketRegistryCleaner::new(
        registry.clone(),
        logout_manager.clone(),
        locking,
    ));

    Ok(AppState {
        registry,
        cleaner,
        logout_manager,
        max_page_size: config.server.max_page_size.max(1),
    })
}

async fn open_store(
    config: &AppConfig,
) -> anyhow::Result<(DynTicketStore, Arc<dyn LockingStrategy>)> {
    let cleaner = &config.tickets.registry.cleaner;
    match config.storage.backend {
        StorageBackend::Memory => Ok((
            Arc::new(MemoryTicketStore::new()),
            Arc::new(NoOpLockingStrategy),
        )),
        StorageBackend::Redis => {
            let redis = &config.storage.redis;
            let pool = cas_ticket_redis::create_pool(redis)
                .await
                .context("failed to connect to Redis")?;
            let lock_key = format!("{}lock:{}", redis.key_prefix, cleaner.application_id);
            Ok((
                Arc::new(RedisTicketStore::new(pool.clone(), &redis.key_prefix)),
                Arc::new(RedisLockingStrategy::new(pool, lock_key, cleaner.lock_timeout)),
            ))
        }
        StorageBackend::Postgres => {
            let postgres = &config.storage.postgres;
            let pool = cas_ticket_postgres::connect(postgres)
                .await
                .context("failed to connect to PostgreSQL")?;
            let store = PostgresTicketStore::new(pool.clone());
            if postgres.run_migrations {
                store.migrate().await.context("ticket schema migration")?;
            }
            Ok((
                Arc::new(store),
                Arc::new(PostgresLockingStrategy::new(
                    pool,
                    &cleaner.application_id,
                    cleaner.lock_timeout,
                )),
            ))
        }
    }
}
