//! Cleaner lock on PostgreSQL.
//!
//! One row per application id in `cas_locks`. A node takes the lock by
//! upserting its unique id; the upsert only overwrites a row that has
//! expired or is already its own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cas_ticket::TicketResult;
use cas_ticket::cleaner::LockingStrategy;
use sqlx_core::query::query;
use uuid::Uuid;

use crate::PgPool;
use crate::error::StorageResult;

#[derive(Debug, Clone)]
pub struct PostgresLockingStrategy {
    pool: Arc<PgPool>,
    application_id: String,
    unique_id: String,
    lock_timeout: Duration,
}

impl PostgresLockingStrategy {
    #[must_use]
    pub fn new(pool: Arc<PgPool>, application_id: impl Into<String>, lock_timeout: Duration) -> Self {
        Self {
            pool,
            application_id: application_id.into(),
            unique_id: Uuid::new_v4().to_string(),
            lock_timeout,
        }
    }

    /// Unique id of this lock owner.
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    async fn try_acquire(&self) -> StorageResult<bool> {
        let timeout_ms = i64::try_from(self.lock_timeout.as_millis()).unwrap_or(i64::MAX);
        let result = query(
            r#"
            INSERT INTO cas_locks (application_id, unique_id, expiration_date)
            VALUES ($1, $2, NOW() + $3::BIGINT * INTERVAL '1 millisecond')
            ON CONFLICT (application_id) DO UPDATE SET
                unique_id = EXCLUDED.unique_id,
                expiration_date = EXCLUDED.expiration_date
            WHERE cas_locks.expiration_date < NOW() OR cas_locks.unique_id = EXCLUDED.unique_id
            "#,
        )
        .bind(&self.application_id)
        .bind(&self.unique_id)
        .bind(timeout_ms)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn try_release(&self) -> StorageResult<()> {
        let result = query("DELETE FROM cas_locks WHERE application_id = $1 AND unique_id = $2")
            .bind(&self.application_id)
            .bind(&self.unique_id)
            .execute(self.pool.as_ref())
            .await?;
        if result.rows_affected() == 0 {
            tracing::warn!(
                application_id = %self.application_id,
                "Cleaner lock was not held at release"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl LockingStrategy for PostgresLockingStrategy {
    async fn acquire(&self) -> TicketResult<bool> {
        Ok(self.try_acquire().await?)
    }

    async fn release(&self) -> TicketResult<()> {
        Ok(self.try_release().await?)
    }
}
