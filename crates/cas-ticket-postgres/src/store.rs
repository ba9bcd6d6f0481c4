//! PostgreSQL ticket store.
//!
//! Records live in a single `cas_tickets` table keyed by the record key.
//! Optimistic concurrency uses the `version` column: a conditional write is
//! an `UPDATE` or `DELETE` guarded by `version = $n`, and succeeds when it
//! affects exactly one row.

use std::sync::Arc;

use async_trait::async_trait;
use cas_ticket::TicketResult;
use cas_ticket::model::TicketKind;
use cas_ticket::store::{TicketRecord, TicketStore};
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_core::query_scalar::query_scalar;
use time::OffsetDateTime;

use crate::error::{StorageError, StorageResult};
use crate::PgPool;

const SCHEMA: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS cas_tickets (
        key TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        parent_key TEXT,
        principal_key TEXT,
        version BIGINT NOT NULL,
        expires_at TIMESTAMPTZ,
        body BYTEA NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS cas_tickets_kind_idx ON cas_tickets (kind)",
    "CREATE INDEX IF NOT EXISTS cas_tickets_parent_idx ON cas_tickets (parent_key)",
    "CREATE INDEX IF NOT EXISTS cas_tickets_principal_idx ON cas_tickets (principal_key)",
    r#"
    CREATE TABLE IF NOT EXISTS cas_locks (
        application_id TEXT PRIMARY KEY,
        unique_id TEXT NOT NULL,
        expiration_date TIMESTAMPTZ NOT NULL
    )
    "#,
];

type TicketRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    Option<OffsetDateTime>,
    Vec<u8>,
);

const SELECT_COLUMNS: &str =
    "SELECT key, kind, parent_key, principal_key, version, expires_at, body FROM cas_tickets";

/// Ticket store on PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresTicketStore {
    pool: Arc<PgPool>,
}

impl PostgresTicketStore {
    /// Create a new store with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the ticket and lock tables if they are missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        for statement in SCHEMA {
            query(statement)
                .execute(self.pool())
                .await
                .map_err(|e| StorageError::migration(e.to_string()))?;
        }
        tracing::debug!("Ticket tables are up to date");
        Ok(())
    }

    async fn fetch(&self, sql: &str, bind: &str) -> StorageResult<Vec<TicketRecord>> {
        let rows: Vec<TicketRow> = query_as(sql).bind(bind).fetch_all(self.pool()).await?;
        rows.into_iter().map(into_record).collect()
    }

    async fn insert_record(&self, record: TicketRecord) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO cas_tickets (key, kind, parent_key, principal_key, version, expires_at, body)
            VALUES ($1, $2, $3, $4, 1, $5, $6)
            ON CONFLICT (key) DO UPDATE SET
                kind = EXCLUDED.kind,
                parent_key = EXCLUDED.parent_key,
                principal_key = EXCLUDED.principal_key,
                version = 1,
                expires_at = EXCLUDED.expires_at,
                body = EXCLUDED.body
            "#,
        )
        .bind(&record.key)
        .bind(record.kind.as_str())
        .bind(&record.parent_key)
        .bind(&record.principal_key)
        .bind(record.expires_at)
        .bind(&record.body)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn load_record(&self, key: &str) -> StorageResult<Option<TicketRecord>> {
        let row: Option<TicketRow> = query_as(&format!("{SELECT_COLUMNS} WHERE key = $1"))
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        row.map(into_record).transpose()
    }

    async fn update_record(&self, record: &TicketRecord, expected_version: Option<u64>) -> StorageResult<bool> {
        let expected = expected_version.map(to_db_version).transpose()?;
        let result = query(
            r#"
            UPDATE cas_tickets
            SET version = version + 1, expires_at = $2, body = $3
            WHERE key = $1 AND ($4::BIGINT IS NULL OR version = $4)
            "#,
        )
        .bind(&record.key)
        .bind(record.expires_at)
        .bind(&record.body)
        .bind(expected)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn remove_record(&self, key: &str, expected_version: Option<u64>) -> StorageResult<bool> {
        let expected = expected_version.map(to_db_version).transpose()?;
        let result = query("DELETE FROM cas_tickets WHERE key = $1 AND ($2::BIGINT IS NULL OR version = $2)")
            .bind(key)
            .bind(expected)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn page_records(&self, after: Option<&str>, limit: usize) -> StorageResult<Vec<TicketRecord>> {
        let limit = i64::try_from(limit).map_err(|_| StorageError::invalid_input("page limit too large"))?;
        let rows: Vec<TicketRow> = query_as(&format!(
            "{SELECT_COLUMNS} WHERE ($1::TEXT IS NULL OR key > $1) ORDER BY key LIMIT $2"
        ))
        .bind(after)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(into_record).collect()
    }

    async fn count_records(&self, kind: Option<TicketKind>) -> StorageResult<u64> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM cas_tickets WHERE ($1::TEXT IS NULL OR kind = $1)")
            .bind(kind.map(TicketKind::as_str))
            .fetch_one(self.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn to_db_version(version: u64) -> StorageResult<i64> {
    i64::try_from(version).map_err(|_| StorageError::invalid_input(format!("version {version} out of range")))
}

fn into_record(row: TicketRow) -> StorageResult<TicketRecord> {
    let (key, kind, parent_key, principal_key, version, expires_at, body) = row;
    let kind = kind
        .parse::<TicketKind>()
        .map_err(|e| StorageError::corrupt(&key, e))?;
    let version = u64::try_from(version).map_err(|_| StorageError::corrupt(&key, "negative version"))?;
    Ok(TicketRecord {
        key,
        kind,
        parent_key,
        principal_key,
        version,
        expires_at,
        body,
    })
}

#[async_trait]
impl TicketStore for PostgresTicketStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn insert(&self, record: TicketRecord) -> TicketResult<()> {
        Ok(self.insert_record(record).await?)
    }

    async fn load(&self, key: &str) -> TicketResult<Option<TicketRecord>> {
        Ok(self.load_record(key).await?)
    }

    async fn replace(&self, record: TicketRecord) -> TicketResult<bool> {
        Ok(self.update_record(&record, None).await?)
    }

    async fn compare_and_swap(&self, record: TicketRecord, expected_version: u64) -> TicketResult<bool> {
        Ok(self.update_record(&record, Some(expected_version)).await?)
    }

    async fn remove(&self, key: &str) -> TicketResult<bool> {
        Ok(self.remove_record(key, None).await?)
    }

    async fn remove_if_version(&self, key: &str, expected_version: u64) -> TicketResult<bool> {
        Ok(self.remove_record(key, Some(expected_version)).await?)
    }

    async fn remove_all(&self) -> TicketResult<u64> {
        let result = query("DELETE FROM cas_tickets")
            .execute(self.pool())
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }

    async fn page(&self, after: Option<&str>, limit: usize) -> TicketResult<Vec<TicketRecord>> {
        Ok(self.page_records(after, limit).await?)
    }

    async fn children(&self, parent_key: &str) -> TicketResult<Vec<TicketRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE parent_key = $1 ORDER BY key");
        Ok(self.fetch(&sql, parent_key).await?)
    }

    async fn find_by_principal(&self, principal_key: &str) -> TicketResult<Vec<TicketRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE principal_key = $1 ORDER BY key");
        Ok(self.fetch(&sql, principal_key).await?)
    }

    async fn count(&self, kind: Option<TicketKind>) -> TicketResult<u64> {
        Ok(self.count_records(kind).await?)
    }
}
