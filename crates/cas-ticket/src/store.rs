//! Backend storage SPI.
//!
//! A [`TicketStore`] persists opaque [`TicketRecord`]s. It knows nothing about
//! expiration, tracking or encryption; [`crate::registry::DefaultTicketRegistry`]
//! layers those on top. Implementations exist for memory (`cas-ticket-memory`),
//! Redis (`cas-ticket-redis`) and PostgreSQL (`cas-ticket-postgres`).
//!
//! # Implementation Notes
//!
//! Implementations must:
//!
//! - Assign versions themselves: `insert` stores version 1, every successful
//!   `replace` or `compare_and_swap` stores the previous version plus one
//! - Make `compare_and_swap` and `remove_if_version` atomic per key. The
//!   single-use guarantee for service tickets rests on these two operations
//! - Keep `children` and `find_by_principal` consistent with stored records
//! - Return `page` results ordered by key, strictly after the cursor
//!
//! # Atomicity
//!
//! No operation spans more than one key atomically. Cascading deletes are a
//! sequence of single-key removals driven by the registry.

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::TicketResult;
use crate::model::TicketKind;

/// One stored ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRecord {
    /// Lookup key: the ticket id, or its digest when encryption is enabled.
    pub key: String,
    pub kind: TicketKind,
    /// Key of the granting ticket.
    pub parent_key: Option<String>,
    /// Key of the principal, set on granting tickets.
    pub principal_key: Option<String>,
    /// Store-assigned version, starting at 1.
    pub version: u64,
    /// Instant after which the ticket is certainly expired if unused.
    pub expires_at: Option<OffsetDateTime>,
    /// Serialized (and possibly encrypted) ticket.
    pub body: Vec<u8>,
}

/// Storage backend for ticket records.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Stores a record, replacing any record under the same key.
    ///
    /// The stored version is 1 regardless of `record.version`.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn insert(&self, record: TicketRecord) -> TicketResult<()>;

    /// Loads a record by key.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn load(&self, key: &str) -> TicketResult<Option<TicketRecord>>;

    /// Replaces an existing record, bumping its version.
    ///
    /// # Returns
    ///
    /// `false` if no record exists under the key; nothing is stored then.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn replace(&self, record: TicketRecord) -> TicketResult<bool>;

    /// Replaces the record only if its current version is `expected_version`.
    ///
    /// # Returns
    ///
    /// `true` if the record was replaced and now has version
    /// `expected_version + 1`.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn compare_and_swap(&self, record: TicketRecord, expected_version: u64) -> TicketResult<bool>;

    /// Removes a record.
    ///
    /// # Returns
    ///
    /// `true` if a record was removed.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn remove(&self, key: &str) -> TicketResult<bool>;

    /// Removes the record only if its current version is `expected_version`.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn remove_if_version(&self, key: &str, expected_version: u64) -> TicketResult<bool>;

    /// Removes every record and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn remove_all(&self) -> TicketResult<u64>;

    /// Returns up to `limit` records with keys greater than `after`, ordered
    /// by key.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn page(&self, after: Option<&str>, limit: usize) -> TicketResult<Vec<TicketRecord>>;

    /// Records whose `parent_key` equals `parent_key`.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn children(&self, parent_key: &str) -> TicketResult<Vec<TicketRecord>>;

    /// Records whose `principal_key` equals `principal_key`.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn find_by_principal(&self, principal_key: &str) -> TicketResult<Vec<TicketRecord>>;

    /// Number of records, optionally restricted to one kind.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn count(&self, kind: Option<TicketKind>) -> TicketResult<u64>;
}

/// Shared, type-erased ticket store.
pub type DynTicketStore = Arc<dyn TicketStore>;
