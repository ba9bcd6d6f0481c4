//! Registry over a [`TicketStore`].

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{TicketMutator, TicketPage, TicketRegistry};
use crate::TicketResult;
use crate::cipher::{AesGcmCipherExecutor, CipherExecutor, NoOpCipherExecutor, digest};
use crate::config::{RegistryConfig, TicketConfig};
use crate::error::TicketError;
use crate::model::{Ticket, TicketKind};
use crate::store::{DynTicketStore, TicketRecord};

/// Tunables of [`DefaultTicketRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub page_size: usize,
    pub max_update_attempts: u32,
    pub verify_parent_on_read: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_update_attempts: 16,
            verify_parent_on_read: true,
        }
    }
}

impl From<&RegistryConfig> for RegistryOptions {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            max_update_attempts: config.max_update_attempts.max(1),
            verify_parent_on_read: config.verify_parent_on_read,
        }
    }
}

/// Ticket registry storing serialized tickets in a [`TicketStore`].
///
/// Bodies pass through a [`CipherExecutor`]; with an enabled executor every
/// lookup key is digested as well. Conditional updates use the store's
/// record versions.
///
/// [`TicketStore`]: crate::store::TicketStore
pub struct DefaultTicketRegistry {
    store: DynTicketStore,
    cipher: Arc<dyn CipherExecutor>,
    options: RegistryOptions,
}

impl DefaultTicketRegistry {
    #[must_use]
    pub fn new(store: DynTicketStore) -> Self {
        Self {
            store,
            cipher: Arc::new(NoOpCipherExecutor),
            options: RegistryOptions::default(),
        }
    }

    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn CipherExecutor>) -> Self {
        self.cipher = cipher;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RegistryOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds a registry from the `registry` section of the configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Cipher` error if encryption is enabled with a missing or
    /// malformed key.
    pub fn from_config(store: DynTicketStore, config: &TicketConfig) -> TicketResult<Self> {
        let registry = Self::new(store).with_options(RegistryOptions::from(&config.registry));
        let crypto = &config.registry.crypto;
        if !crypto.enabled {
            return Ok(registry);
        }
        let key = crypto
            .key
            .as_deref()
            .ok_or_else(|| TicketError::cipher("registry encryption is enabled without a key"))?;
        Ok(registry.with_cipher(Arc::new(AesGcmCipherExecutor::from_base64_key(key)?)))
    }

    /// The underlying store.
    pub fn store(&self) -> &DynTicketStore {
        &self.store
    }

    fn key_for(&self, value: &str) -> String {
        if self.cipher.is_enabled() {
            digest(value)
        } else {
            value.to_owned()
        }
    }

    fn encode(&self, ticket: &Ticket) -> TicketResult<TicketRecord> {
        let body = self.cipher.encode(&serde_json::to_vec(ticket)?)?;
        let principal_key = match ticket {
            Ticket::TicketGrantingTicket(tgt) => {
                Some(self.key_for(&tgt.authentication.principal.id))
            }
            _ => None,
        };
        Ok(TicketRecord {
            key: self.key_for(ticket.id()),
            kind: ticket.kind(),
            parent_key: ticket.granting_ticket_id().map(|id| self.key_for(id)),
            principal_key,
            version: 0,
            expires_at: ticket.expiration_policy().expiration_deadline(ticket),
            body,
        })
    }

    fn decode(&self, record: &TicketRecord) -> TicketResult<Ticket> {
        let plain = self.cipher.decode(&record.body)?;
        Ok(serde_json::from_slice(&plain)?)
    }

    async fn evict(&self, id: &str) {
        if let Err(e) = self.delete_ticket(id).await {
            tracing::warn!(ticket_id = %id, error = %e, "Failed to evict expired ticket");
        }
    }

    /// Drops an undecodable record once its recorded deadline has passed.
    async fn reclaim(&self, record: &TicketRecord) {
        match self.store.remove_if_version(&record.key, record.version).await {
            Ok(true) => {
                tracing::info!(key = %record.key, "Reclaimed expired undecodable ticket record");
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(key = %record.key, error = %e, "Failed to reclaim undecodable ticket record");
            }
        }
    }

    fn contention_error(&self, id: &str) -> TicketError {
        TicketError::registry(format!(
            "ticket [{id}] changed concurrently {} times; giving up",
            self.options.max_update_attempts
        ))
    }
}

#[async_trait]
impl TicketRegistry for DefaultTicketRegistry {
    async fn add_ticket(&self, ticket: &Ticket) -> TicketResult<()> {
        let record = self.encode(ticket)?;
        self.store.insert(record).await?;
        tracing::debug!(
            ticket_id = %ticket.id(),
            kind = %ticket.kind(),
            store = self.store.name(),
            "Added ticket"
        );
        Ok(())
    }

    async fn get_ticket_unchecked(&self, id: &str) -> TicketResult<Option<Ticket>> {
        match self.store.load(&self.key_for(id)).await? {
            Some(record) => self.decode(&record).map(Some),
            None => Ok(None),
        }
    }

    fn verifies_parent(&self) -> bool {
        self.options.verify_parent_on_read
    }

    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<()> {
        let record = self.encode(ticket)?;
        if self.store.replace(record).await? {
            Ok(())
        } else {
            Err(TicketError::invalid_ticket(ticket.id()))
        }
    }

    async fn update_ticket_with(
        &self,
        id: &str,
        mutator: &mut TicketMutator<'_>,
    ) -> TicketResult<Ticket> {
        let key = self.key_for(id);
        for attempt in 1..=self.options.max_update_attempts {
            let Some(record) = self.store.load(&key).await? else {
                return Err(TicketError::invalid_ticket(id));
            };
            let mut ticket = self.decode(&record)?;
            if self
                .is_ticket_expired(&ticket, OffsetDateTime::now_utc())
                .await?
            {
                self.evict(id).await;
                return Err(TicketError::invalid_ticket(id));
            }

            mutator(&mut ticket)?;
            if ticket.id() != id {
                return Err(TicketError::validation("ticket id cannot change on update"));
            }

            if self
                .store
                .compare_and_swap(self.encode(&ticket)?, record.version)
                .await?
            {
                return Ok(ticket);
            }
            tracing::debug!(ticket_id = %id, attempt, "Concurrent ticket update, retrying");
        }
        Err(self.contention_error(id))
    }

    async fn consume_ticket(&self, id: &str, kind: TicketKind) -> TicketResult<Option<Ticket>> {
        let key = self.key_for(id);
        for attempt in 1..=self.options.max_update_attempts {
            let Some(record) = self.store.load(&key).await? else {
                return Ok(None);
            };
            let mut ticket = self.decode(&record)?;
            if !kind.accepts(ticket.kind()) {
                return Err(TicketError::kind_mismatch(id, kind, ticket.kind()));
            }

            let now = OffsetDateTime::now_utc();
            if self.is_ticket_expired(&ticket, now).await? {
                self.evict(id).await;
                return Ok(None);
            }

            ticket.update(now);
            let won = if ticket.is_expired_at(now) {
                self.store.remove_if_version(&key, record.version).await?
            } else {
                self.store
                    .compare_and_swap(self.encode(&ticket)?, record.version)
                    .await?
            };
            if won {
                tracing::debug!(ticket_id = %id, uses = ticket.count_of_uses(), "Consumed ticket");
                return Ok(Some(ticket));
            }
            tracing::debug!(ticket_id = %id, attempt, "Lost ticket consumption race, retrying");
        }
        Err(self.contention_error(id))
    }

    async fn delete_single_ticket(&self, id: &str) -> TicketResult<bool> {
        self.store.remove(&self.key_for(id)).await
    }

    async fn delete_all(&self) -> TicketResult<u64> {
        let removed = self.store.remove_all().await?;
        tracing::info!(removed, store = self.store.name(), "Deleted all tickets");
        Ok(removed)
    }

    async fn fetch_page(&self, cursor: Option<&str>, limit: usize) -> TicketResult<TicketPage> {
        let limit = limit.max(1);
        let records = self.store.page(cursor, limit).await?;
        let next_cursor = if records.len() == limit {
            records.last().map(|r| r.key.clone())
        } else {
            None
        };

        let now = OffsetDateTime::now_utc();
        let mut tickets = Vec::with_capacity(records.len());
        for record in &records {
            match self.decode(record) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    tracing::warn!(key = %record.key, error = %e, "Skipping undecodable ticket record");
                    if record.expires_at.is_some_and(|at| at <= now) {
                        self.reclaim(record).await;
                    }
                }
            }
        }
        Ok(TicketPage {
            tickets,
            next_cursor,
        })
    }

    fn page_size(&self) -> usize {
        self.options.page_size
    }

    async fn find_child_ticket_ids(&self, parent_id: &str) -> TicketResult<Vec<String>> {
        let records = self.store.children(&self.key_for(parent_id)).await?;
        records
            .iter()
            .map(|record| self.decode(record).map(|t| t.id().to_owned()))
            .collect()
    }

    async fn count_tickets(&self, kind: Option<TicketKind>) -> TicketResult<u64> {
        self.store.count(kind).await
    }

    async fn sessions_for(&self, principal_id: &str) -> TicketResult<Vec<Ticket>> {
        let now = OffsetDateTime::now_utc();
        let records = self
            .store
            .find_by_principal(&self.key_for(principal_id))
            .await?;

        let mut sessions = Vec::with_capacity(records.len());
        for record in &records {
            let ticket = self.decode(record)?;
            if ticket.kind() == TicketKind::TicketGrantingTicket && !ticket.is_expired_at(now) {
                sessions.push(ticket);
            }
        }
        Ok(sessions)
    }
}
