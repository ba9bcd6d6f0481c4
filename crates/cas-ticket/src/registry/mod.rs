//! Ticket registry contract.
//!
//! The [`TicketRegistry`] is the single source of truth for ticket existence.
//! Implementations provide storage primitives; lifecycle rules that hold for
//! every backend (expiration on read, cascading deletion, enumeration) are
//! default methods on the trait.
//!
//! # Expiration on read
//!
//! [`TicketRegistry::get_ticket`] evaluates the ticket's expiration policy
//! and reports an expired ticket as absent, evicting it as a side effect.
//! Together with the periodic [`crate::cleaner::TicketRegistryCleaner`] this
//! keeps expired tickets from being observed as valid. For replicated
//! backends the guarantee is as strong as the backend's read consistency.
//!
//! # Security Considerations
//!
//! - Absent and expired tickets are indistinguishable to callers
//! - Single-use consumption goes through [`TicketRegistry::consume_ticket`],
//!   never through `get_ticket` + `update_ticket`

mod default;

pub use default::{DefaultTicketRegistry, RegistryOptions};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use time::OffsetDateTime;

use crate::TicketResult;
use crate::chain;
use crate::error::TicketError;
use crate::model::{Ticket, TicketKind, TicketVariant};

/// Upper bound on granting-chain length walked during parent verification.
const MAX_CHAIN_DEPTH: usize = 32;

/// One page of an enumeration.
#[derive(Debug, Clone, Default)]
pub struct TicketPage {
    pub tickets: Vec<Ticket>,
    /// Opaque cursor of the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

/// Mutation applied by [`TicketRegistry::update_ticket_with`].
///
/// May run several times when concurrent writers race, so it must only
/// touch the ticket it is given.
pub type TicketMutator<'a> = dyn FnMut(&mut Ticket) -> TicketResult<()> + Send + 'a;

/// Backend-agnostic ticket registry.
///
/// # Example
///
/// ```ignore
/// use cas_ticket::registry::{DefaultTicketRegistry, TicketRegistry};
///
/// let registry = DefaultTicketRegistry::new(store);
/// registry.add_ticket(&tgt).await?;
/// let found = registry.get_ticket(tgt.id()).await?;
/// ```
#[async_trait]
pub trait TicketRegistry: Send + Sync {
    /// Stores a newly minted ticket.
    ///
    /// # Errors
    ///
    /// Returns a `Registry` error if the backend fails.
    async fn add_ticket(&self, ticket: &Ticket) -> TicketResult<()>;

    /// Reads a ticket without any expiration check.
    ///
    /// Used by deletion, chaining and the cleaner. Protocol code should use
    /// [`TicketRegistry::get_ticket`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the stored ticket cannot be
    /// decoded.
    async fn get_ticket_unchecked(&self, id: &str) -> TicketResult<Option<Ticket>>;

    /// Reads a valid ticket.
    ///
    /// # Returns
    ///
    /// `None` if the ticket does not exist or is expired. Expired tickets are
    /// evicted (with their tracked descendants) before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn get_ticket(&self, id: &str) -> TicketResult<Option<Ticket>> {
        let Some(ticket) = self.get_ticket_unchecked(id).await? else {
            return Ok(None);
        };
        if self
            .is_ticket_expired(&ticket, OffsetDateTime::now_utc())
            .await?
        {
            tracing::debug!(ticket_id = %id, "Ticket is expired and will be evicted");
            if let Err(e) = self.delete_ticket(id).await {
                tracing::warn!(ticket_id = %id, error = %e, "Failed to evict expired ticket");
            }
            return Ok(None);
        }
        Ok(Some(ticket))
    }

    /// Reads a valid ticket of an expected kind.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicketClass` if the stored ticket is not accepted by
    /// `kind`, or an error if the backend fails.
    async fn get_ticket_of_kind(&self, id: &str, kind: TicketKind) -> TicketResult<Option<Ticket>> {
        match self.get_ticket(id).await? {
            Some(ticket) if !kind.accepts(ticket.kind()) => {
                Err(TicketError::kind_mismatch(id, kind, ticket.kind()))
            }
            found => Ok(found),
        }
    }

    /// Whether parent verification applies to reads.
    fn verifies_parent(&self) -> bool {
        false
    }

    /// Returns `true` if `ticket` is expired at `now`.
    ///
    /// With parent verification, a ticket whose granting chain contains a
    /// missing or expired ticket is expired as well.
    ///
    /// # Errors
    ///
    /// Returns an error if a parent lookup fails.
    async fn is_ticket_expired(&self, ticket: &Ticket, now: OffsetDateTime) -> TicketResult<bool> {
        if ticket.is_expired_at(now) {
            return Ok(true);
        }
        if !self.verifies_parent() {
            return Ok(false);
        }

        let mut next = ticket.granting_ticket_id().map(str::to_owned);
        let mut depth = 0;
        while let Some(parent_id) = next {
            depth += 1;
            if depth > MAX_CHAIN_DEPTH {
                tracing::warn!(ticket_id = %ticket.id(), "Granting chain is too deep; stopping verification");
                break;
            }
            match self.get_ticket_unchecked(&parent_id).await? {
                Some(parent) if !parent.is_expired_at(now) => {
                    next = parent.granting_ticket_id().map(str::to_owned);
                }
                _ => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Persists mutations of a registered ticket, replacing it by id.
    ///
    /// This is a last-write-wins update. Use
    /// [`TicketRegistry::update_ticket_with`] when concurrent writers matter.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if the ticket is no longer registered, or an
    /// error if the backend fails.
    async fn update_ticket(&self, ticket: &Ticket) -> TicketResult<()>;

    /// Atomically applies `mutator` to a valid ticket.
    ///
    /// # Returns
    ///
    /// The ticket as stored after the mutation.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicket` if the ticket is absent or expired, any error
    /// returned by `mutator`, or a `Registry` error when retries are exhausted.
    ///
    /// # Atomicity
    ///
    /// Optimistic: the read-modify-write is retried while the stored version
    /// changes underneath.
    async fn update_ticket_with(
        &self,
        id: &str,
        mutator: &mut TicketMutator<'_>,
    ) -> TicketResult<Ticket>;

    /// Records one use of a valid ticket and removes it once exhausted.
    ///
    /// # Returns
    ///
    /// The used ticket, or `None` if it is absent, expired or was consumed by
    /// a concurrent caller.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicketClass` if the ticket is not accepted by `kind`,
    /// or an error if the backend fails.
    ///
    /// # Atomicity
    ///
    /// For a ticket allowing `n` uses, at most `n` calls succeed in total,
    /// however many race.
    async fn consume_ticket(&self, id: &str, kind: TicketKind) -> TicketResult<Option<Ticket>>;

    /// Removes one ticket without touching its descendants.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn delete_single_ticket(&self, id: &str) -> TicketResult<bool>;

    /// Removes a ticket and every descendant it tracks.
    ///
    /// Descendants are removed before the ticket itself, so a failure part
    /// way leaves the parent in place for a later retry.
    ///
    /// # Returns
    ///
    /// The number of tickets actually removed; 0 for an unknown id.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn delete_ticket(&self, id: &str) -> TicketResult<u64> {
        let Some(ticket) = self.get_ticket_unchecked(id).await? else {
            return Ok(0);
        };
        let ids = chain::collect_descendants(self, &ticket).await?;

        let mut removed = 0;
        for ticket_id in ids.iter().rev() {
            if self.delete_single_ticket(ticket_id).await? {
                removed += 1;
            }
        }
        tracing::debug!(ticket_id = %id, removed, "Deleted ticket and descendants");
        Ok(removed)
    }

    /// Removes every ticket.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn delete_all(&self) -> TicketResult<u64>;

    /// Reads one page of tickets regardless of their expiration state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn fetch_page(&self, cursor: Option<&str>, limit: usize) -> TicketResult<TicketPage>;

    /// Page size used by [`TicketRegistry::tickets`].
    fn page_size(&self) -> usize {
        500
    }

    /// Streams every ticket, page by page, regardless of expiration state.
    fn tickets(&self) -> BoxStream<'_, TicketResult<Ticket>> {
        let page_size = self.page_size();
        stream::try_unfold(Some(None::<String>), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok(None);
            };
            let page = self.fetch_page(cursor.as_deref(), page_size).await?;
            let next = page.next_cursor.map(Some);
            let tickets = stream::iter(page.tickets.into_iter().map(Ok::<_, TicketError>));
            Ok::<_, TicketError>(Some((tickets, next)))
        })
        .try_flatten()
        .boxed()
    }

    /// Ids of every ticket whose parent is `parent_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn find_child_ticket_ids(&self, parent_id: &str) -> TicketResult<Vec<String>>;

    /// Id of the ticket that granted `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn find_granting_ticket_id(&self, id: &str) -> TicketResult<Option<String>> {
        Ok(self
            .get_ticket_unchecked(id)
            .await?
            .and_then(|ticket| ticket.granting_ticket_id().map(str::to_owned)))
    }

    /// Number of stored tickets, optionally of one kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn count_tickets(&self, kind: Option<TicketKind>) -> TicketResult<u64>;

    /// Number of stored login sessions (ticket-granting tickets).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn session_count(&self) -> TicketResult<u64> {
        self.count_tickets(Some(TicketKind::TicketGrantingTicket))
            .await
    }

    /// Number of stored service tickets.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn service_ticket_count(&self) -> TicketResult<u64> {
        self.count_tickets(Some(TicketKind::ServiceTicket)).await
    }

    /// Valid login sessions of a principal.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    async fn sessions_for(&self, principal_id: &str) -> TicketResult<Vec<Ticket>>;
}

/// Convenience queries layered on [`TicketRegistry`].
#[async_trait]
pub trait TicketRegistryExt: TicketRegistry {
    /// Reads a valid ticket as a concrete variant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicketClass` if the stored ticket is another variant.
    async fn get_ticket_as<T>(&self, id: &str) -> TicketResult<Option<T>>
    where
        T: TicketVariant + Send,
    {
        match self.get_ticket(id).await? {
            None => Ok(None),
            Some(ticket) => T::from_ticket(ticket)
                .map(Some)
                .map_err(|other| TicketError::kind_mismatch(id, T::KIND, other.kind())),
        }
    }

    /// Streams the tickets matching `predicate`.
    fn tickets_matching<'a, P>(&'a self, predicate: P) -> BoxStream<'a, TicketResult<Ticket>>
    where
        P: Fn(&Ticket) -> bool + Send + Sync + 'a,
    {
        self.tickets()
            .try_filter(move |ticket| futures_util::future::ready(predicate(ticket)))
            .boxed()
    }
}

impl<R: TicketRegistry + ?Sized> TicketRegistryExt for R {}
