use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{Authentication, Service, TicketKind};
use crate::expiration::ExpirationPolicy;

/// Lifecycle state shared by every ticket kind.
///
/// Validity is never stored here: it is computed from these timestamps and
/// the expiration policy each time the ticket is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketState {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub creation_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_time_used: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub previous_time_used: Option<OffsetDateTime>,
    pub count_of_uses: u32,
    pub expiration_policy: ExpirationPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granting_ticket_id: Option<String>,
}

impl TicketState {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        expiration_policy: ExpirationPolicy,
        granting_ticket_id: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            creation_time: now,
            last_time_used: now,
            previous_time_used: None,
            count_of_uses: 0,
            expiration_policy,
            granting_ticket_id,
        }
    }

    /// Records one use of the ticket at `now`.
    pub fn update(&mut self, now: OffsetDateTime) {
        self.previous_time_used = Some(self.last_time_used);
        self.last_time_used = now;
        self.count_of_uses = self.count_of_uses.saturating_add(1);
    }
}

/// Root grant issued after primary authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketGrantingTicket {
    pub state: TicketState,
    pub authentication: Authentication,
    /// Tracked descendant ticket id → service it was issued for.
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
    /// Tracked proxy-granting ticket id → service that was proxied.
    #[serde(default)]
    pub proxy_granting_tickets: BTreeMap<String, Service>,
}

impl TicketGrantingTicket {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        now: OffsetDateTime,
    ) -> Self {
        Self::with_parent(id, authentication, expiration_policy, None, now)
    }

    pub(crate) fn with_parent(
        id: impl Into<String>,
        authentication: Authentication,
        expiration_policy: ExpirationPolicy,
        granting_ticket_id: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            state: TicketState::new(id, expiration_policy, granting_ticket_id, now),
            authentication,
            services: BTreeMap::new(),
            proxy_granting_tickets: BTreeMap::new(),
        }
    }

    /// Ids of every ticket tracked by this granting ticket.
    pub fn tracked_ticket_ids(&self) -> impl Iterator<Item = &str> {
        self.services
            .keys()
            .chain(self.proxy_granting_tickets.keys())
            .map(String::as_str)
    }
}

/// Granting ticket issued to a proxying service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyGrantingTicket {
    pub grant: TicketGrantingTicket,
    pub proxied_by: Service,
}

/// Single-use ticket presented by a relying party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTicket {
    pub state: TicketState,
    pub service: Service,
    pub from_new_login: bool,
    /// Set once the ticket has been exchanged for a proxy-granting ticket.
    #[serde(default)]
    pub proxy_granted: bool,
}

/// Ticket issued from a proxy-granting ticket for a backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTicket {
    pub state: TicketState,
    pub service: Service,
    pub from_new_login: bool,
    #[serde(default)]
    pub proxy_granted: bool,
}

/// A ticket of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Ticket {
    TicketGrantingTicket(TicketGrantingTicket),
    ProxyGrantingTicket(ProxyGrantingTicket),
    ServiceTicket(ServiceTicket),
    ProxyTicket(ProxyTicket),
}

impl Ticket {
    #[must_use]
    pub fn kind(&self) -> TicketKind {
        match self {
            Self::TicketGrantingTicket(_) => TicketKind::TicketGrantingTicket,
            Self::ProxyGrantingTicket(_) => TicketKind::ProxyGrantingTicket,
            Self::ServiceTicket(_) => TicketKind::ServiceTicket,
            Self::ProxyTicket(_) => TicketKind::ProxyTicket,
        }
    }

    #[must_use]
    pub fn state(&self) -> &TicketState {
        match self {
            Self::TicketGrantingTicket(t) => &t.state,
            Self::ProxyGrantingTicket(t) => &t.grant.state,
            Self::ServiceTicket(t) => &t.state,
            Self::ProxyTicket(t) => &t.state,
        }
    }

    pub fn state_mut(&mut self) -> &mut TicketState {
        match self {
            Self::TicketGrantingTicket(t) => &mut t.state,
            Self::ProxyGrantingTicket(t) => &mut t.grant.state,
            Self::ServiceTicket(t) => &mut t.state,
            Self::ProxyTicket(t) => &mut t.state,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.state().id
    }

    #[must_use]
    pub fn granting_ticket_id(&self) -> Option<&str> {
        self.state().granting_ticket_id.as_deref()
    }

    #[must_use]
    pub fn expiration_policy(&self) -> &ExpirationPolicy {
        &self.state().expiration_policy
    }

    #[must_use]
    pub fn creation_time(&self) -> OffsetDateTime {
        self.state().creation_time
    }

    #[must_use]
    pub fn count_of_uses(&self) -> u32 {
        self.state().count_of_uses
    }

    /// Returns `true` for a login ticket that has no parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.granting_ticket_id().is_none()
    }

    /// Records one use of the ticket at `now`.
    pub fn update(&mut self, now: OffsetDateTime) {
        self.state_mut().update(now);
    }

    /// Evaluates the ticket's own expiration policy at `now`.
    ///
    /// The state of the granting chain is not considered; the registry does
    /// that when parent verification is enabled.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expiration_policy().is_expired(self, now)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Granting payload of a TGT or PGT.
    #[must_use]
    pub fn as_granting(&self) -> Option<&TicketGrantingTicket> {
        match self {
            Self::TicketGrantingTicket(t) => Some(t),
            Self::ProxyGrantingTicket(t) => Some(&t.grant),
            _ => None,
        }
    }

    pub fn as_granting_mut(&mut self) -> Option<&mut TicketGrantingTicket> {
        match self {
            Self::TicketGrantingTicket(t) => Some(t),
            Self::ProxyGrantingTicket(t) => Some(&mut t.grant),
            _ => None,
        }
    }

    /// Authentication carried by granting tickets.
    #[must_use]
    pub fn authentication(&self) -> Option<&Authentication> {
        self.as_granting().map(|t| &t.authentication)
    }

    /// Service a ST or PT was issued for, or the proxied service of a PGT.
    #[must_use]
    pub fn service(&self) -> Option<&Service> {
        match self {
            Self::TicketGrantingTicket(_) => None,
            Self::ProxyGrantingTicket(t) => Some(&t.proxied_by),
            Self::ServiceTicket(t) => Some(&t.service),
            Self::ProxyTicket(t) => Some(&t.service),
        }
    }

    /// Whether a ST or PT was issued from a fresh credential presentation.
    #[must_use]
    pub fn from_new_login(&self) -> bool {
        match self {
            Self::ServiceTicket(t) => t.from_new_login,
            Self::ProxyTicket(t) => t.from_new_login,
            _ => false,
        }
    }

    /// Ids of every ticket tracked by a granting ticket; empty for leaves.
    #[must_use]
    pub fn tracked_ticket_ids(&self) -> Vec<String> {
        self.as_granting()
            .map(|t| t.tracked_ticket_ids().map(str::to_owned).collect())
            .unwrap_or_default()
    }
}

/// A concrete ticket struct that can be extracted from a [`Ticket`].
pub trait TicketVariant: Sized {
    const KIND: TicketKind;

    /// Unwraps the variant, handing the ticket back on mismatch.
    fn from_ticket(ticket: Ticket) -> Result<Self, Ticket>;
}

macro_rules! ticket_variant {
    ($ty:ident) => {
        impl TicketVariant for $ty {
            const KIND: TicketKind = TicketKind::$ty;

            fn from_ticket(ticket: Ticket) -> Result<Self, Ticket> {
                match ticket {
                    Ticket::$ty(t) => Ok(t),
                    other => Err(other),
                }
            }
        }

        impl From<$ty> for Ticket {
            fn from(t: $ty) -> Self {
                Ticket::$ty(t)
            }
        }
    };
}

ticket_variant!(TicketGrantingTicket);
ticket_variant!(ProxyGrantingTicket);
ticket_variant!(ServiceTicket);
ticket_variant!(ProxyTicket);
