use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Runtime discriminator of a ticket.
///
/// Every ticket id starts with the prefix of its kind followed by `-`, which
/// lets a backend route a lookup without decoding the ticket body. The prefix
/// carries no security meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TicketKind {
    TicketGrantingTicket,
    ProxyGrantingTicket,
    ServiceTicket,
    ProxyTicket,
}

impl TicketKind {
    /// All ticket kinds, roots first.
    pub const ALL: [TicketKind; 4] = [
        TicketKind::TicketGrantingTicket,
        TicketKind::ProxyGrantingTicket,
        TicketKind::ServiceTicket,
        TicketKind::ProxyTicket,
    ];

    /// Id prefix for this kind.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::TicketGrantingTicket => "TGT",
            Self::ProxyGrantingTicket => "PGT",
            Self::ServiceTicket => "ST",
            Self::ProxyTicket => "PT",
        }
    }

    /// Stable name, also used as the persisted kind column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TicketGrantingTicket => "TicketGrantingTicket",
            Self::ProxyGrantingTicket => "ProxyGrantingTicket",
            Self::ServiceTicket => "ServiceTicket",
            Self::ProxyTicket => "ProxyTicket",
        }
    }

    #[must_use]
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }

    /// Infers the kind from a ticket id such as `ST-12-abcdef`.
    #[must_use]
    pub fn from_ticket_id(id: &str) -> Option<Self> {
        let (prefix, _) = id.split_once('-')?;
        Self::from_prefix(prefix)
    }

    /// Returns `true` if a ticket of kind `actual` may be used where `self`
    /// is expected.
    ///
    /// A proxy-granting ticket is a ticket-granting ticket, and a proxy
    /// ticket is a service ticket.
    #[must_use]
    pub fn accepts(self, actual: TicketKind) -> bool {
        self == actual
            || matches!(
                (self, actual),
                (Self::TicketGrantingTicket, Self::ProxyGrantingTicket)
                    | (Self::ServiceTicket, Self::ProxyTicket)
            )
    }

    /// Returns `true` for kinds that can issue descendant tickets.
    #[must_use]
    pub fn is_granting(self) -> bool {
        matches!(self, Self::TicketGrantingTicket | Self::ProxyGrantingTicket)
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s || kind.prefix() == s)
            .ok_or_else(|| format!("unknown ticket kind '{s}'"))
    }
}
