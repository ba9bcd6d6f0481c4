//! Ticket model.
//!
//! Tickets form a closed set of variants over a shared [`TicketState`]:
//!
//! - [`TicketGrantingTicket`] - root grant created at login
//! - [`ProxyGrantingTicket`] - granting ticket issued to a proxying service
//! - [`ServiceTicket`] - single-use ticket for one relying party
//! - [`ProxyTicket`] - ticket issued from a proxy-granting ticket
//!
//! Descendants point at their parent by id. Granting tickets keep tracking
//! entries for the tickets they issued, which drive cascading revocation and
//! single logout.

mod authentication;
mod kind;
mod service;
mod ticket;

pub use authentication::{Attributes, Authentication, Principal, REMEMBER_ME_ATTRIBUTE};
pub use kind::TicketKind;
pub use service::{Service, ServiceMatching};
pub use ticket::{
    ProxyGrantingTicket, ProxyTicket, ServiceTicket, Ticket, TicketGrantingTicket, TicketState,
    TicketVariant,
};
