//! Ticket subsystem of a CAS single sign-on server.
//!
//! This crate provides:
//! - The ticket model ([`model`]) and expiration policies ([`expiration`])
//! - Ticket id generation ([`id`]) and the ticket factory ([`factory`])
//! - Tracking of issued tickets on their granting ticket ([`tracking`])
//! - The registry contract and a store-backed registry ([`registry`], [`store`])
//! - Cascading revocation ([`chain`]) and single logout ([`logout`])
//! - The expired-ticket cleaner ([`cleaner`])
//! - Protocol-level ticket operations ([`service`])
//!
//! Storage backends live in sibling crates (`cas-ticket-memory`,
//! `cas-ticket-redis`, `cas-ticket-postgres`) and implement
//! [`store::TicketStore`].

pub mod chain;
pub mod cipher;
pub mod cleaner;
pub mod config;
pub mod error;
pub mod expiration;
pub mod factory;
pub mod id;
pub mod logout;
pub mod model;
pub mod registry;
pub mod service;
pub mod store;
pub mod tracking;

pub use config::TicketConfig;
pub use error::{ErrorCategory, TicketError};
pub use expiration::ExpirationPolicy;
pub use model::{Service, Ticket, TicketKind};
pub use registry::{DefaultTicketRegistry, TicketRegistry, TicketRegistryExt};
pub use service::{Assertion, CentralAuthenticationService};

/// Result type for ticket operations.
pub type TicketResult<T> = Result<T, TicketError>;

/// Commonly used types.
pub mod prelude {
    pub use crate::TicketResult;
    pub use crate::cipher::{AesGcmCipherExecutor, CipherExecutor, NoOpCipherExecutor};
    pub use crate::cleaner::{
        CleanupReport, CleanupStatus, LockingStrategy, NoOpLockingStrategy, TicketRegistryCleaner,
    };
    pub use crate::config::TicketConfig;
    pub use crate::error::{ErrorCategory, TicketError};
    pub use crate::expiration::ExpirationPolicy;
    pub use crate::factory::{DefaultTicketFactory, PolicySelection, TicketFactory, TicketRequest};
    pub use crate::logout::{LogoutManager, LogoutRequest, LogoutRequestStatus, SingleLogoutMessageSender};
    pub use crate::model::{
        Authentication, Principal, ProxyGrantingTicket, ProxyTicket, Service, ServiceMatching,
        ServiceTicket, Ticket, TicketGrantingTicket, TicketKind, TicketVariant,
    };
    pub use crate::registry::{DefaultTicketRegistry, TicketRegistry, TicketRegistryExt};
    pub use crate::service::{Assertion, CentralAuthenticationService};
    pub use crate::store::{DynTicketStore, TicketRecord, TicketStore};
    pub use crate::tracking::{
        DefaultTicketTrackingPolicy, NoOpTicketTrackingPolicy, TicketTrackingPolicy,
    };
}
