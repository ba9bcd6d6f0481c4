//! In-memory ticket store for the CAS ticket registry.
//!
//! Suitable for single-node deployments and tests. Combine it with
//! [`cas_ticket::DefaultTicketRegistry`] to get a full registry.
//!
//! # Example
//!
//! ```ignore
//! use cas_ticket::TicketRegistry;
//! use cas_ticket_memory::create_registry;
//!
//! let registry = create_registry();
//! registry.add_ticket(&tgt).await?;
//! ```

mod store;

use std::sync::Arc;

use cas_ticket::DefaultTicketRegistry;

pub use store::MemoryTicketStore;

/// Creates a registry over a fresh in-memory store.
#[must_use]
pub fn create_registry() -> DefaultTicketRegistry {
    DefaultTicketRegistry::new(Arc::new(MemoryTicketStore::new()))
}
