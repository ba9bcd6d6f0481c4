//! Ticket id generation.
//!
//! Ids have the shape `{prefix}-{counter}-{random}[-{suffix}]`. Uniqueness
//! across a cluster comes from the random part, drawn from a CSPRNG, so nodes
//! never coordinate through a shared sequence. The counter only makes ids
//! minted by one node easy to order in logs, and the optional suffix names
//! the node that minted the ticket.
//!
//! # Security Considerations
//!
//! The random part is what makes a ticket id unguessable. Keep
//! `max_length` at 20 characters or more (about 120 bits of entropy).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;

/// Strategy producing new ticket ids.
pub trait UniqueTicketIdGenerator: Send + Sync + fmt::Debug {
    /// Returns a new id starting with `prefix` followed by `-`.
    fn new_ticket_id(&self, prefix: &str) -> String;
}

/// Default random id generator.
#[derive(Debug)]
pub struct DefaultUniqueTicketIdGenerator {
    max_length: usize,
    suffix: Option<String>,
    counter: AtomicU64,
}

impl DefaultUniqueTicketIdGenerator {
    /// Default length of the random part.
    pub const DEFAULT_LENGTH: usize = 35;

    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            suffix: None,
            counter: AtomicU64::new(1),
        }
    }

    /// Appends `suffix` to every generated id.
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        self.suffix = (!suffix.is_empty()).then_some(suffix);
        self
    }

    /// Appends the short host name of this machine to every generated id.
    #[must_use]
    pub fn with_host_name_suffix(self) -> Self {
        match host_name_suffix() {
            Some(host) => self.with_suffix(host),
            None => {
                tracing::warn!("Unable to resolve host name; ticket ids will carry no node suffix");
                self
            }
        }
    }

    fn random_part(&self) -> String {
        // base64 yields 4 characters per 3 bytes
        let mut bytes = vec![0u8; self.max_length.div_ceil(4) * 3];
        rand::thread_rng().fill_bytes(&mut bytes);
        let mut encoded = URL_SAFE_NO_PAD.encode(bytes);
        encoded.truncate(self.max_length);
        encoded
    }
}

impl Default for DefaultUniqueTicketIdGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LENGTH)
    }
}

impl UniqueTicketIdGenerator for DefaultUniqueTicketIdGenerator {
    fn new_ticket_id(&self, prefix: &str) -> String {
        let number = self.counter.fetch_add(1, Ordering::Relaxed);
        let random = self.random_part();
        match &self.suffix {
            Some(suffix) => format!("{prefix}-{number}-{random}-{suffix}"),
            None => format!("{prefix}-{number}-{random}"),
        }
    }
}

/// Short host name (first DNS label) of this machine.
#[must_use]
pub fn host_name_suffix() -> Option<String> {
    let name = hostname::get().ok()?.into_string().ok()?;
    let short = name.split('.').next().unwrap_or_default().trim();
    (!short.is_empty()).then(|| short.to_string())
}
