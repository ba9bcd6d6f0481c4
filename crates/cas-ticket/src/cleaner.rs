//! Periodic removal of expired tickets.
//!
//! Reads already hide expired tickets; the cleaner reclaims their storage and
//! sends single logout for sessions that simply timed out. One activation is
//! one sweep: `Idle → Scanning → Done`.
//!
//! # Implementation Notes
//!
//! - Overlapping sweeps within a process are rejected
//! - A [`LockingStrategy`] keeps nodes sharing a backend from sweeping at the
//!   same time
//! - Tickets used while a sweep runs may still be removed if the policy says
//!   they are expired; the policy evaluation is authoritative

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::TicketResult;
use crate::logout::LogoutManager;
use crate::registry::TicketRegistry;

/// Guards a sweep across nodes.
#[async_trait]
pub trait LockingStrategy: Send + Sync + fmt::Debug {
    /// Tries to take the lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock backend fails.
    async fn acquire(&self) -> TicketResult<bool>;

    /// Releases a lock taken by [`LockingStrategy::acquire`].
    ///
    /// # Errors
    ///
    /// Returns an error if the lock backend fails.
    async fn release(&self) -> TicketResult<()>;
}

/// Always grants the lock. For single-node deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLockingStrategy;

#[async_trait]
impl LockingStrategy for NoOpLockingStrategy {
    async fn acquire(&self) -> TicketResult<bool> {
        Ok(true)
    }

    async fn release(&self) -> TicketResult<()> {
        Ok(())
    }
}

/// Cleaner lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanerState {
    Idle,
    Scanning,
    Done,
}

impl CleanerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Scanning,
            2 => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// How an activation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Completed,
    /// Another sweep of this cleaner was still running.
    AlreadyRunning,
    /// Another node holds the cleaner lock.
    LockUnavailable,
}

/// Result of one activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub status: CleanupStatus,
    /// Tickets enumerated.
    pub scanned: u64,
    /// Tickets found expired.
    pub expired: u64,
    /// Tickets removed, descendants included.
    pub removed: u64,
    /// Tickets or pages that could not be processed.
    pub failures: u64,
}

impl CleanupReport {
    fn new(status: CleanupStatus) -> Self {
        Self {
            status,
            scanned: 0,
            expired: 0,
            removed: 0,
            failures: 0,
        }
    }
}

/// Sweeps a registry for expired tickets.
pub struct TicketRegistryCleaner {
    registry: Arc<dyn TicketRegistry>,
    logout_manager: LogoutManager,
    locking: Arc<dyn LockingStrategy>,
    running: Mutex<()>,
    state: AtomicU8,
}

impl TicketRegistryCleaner {
    #[must_use]
    pub fn new(
        registry: Arc<dyn TicketRegistry>,
        logout_manager: LogoutManager,
        locking: Arc<dyn LockingStrategy>,
    ) -> Self {
        Self {
            registry,
            logout_manager,
            locking,
            running: Mutex::new(()),
            state: AtomicU8::new(CleanerState::Idle as u8),
        }
    }

    #[must_use]
    pub fn state(&self) -> CleanerState {
        CleanerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CleanerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Runs one sweep.
    ///
    /// Never fails: backend errors are logged and counted in the report.
    pub async fn clean(&self) -> CleanupReport {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("Ticket registry cleaner is already running");
            return CleanupReport::new(CleanupStatus::AlreadyRunning);
        };

        match self.locking.acquire().await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("Ticket registry cleaner lock is held elsewhere");
                return CleanupReport::new(CleanupStatus::LockUnavailable);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to acquire ticket registry cleaner lock");
                return CleanupReport::new(CleanupStatus::LockUnavailable);
            }
        }

        self.set_state(CleanerState::Scanning);
        let report = self.sweep().await;
        if let Err(e) = self.locking.release().await {
            tracing::warn!(error = %e, "Failed to release ticket registry cleaner lock");
        }
        self.set_state(CleanerState::Done);

        tracing::info!(
            scanned = report.scanned,
            expired = report.expired,
            removed = report.removed,
            failures = report.failures,
            "Ticket registry cleanup finished"
        );
        report
    }

    async fn sweep(&self) -> CleanupReport {
        let now = OffsetDateTime::now_utc();
        let mut report = CleanupReport::new(CleanupStatus::Completed);
        let mut tickets = self.registry.tickets();

        while let Some(item) = tickets.next().await {
            let ticket = match item {
                Ok(ticket) => ticket,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read tickets during cleanup");
                    report.failures += 1;
                    continue;
                }
            };
            report.scanned += 1;

            match self.registry.is_ticket_expired(&ticket, now).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(ticket_id = %ticket.id(), error = %e, "Failed to evaluate ticket expiration");
                    report.failures += 1;
                    continue;
                }
            }
            report.expired += 1;

            if ticket.kind().is_granting() {
                self.logout_manager.perform_logout(&ticket).await;
            }
            match self.registry.delete_ticket(ticket.id()).await {
                Ok(removed) => report.removed += removed,
                Err(e) => {
                    tracing::warn!(ticket_id = %ticket.id(), error = %e, "Failed to remove expired ticket");
                    report.failures += 1;
                }
            }
        }

        report
    }

    /// Schedules sweeps on the tokio runtime.
    ///
    /// The first sweep runs after `start_delay`, later ones every
    /// `repeat_interval`.
    pub fn start(self: Arc<Self>, start_delay: Duration, repeat_interval: Duration) -> JoinHandle<()> {
        let period = repeat_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            tokio::time::sleep(start_delay).await;
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let report = self.clean().await;
                if report.status != CleanupStatus::Completed {
                    tracing::debug!(status = ?report.status, "Scheduled ticket cleanup skipped");
                }
            }
        })
    }
}

impl fmt::Debug for TicketRegistryCleaner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketRegistryCleaner")
            .field("state", &self.state())
            .field("locking", &self.locking)
            .finish_non_exhaustive()
    }
}
