//! Tracing setup with a log level that can change after startup.
//!
//! `RUST_LOG`, when set, wins over any configured level.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

static LEVEL_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

pub fn init_tracing() {
    init_tracing_with_level("info");
}

/// Installs the global subscriber filtered at `level`.
///
/// Later calls keep the first subscriber and only log at debug level.
pub fn init_tracing_with_level(level: &str) {
    let filter = if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };
    let (filter, handle) = reload::Layer::new(filter);

    match tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
    {
        Ok(()) => {
            if LEVEL_HANDLE.set(handle).is_err() {
                tracing::debug!("Log level handle was already registered");
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "Tracing is already initialized, keeping the existing subscriber");
        }
    }
}

/// Switches the active filter to `level`.
///
/// No-op when `RUST_LOG` is set or tracing was not initialized here.
pub fn apply_logging_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let Some(handle) = LEVEL_HANDLE.get() else {
        tracing::debug!(level, "No reloadable subscriber, ignoring logging level");
        return;
    };
    if let Err(e) = handle.modify(|filter| *filter = EnvFilter::new(level)) {
        tracing::warn!(error = %e, "Failed to apply logging level");
    }
}
