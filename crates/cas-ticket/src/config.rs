//! Ticket subsystem configuration.
//!
//! Defaults follow the stock CAS server: ticket-granting tickets live at
//! most 8 hours with a 2 hour idle timeout, service and proxy tickets are
//! single-use and valid for 10 seconds.
//!
//! # Example (TOML)
//!
//! ```toml
//! [tickets.tgt]
//! max_time_to_live = "8h"
//! time_to_kill = "2h"
//!
//! [tickets.tgt.remember_me]
//! enabled = true
//! time_to_kill = "14d"
//!
//! [tickets.st]
//! number_of_uses = 1
//! time_to_kill = "10s"
//!
//! [tickets.registry.cleaner]
//! start_delay = "20s"
//! repeat_interval = "2m"
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TicketError;
use crate::expiration::ExpirationPolicy;

/// Shortest accepted length of the random part of a ticket id.
pub const MIN_ID_LENGTH: usize = 16;

/// Root ticket configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Ticket-granting tickets.
    pub tgt: TicketGrantingTicketConfig,

    /// Service tickets.
    pub st: ServiceTicketConfig,

    /// Proxy tickets.
    pub pt: ServiceTicketConfig,

    /// Proxy-granting tickets. Their expiration follows the TGT policy.
    pub pgt: ProxyGrantingTicketConfig,

    /// Tracking of issued tickets on their granting ticket.
    pub tracking: TrackingConfig,

    /// Ticket id generation.
    pub id: TicketIdConfig,

    /// Registry behaviour, cleaner and encryption.
    pub registry: RegistryConfig,

    /// Named policies selectable at ticket creation time.
    pub policies: BTreeMap<String, ExpirationPolicy>,
}

/// Ticket-granting ticket configuration.
///
/// The expiration policy is picked from the first matching rule:
///
/// 1. `max_time_to_live` and `time_to_kill` both zero: never expires
/// 2. `timeout.max_time_to_live` set: sliding timeout
/// 3. `max_time_to_live` and `time_to_kill` set: hard lifetime plus idle timeout
/// 4. `throttled` set: throttled use with idle timeout
/// 5. `hard_timeout.time_to_kill` set: hard timeout
/// 6. otherwise: always expires
///
/// With `remember_me.enabled`, remember-me logins use a hard timeout of
/// `remember_me.time_to_kill` instead.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TicketGrantingTicketConfig {
    /// Hard upper bound on a login session.
    #[serde(with = "humantime_serde")]
    pub max_time_to_live: Duration,

    /// Idle timeout of a login session.
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,

    /// Length of the random part of TGT ids.
    pub max_length: usize,

    pub remember_me: RememberMeConfig,
    pub timeout: TimeoutConfig,
    pub throttled: ThrottledConfig,
    pub hard_timeout: HardTimeoutConfig,
}

impl Default for TicketGrantingTicketConfig {
    fn default() -> Self {
        Self {
            max_time_to_live: Duration::from_secs(8 * 3600), // 8 hours
            time_to_kill: Duration::from_secs(2 * 3600),     // 2 hours
            max_length: 50,
            remember_me: RememberMeConfig::default(),
            timeout: TimeoutConfig::default(),
            throttled: ThrottledConfig::default(),
            hard_timeout: HardTimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RememberMeConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
}

impl Default for RememberMeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            time_to_kill: Duration::from_secs(14 * 24 * 3600), // 14 days
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(with = "humantime_serde")]
    pub max_time_to_live: Duration,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottledConfig {
    #[serde(with = "humantime_serde")]
    pub time_in_between_uses: Duration,
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HardTimeoutConfig {
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,
}

/// Service and proxy ticket configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceTicketConfig {
    /// Uses allowed before the ticket is consumed.
    pub number_of_uses: u32,

    /// Lifetime from creation.
    #[serde(with = "humantime_serde")]
    pub time_to_kill: Duration,

    /// Length of the random part of ticket ids.
    pub max_length: usize,
}

impl Default for ServiceTicketConfig {
    fn default() -> Self {
        Self {
            number_of_uses: 1,
            time_to_kill: Duration::from_secs(10),
            max_length: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyGrantingTicketConfig {
    pub max_length: usize,
}

impl Default for ProxyGrantingTicketConfig {
    fn default() -> Self {
        Self { max_length: 50 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Track issued tickets on their granting ticket. When disabled, logout
    /// removes the granting ticket only.
    pub enabled: bool,

    /// Keep only the newest service ticket per service.
    pub only_track_most_recent_session: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            only_track_most_recent_session: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TicketIdConfig {
    /// Fixed node suffix appended to ticket ids.
    pub suffix: Option<String>,

    /// Append the host name when no explicit suffix is configured.
    pub use_host_name: bool,
}

impl Default for TicketIdConfig {
    fn default() -> Self {
        Self {
            suffix: None,
            use_host_name: true,
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Tickets fetched per page when enumerating the registry.
    pub page_size: usize,

    /// Retries of an optimistic read-modify-write before giving up.
    pub max_update_attempts: u32,

    /// Treat a ticket as expired when its granting chain is gone or expired.
    pub verify_parent_on_read: bool,

    pub cleaner: CleanerConfig,
    pub crypto: CryptoConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_update_attempts: 16,
            verify_parent_on_read: true,
            cleaner: CleanerConfig::default(),
            crypto: CryptoConfig::default(),
        }
    }
}

/// Registry cleaner schedule and cluster lock.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanerConfig {
    pub enabled: bool,

    #[serde(with = "humantime_serde")]
    pub start_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub repeat_interval: Duration,

    /// Name of the cluster-wide cleaner lock.
    pub application_id: String,

    /// How long a lock holder may keep the lock before others may take it.
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start_delay: Duration::from_secs(20),
            repeat_interval: Duration::from_secs(120), // 2 minutes
            application_id: "cas-ticket-registry-cleaner".to_string(),
            lock_timeout: Duration::from_secs(3600), // 1 hour
        }
    }
}

/// At-rest encryption of ticket bodies.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub enabled: bool,

    /// Base64-encoded 256-bit AES key.
    pub key: Option<String>,
}

/// Errors that can occur when validating configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl From<ConfigError> for TicketError {
    fn from(err: ConfigError) -> Self {
        TicketError::configuration(err.to_string())
    }
}

impl TicketConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - a ticket id length is below [`MIN_ID_LENGTH`]
    /// - service or proxy tickets allow zero uses
    /// - the registry page size or update attempts are zero
    /// - the cleaner is enabled with a zero repeat interval
    ///
    /// Returns `ConfigError::Missing` if encryption is enabled without a key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, length) in [
            ("tgt.max_length", self.tgt.max_length),
            ("st.max_length", self.st.max_length),
            ("pt.max_length", self.pt.max_length),
            ("pgt.max_length", self.pgt.max_length),
        ] {
            if length < MIN_ID_LENGTH {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be at least {MIN_ID_LENGTH}, got {length}"
                )));
            }
        }

        if self.st.number_of_uses == 0 || self.pt.number_of_uses == 0 {
            return Err(ConfigError::InvalidValue(
                "number_of_uses must be > 0".to_string(),
            ));
        }

        if self.registry.page_size == 0 {
            return Err(ConfigError::InvalidValue(
                "registry.page_size must be > 0".to_string(),
            ));
        }

        if self.registry.max_update_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "registry.max_update_attempts must be > 0".to_string(),
            ));
        }

        if self.registry.cleaner.enabled && self.registry.cleaner.repeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "registry.cleaner.repeat_interval must be > 0".to_string(),
            ));
        }

        if self.registry.crypto.enabled
            && self.registry.crypto.key.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Missing("registry.crypto.key".to_string()));
        }

        Ok(())
    }

    /// Expiration policy of ticket-granting tickets.
    #[must_use]
    pub fn ticket_granting_ticket_policy(&self) -> ExpirationPolicy {
        let tgt = &self.tgt;
        let base = if tgt.max_time_to_live.is_zero() && tgt.time_to_kill.is_zero() {
            ExpirationPolicy::NeverExpires
        } else if !tgt.timeout.max_time_to_live.is_zero() {
            ExpirationPolicy::Timeout {
                time_to_kill: tgt.timeout.max_time_to_live,
            }
        } else if !tgt.max_time_to_live.is_zero() && !tgt.time_to_kill.is_zero() {
            ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live: tgt.max_time_to_live,
                time_to_kill: tgt.time_to_kill,
            }
        } else if !tgt.throttled.time_in_between_uses.is_zero()
            && !tgt.throttled.time_to_kill.is_zero()
        {
            ExpirationPolicy::ThrottledUseAndTimeout {
                time_to_kill: tgt.throttled.time_to_kill,
                time_in_between_uses: tgt.throttled.time_in_between_uses,
            }
        } else if !tgt.hard_timeout.time_to_kill.is_zero() {
            ExpirationPolicy::HardTimeout {
                time_to_kill: tgt.hard_timeout.time_to_kill,
            }
        } else {
            tracing::warn!("No usable ticket-granting ticket expiration settings; tickets will always expire");
            ExpirationPolicy::AlwaysExpires
        };

        if tgt.remember_me.enabled {
            ExpirationPolicy::RememberMeDelegating {
                remember_me: Box::new(ExpirationPolicy::HardTimeout {
                    time_to_kill: tgt.remember_me.time_to_kill,
                }),
                default: Box::new(base),
            }
        } else {
            base
        }
    }

    /// Expiration policy of proxy-granting tickets.
    #[must_use]
    pub fn proxy_granting_ticket_policy(&self) -> ExpirationPolicy {
        self.ticket_granting_ticket_policy()
    }

    #[must_use]
    pub fn service_ticket_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: self.st.number_of_uses,
            time_to_kill: self.st.time_to_kill,
        }
    }

    #[must_use]
    pub fn proxy_ticket_policy(&self) -> ExpirationPolicy {
        ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: self.pt.number_of_uses,
            time_to_kill: self.pt.time_to_kill,
        }
    }
}
