//! Expiration policies.
//!
//! An [`ExpirationPolicy`] is a pure predicate over a ticket's lifecycle
//! state. Policies hold configuration only; timestamps and use counts live
//! on the ticket, so one policy value can be shared by every ticket of a
//! kind and evaluated identically on every registry replica.
//!
//! # Monotonicity
//!
//! For a fixed ticket state, once [`ExpirationPolicy::is_expired`] returns
//! `true` at some instant it returns `true` at every later instant. The
//! throttling window of [`ExpirationPolicy::ThrottledUseAndTimeout`] would
//! break that property, so it is exposed separately through
//! [`ExpirationPolicy::is_throttled`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::Ticket;

/// Policy deciding whether a ticket is expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpirationPolicy {
    /// Administrative policy: the ticket never expires.
    NeverExpires,

    /// The ticket is expired as soon as it exists.
    AlwaysExpires,

    /// Absolute deadline measured from creation.
    HardTimeout {
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Sliding deadline measured from the last use.
    Timeout {
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Expires after a number of uses or a deadline from creation, whichever
    /// comes first. Service and proxy tickets use this with one use.
    MultiTimeUseOrTimeout {
        number_of_uses: u32,
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Sliding deadline from the last use; consecutive uses closer than
    /// `time_in_between_uses` are throttled.
    ThrottledUseAndTimeout {
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
        #[serde(with = "humantime_serde")]
        time_in_between_uses: Duration,
    },

    /// Default ticket-granting ticket policy: hard maximum lifetime plus an
    /// idle timeout.
    TicketGrantingTicket {
        #[serde(with = "humantime_serde")]
        max_time_to_live: Duration,
        #[serde(with = "humantime_serde")]
        time_to_kill: Duration,
    },

    /// Uses `remember_me` for remember-me logins and `default` otherwise.
    RememberMeDelegating {
        remember_me: Box<ExpirationPolicy>,
        default: Box<ExpirationPolicy>,
    },

    /// Expired when any member policy is expired.
    AnyOf { policies: Vec<ExpirationPolicy> },
}

impl ExpirationPolicy {
    /// Returns `true` if `ticket` is expired at `now`.
    #[must_use]
    pub fn is_expired(&self, ticket: &Ticket, now: OffsetDateTime) -> bool {
        let state = ticket.state();
        match self {
            Self::NeverExpires => false,
            Self::AlwaysExpires => true,
            Self::HardTimeout { time_to_kill } => {
                exceeded(state.creation_time, now, *time_to_kill)
            }
            Self::Timeout { time_to_kill } => exceeded(state.last_time_used, now, *time_to_kill),
            Self::MultiTimeUseOrTimeout {
                number_of_uses,
                time_to_kill,
            } => {
                state.count_of_uses >= *number_of_uses
                    || exceeded(state.creation_time, now, *time_to_kill)
            }
            Self::ThrottledUseAndTimeout { time_to_kill, .. } => {
                exceeded(state.last_time_used, now, *time_to_kill)
            }
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => {
                exceeded(state.creation_time, now, *max_time_to_live)
                    || exceeded(state.last_time_used, now, *time_to_kill)
            }
            Self::RememberMeDelegating { .. } => self.delegate(ticket).is_expired(ticket, now),
            Self::AnyOf { policies } => policies.iter().any(|p| p.is_expired(ticket, now)),
        }
    }

    /// Returns `true` if the ticket was used too recently to be used again.
    ///
    /// Only [`ExpirationPolicy::ThrottledUseAndTimeout`] throttles; a ticket
    /// that has never been used is never throttled.
    #[must_use]
    pub fn is_throttled(&self, ticket: &Ticket, now: OffsetDateTime) -> bool {
        let state = ticket.state();
        match self {
            Self::ThrottledUseAndTimeout {
                time_in_between_uses,
                ..
            } => state.count_of_uses > 0 && !exceeded(state.last_time_used, now, *time_in_between_uses),
            Self::RememberMeDelegating { .. } => self.delegate(ticket).is_throttled(ticket, now),
            Self::AnyOf { policies } => policies.iter().any(|p| p.is_throttled(ticket, now)),
            _ => false,
        }
    }

    /// Earliest instant after which `ticket` is expired if left unused.
    ///
    /// `None` means the ticket has no deadline. Backends use this as a
    /// storage-level time-to-live; it is never the authority on validity.
    #[must_use]
    pub fn expiration_deadline(&self, ticket: &Ticket) -> Option<OffsetDateTime> {
        let state = ticket.state();
        match self {
            Self::NeverExpires => None,
            Self::AlwaysExpires => Some(state.creation_time),
            Self::HardTimeout { time_to_kill } => deadline(state.creation_time, *time_to_kill),
            Self::Timeout { time_to_kill } | Self::ThrottledUseAndTimeout { time_to_kill, .. } => {
                deadline(state.last_time_used, *time_to_kill)
            }
            Self::MultiTimeUseOrTimeout {
                number_of_uses,
                time_to_kill,
            } => {
                if state.count_of_uses >= *number_of_uses {
                    Some(state.last_time_used)
                } else {
                    deadline(state.creation_time, *time_to_kill)
                }
            }
            Self::TicketGrantingTicket {
                max_time_to_live,
                time_to_kill,
            } => earliest([
                deadline(state.creation_time, *max_time_to_live),
                deadline(state.last_time_used, *time_to_kill),
            ]),
            Self::RememberMeDelegating { .. } => self.delegate(ticket).expiration_deadline(ticket),
            Self::AnyOf { policies } => {
                earliest(policies.iter().map(|p| p.expiration_deadline(ticket)))
            }
        }
    }

    /// Short policy name for logs and admin views.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NeverExpires => "never_expires",
            Self::AlwaysExpires => "always_expires",
            Self::HardTimeout { .. } => "hard_timeout",
            Self::Timeout { .. } => "timeout",
            Self::MultiTimeUseOrTimeout { .. } => "multi_time_use_or_timeout",
            Self::ThrottledUseAndTimeout { .. } => "throttled_use_and_timeout",
            Self::TicketGrantingTicket { .. } => "ticket_granting_ticket",
            Self::RememberMeDelegating { .. } => "remember_me_delegating",
            Self::AnyOf { .. } => "any_of",
        }
    }

    fn delegate(&self, ticket: &Ticket) -> &ExpirationPolicy {
        match self {
            Self::RememberMeDelegating {
                remember_me,
                default,
            } => {
                if ticket.authentication().is_some_and(|a| a.is_remember_me()) {
                    remember_me
                } else {
                    default
                }
            }
            other => other,
        }
    }
}

fn to_time(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

fn exceeded(since: OffsetDateTime, now: OffsetDateTime, limit: Duration) -> bool {
    now - since > to_time(limit)
}

fn deadline(since: OffsetDateTime, limit: Duration) -> Option<OffsetDateTime> {
    since.checked_add(to_time(limit))
}

fn earliest(deadlines: impl IntoIterator<Item = Option<OffsetDateTime>>) -> Option<OffsetDateTime> {
    deadlines.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Authentication, Principal, Service, ServiceTicket, TicketGrantingTicket, TicketState};

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn tgt_at(policy: ExpirationPolicy, created: OffsetDateTime, remember: bool) -> Ticket {
        let mut auth = Authentication::new(Principal::new("casuser"));
        if remember {
            auth = auth.remembered();
        }
        TicketGrantingTicket::new("TGT-1", auth, policy, created).into()
    }

    fn st_at(policy: ExpirationPolicy, created: OffsetDateTime) -> Ticket {
        ServiceTicket {
            state: TicketState::new("ST-1", policy, Some("TGT-1".into()), created),
            service: Service::new("https://app.example.org"),
            from_new_login: true,
            proxy_granted: false,
        }
        .into()
    }

    fn all_policies() -> Vec<ExpirationPolicy> {
        vec![
            ExpirationPolicy::NeverExpires,
            ExpirationPolicy::AlwaysExpires,
            ExpirationPolicy::HardTimeout { time_to_kill: secs(30) },
            ExpirationPolicy::Timeout { time_to_kill: secs(20) },
            ExpirationPolicy::MultiTimeUseOrTimeout {
                number_of_uses: 2,
                time_to_kill: secs(10),
            },
            ExpirationPolicy::ThrottledUseAndTimeout {
                time_to_kill: secs(40),
                time_in_between_uses: secs(5),
            },
            ExpirationPolicy::TicketGrantingTicket {
                max_time_to_live: secs(60),
                time_to_kill: secs(15),
            },
            ExpirationPolicy::RememberMeDelegating {
                remember_me: Box::new(ExpirationPolicy::HardTimeout { time_to_kill: secs(90) }),
                default: Box::new(ExpirationPolicy::Timeout { time_to_kill: secs(5) }),
            },
            ExpirationPolicy::AnyOf {
                policies: vec![
                    ExpirationPolicy::Timeout { time_to_kill: secs(25) },
                    ExpirationPolicy::HardTimeout { time_to_kill: secs(35) },
                ],
            },
        ]
    }

    #[test]
    fn test_expiration_is_monotonic() {
        let created = OffsetDateTime::now_utc();
        for policy in all_policies() {
            for remember in [false, true] {
                let mut ticket = tgt_at(policy.clone(), created, remember);
                ticket.update(created + time::Duration::seconds(3));

                let mut seen_expired = false;
                for offset in 0..200 {
                    let now = created + time::Duration::seconds(offset);
                    let expired = policy.is_expired(&ticket, now);
                    assert!(
                        !seen_expired || expired,
                        "{} un-expired at offset {offset}",
                        policy.name()
                    );
                    seen_expired |= expired;
                }
            }
        }
    }

    #[test]
    fn test_deadline_agrees_with_expiry() {
        let created = OffsetDateTime::now_utc();
        for policy in all_policies() {
            let ticket = tgt_at(policy.clone(), created, false);
            if let Some(deadline) = policy.expiration_deadline(&ticket) {
                let after = deadline + time::Duration::milliseconds(1);
                assert!(policy.is_expired(&ticket, after), "{}", policy.name());
            }
        }
    }

    #[test]
    fn test_hard_timeout_ignores_use() {
        let created = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::HardTimeout { time_to_kill: secs(10) };
        let mut ticket = tgt_at(policy.clone(), created, false);
        ticket.update(created + time::Duration::seconds(9));

        assert!(!policy.is_expired(&ticket, created + time::Duration::seconds(10)));
        assert!(policy.is_expired(&ticket, created + time::Duration::seconds(11)));
    }

    #[test]
    fn test_timeout_slides_with_use() {
        let created = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::Timeout { time_to_kill: secs(10) };
        let mut ticket = tgt_at(policy.clone(), created, false);
        ticket.update(created + time::Duration::seconds(8));

        assert!(!policy.is_expired(&ticket, created + time::Duration::seconds(15)));
        assert!(policy.is_expired(&ticket, created + time::Duration::seconds(19)));
    }

    #[test]
    fn test_single_use_ticket_is_consumed_by_one_use() {
        let created = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::MultiTimeUseOrTimeout {
            number_of_uses: 1,
            time_to_kill: secs(10),
        };
        let mut ticket = st_at(policy.clone(), created);
        assert!(!policy.is_expired(&ticket, created));

        ticket.update(created);
        assert!(policy.is_expired(&ticket, created));
    }

    #[test]
    fn test_ticket_granting_ticket_policy() {
        let created = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::TicketGrantingTicket {
            max_time_to_live: secs(100),
            time_to_kill: secs(30),
        };
        let mut ticket = tgt_at(policy.clone(), created, false);

        assert!(policy.is_expired(&ticket, created + time::Duration::seconds(31)));

        for step in 1..=4 {
            ticket.update(created + time::Duration::seconds(step * 25));
        }
        assert!(!policy.is_expired(&ticket, created + time::Duration::seconds(100)));
        assert!(policy.is_expired(&ticket, created + time::Duration::seconds(101)));
    }

    #[test]
    fn test_throttling_is_separate_from_expiry() {
        let created = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::ThrottledUseAndTimeout {
            time_to_kill: secs(60),
            time_in_between_uses: secs(5),
        };
        let mut ticket = tgt_at(policy.clone(), created, false);
        assert!(!policy.is_throttled(&ticket, created));

        ticket.update(created + time::Duration::seconds(1));
        let soon = created + time::Duration::seconds(3);
        assert!(policy.is_throttled(&ticket, soon));
        assert!(!policy.is_expired(&ticket, soon));
        assert!(!policy.is_throttled(&ticket, created + time::Duration::seconds(7)));
    }

    #[test]
    fn test_remember_me_delegation() {
        let created = OffsetDateTime::now_utc();
        let policy = ExpirationPolicy::RememberMeDelegating {
            remember_me: Box::new(ExpirationPolicy::HardTimeout { time_to_kill: secs(1000) }),
            default: Box::new(ExpirationPolicy::HardTimeout { time_to_kill: secs(10) }),
        };
        let later = created + time::Duration::seconds(100);

        assert!(policy.is_expired(&tgt_at(policy.clone(), created, false), later));
        assert!(!policy.is_expired(&tgt_at(policy.clone(), created, true), later));
    }

    #[test]
    fn test_policy_serde_round_trip() {
        for policy in all_policies() {
            let json = serde_json::to_string(&policy).unwrap();
            let back: ExpirationPolicy = serde_json::from_str(&json).unwrap();
            assert_eq!(back, policy);
        }

        let parsed: ExpirationPolicy =
            serde_json::from_str(r#"{"type":"hard_timeout","time_to_kill":"2h"}"#).unwrap();
        assert_eq!(
            parsed,
            ExpirationPolicy::HardTimeout { time_to_kill: secs(7200) }
        );
    }
}
