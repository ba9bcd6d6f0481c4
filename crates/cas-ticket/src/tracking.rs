//! Ticket tracking policies.
//!
//! A granting ticket records the tickets it issued so that logout can notify
//! relying parties and revoke descendants. Tracking entries live inside the
//! granting ticket itself, so the caller must persist the owner after
//! tracking (normally within the same read-modify-write).

use std::fmt;

use crate::model::{Ticket, TicketKind};

/// Records a newly minted ticket on the granting ticket that issued it.
pub trait TicketTrackingPolicy: Send + Sync + fmt::Debug {
    /// Tracks `ticket` on `owner`. Owners that cannot track are left as-is.
    fn track_ticket(&self, owner: &mut Ticket, ticket: &Ticket);

    /// Number of tickets tracked on `owner`.
    fn count_tracked(&self, owner: &Ticket) -> usize {
        owner.tracked_ticket_ids().len()
    }
}

/// Tracks service/proxy tickets under `services` and proxy-granting tickets
/// under `proxy_granting_tickets`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultTicketTrackingPolicy {
    /// Keep only the newest ticket per service (after normalizing the service
    /// id), replacing older entries.
    pub only_track_most_recent_session: bool,
}

impl DefaultTicketTrackingPolicy {
    #[must_use]
    pub fn new(only_track_most_recent_session: bool) -> Self {
        Self {
            only_track_most_recent_session,
        }
    }
}

impl Default for DefaultTicketTrackingPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TicketTrackingPolicy for DefaultTicketTrackingPolicy {
    fn track_ticket(&self, owner: &mut Ticket, ticket: &Ticket) {
        let owner_id = owner.id().to_string();
        let Some(grant) = owner.as_granting_mut() else {
            tracing::debug!(owner = %owner_id, "Ticket owner cannot track descendants");
            return;
        };
        let Some(service) = ticket.service().cloned() else {
            return;
        };

        match ticket.kind() {
            TicketKind::ProxyGrantingTicket => {
                grant
                    .proxy_granting_tickets
                    .insert(ticket.id().to_string(), service);
            }
            TicketKind::ServiceTicket | TicketKind::ProxyTicket => {
                if self.only_track_most_recent_session {
                    grant.services.retain(|_, tracked| !tracked.matches(&service));
                }
                grant.services.insert(ticket.id().to_string(), service);
            }
            TicketKind::TicketGrantingTicket => {}
        }
    }
}

/// Tracks nothing; cascading revocation then removes the granting ticket only
/// and descendants expire on their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoOpTicketTrackingPolicy;

impl TicketTrackingPolicy for NoOpTicketTrackingPolicy {
    fn track_ticket(&self, _owner: &mut Ticket, _ticket: &Ticket) {}
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::expiration::ExpirationPolicy;
    use crate::model::{
        Authentication, Principal, ProxyGrantingTicket, Service, ServiceTicket,
        TicketGrantingTicket, TicketState,
    };

    fn tgt() -> Ticket {
        TicketGrantingTicket::new(
            "TGT-1",
            Authentication::new(Principal::new("casuser")),
            ExpirationPolicy::NeverExpires,
            OffsetDateTime::now_utc(),
        )
        .into()
    }

    fn st(id: &str, service: &str) -> Ticket {
        ServiceTicket {
            state: TicketState::new(
                id,
                ExpirationPolicy::NeverExpires,
                Some("TGT-1".into()),
                OffsetDateTime::now_utc(),
            ),
            service: Service::new(service),
            from_new_login: false,
            proxy_granted: false,
        }
        .into()
    }

    fn services(owner: &Ticket) -> Vec<String> {
        owner
            .as_granting()
            .map(|g| g.services.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_most_recent_session_replaces_similar_service() {
        let policy = DefaultTicketTrackingPolicy::new(true);
        let mut owner = tgt();
        policy.track_ticket(&mut owner, &st("ST-1", "http://host.com?test"));
        policy.track_ticket(&mut owner, &st("ST-2", "http://host.com;JSESSIONID=xxx"));
        assert_eq!(services(&owner), vec!["ST-2"]);
    }

    #[test]
    fn test_most_recent_session_keeps_different_paths() {
        let policy = DefaultTicketTrackingPolicy::new(true);
        let mut owner = tgt();
        policy.track_ticket(&mut owner, &st("ST-1", "http://host.com/webapp1"));
        policy.track_ticket(&mut owner, &st("ST-2", "http://host.com/webapp1?test=true"));
        policy.track_ticket(&mut owner, &st("ST-3", "http://host.com/webapp2"));
        assert_eq!(services(&owner), vec!["ST-2", "ST-3"]);
    }

    #[test]
    fn test_all_sessions_tracked_when_disabled() {
        let policy = DefaultTicketTrackingPolicy::new(false);
        let mut owner = tgt();
        policy.track_ticket(&mut owner, &st("ST-1", "http://host.com?test"));
        policy.track_ticket(&mut owner, &st("ST-2", "http://host.com;JSESSIONID=xxx"));
        assert_eq!(policy.count_tracked(&owner), 2);
    }

    #[test]
    fn test_proxy_granting_ticket_is_tracked_separately() {
        let policy = DefaultTicketTrackingPolicy::default();
        let mut owner = tgt();
        let pgt: Ticket = ProxyGrantingTicket {
            grant: TicketGrantingTicket::with_parent(
                "PGT-1",
                Authentication::new(Principal::new("https://proxy.example.org")),
                ExpirationPolicy::NeverExpires,
                Some("TGT-1".into()),
                OffsetDateTime::now_utc(),
            ),
            proxied_by: Service::new("https://proxy.example.org"),
        }
        .into();
        policy.track_ticket(&mut owner, &pgt);

        let grant = owner.as_granting().unwrap();
        assert!(grant.services.is_empty());
        assert!(grant.proxy_granting_tickets.contains_key("PGT-1"));
    }

    #[test]
    fn test_noop_tracks_nothing() {
        let mut owner = tgt();
        NoOpTicketTrackingPolicy.track_ticket(&mut owner, &st("ST-1", "https://app"));
        assert_eq!(NoOpTicketTrackingPolicy.count_tracked(&owner), 0);
    }

    #[test]
    fn test_leaf_owner_is_ignored() {
        let mut owner = st("ST-9", "https://app");
        DefaultTicketTrackingPolicy::default().track_ticket(&mut owner, &st("ST-1", "https://app"));
        assert!(owner.tracked_ticket_ids().is_empty());
    }
}
