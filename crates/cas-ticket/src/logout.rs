//! Single logout.
//!
//! When a login session ends, every relying party that received a ticket from
//! it is told so through a SAML `LogoutRequest` whose `SessionIndex` is the
//! ticket id the party validated. Delivery is best-effort: a party that cannot
//! be reached does not prevent the session from being destroyed.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::TicketResult;
use crate::model::{Service, Ticket};

/// Outcome of one logout notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutRequestStatus {
    NotAttempted,
    Success,
    Failure,
}

/// One relying party to notify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutRequest {
    /// Ticket the party validated.
    pub ticket_id: String,
    pub service: Service,
    pub status: LogoutRequestStatus,
}

/// Delivers logout messages to relying parties.
#[async_trait]
pub trait SingleLogoutMessageSender: Send + Sync + fmt::Debug {
    /// Sends `message` to `request.service`.
    ///
    /// # Returns
    ///
    /// `true` if the party acknowledged the message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message could not be delivered.
    async fn send(&self, request: &LogoutRequest, message: &str) -> TicketResult<bool>;
}

/// Sender that delivers nothing and reports success.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSingleLogoutMessageSender;

#[async_trait]
impl SingleLogoutMessageSender for NoOpSingleLogoutMessageSender {
    async fn send(&self, _request: &LogoutRequest, _message: &str) -> TicketResult<bool> {
        Ok(true)
    }
}

/// Builds the SAML 2 `LogoutRequest` for one ticket.
#[must_use]
pub fn build_logout_message(ticket_id: &str) -> String {
    let issue_instant = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    format!(
        "<samlp:LogoutRequest xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\" \
         xmlns:saml=\"urn:oasis:names:tc:SAML:2.0:assertion\" ID=\"LR-{}\" Version=\"2.0\" \
         IssueInstant=\"{issue_instant}\"><saml:NameID>@NOT_USED@</saml:NameID>\
         <samlp:SessionIndex>{}</samlp:SessionIndex></samlp:LogoutRequest>",
        uuid::Uuid::new_v4(),
        escape_xml(ticket_id)
    )
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Notifies relying parties when a granting ticket is destroyed.
#[derive(Debug, Clone)]
pub struct LogoutManager {
    sender: Arc<dyn SingleLogoutMessageSender>,
    enabled: bool,
}

impl LogoutManager {
    #[must_use]
    pub fn new(sender: Arc<dyn SingleLogoutMessageSender>) -> Self {
        Self {
            sender,
            enabled: true,
        }
    }

    /// A manager that records requests without sending them.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            sender: Arc::new(NoOpSingleLogoutMessageSender),
            enabled: false,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Notifies every party tracked on `ticket`.
    ///
    /// Covers the services of the granting ticket and the proxied services of
    /// its proxy-granting tickets. Leaf tickets yield no requests.
    pub async fn perform_logout(&self, ticket: &Ticket) -> Vec<LogoutRequest> {
        let Some(grant) = ticket.as_granting() else {
            return Vec::new();
        };

        let pending = grant
            .services
            .iter()
            .chain(grant.proxy_granting_tickets.iter())
            .map(|(ticket_id, service)| LogoutRequest {
                ticket_id: ticket_id.clone(),
                service: service.clone(),
                status: LogoutRequestStatus::NotAttempted,
            });

        if !self.enabled {
            return pending.collect();
        }

        let requests = future::join_all(pending.map(|request| self.notify(request))).await;
        tracing::info!(
            ticket_id = %ticket.id(),
            notified = requests.len(),
            failed = requests
                .iter()
                .filter(|r| r.status == LogoutRequestStatus::Failure)
                .count(),
            "Performed single logout"
        );
        requests
    }

    async fn notify(&self, mut request: LogoutRequest) -> LogoutRequest {
        let message = build_logout_message(&request.ticket_id);
        request.status = match self.sender.send(&request, &message).await {
            Ok(true) => LogoutRequestStatus::Success,
            Ok(false) => {
                tracing::warn!(service = %request.service, "Logout request was not acknowledged");
                LogoutRequestStatus::Failure
            }
            Err(e) => {
                tracing::warn!(service = %request.service, error = %e, "Failed to send logout request");
                LogoutRequestStatus::Failure
            }
        };
        request
    }
}

impl Default for LogoutManager {
    fn default() -> Self {
        Self::new(Arc::new(NoOpSingleLogoutMessageSender))
    }
}
