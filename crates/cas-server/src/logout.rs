//! Back-channel single logout over HTTP.
//!
//! Each relying party receives a form POST to its service URL with the SAML
//! `LogoutRequest` in the `logoutRequest` parameter. Delivery is best
//! effort: failures are reported, never retried.

use std::time::Duration;

use async_trait::async_trait;
use cas_ticket::logout::{LogoutRequest, SingleLogoutMessageSender};
use cas_ticket::{TicketError, TicketResult};
use url::Url;

/// Form parameter carrying the logout message.
pub const LOGOUT_PARAMETER: &str = "logoutRequest";

#[derive(Debug, Clone)]
pub struct HttpLogoutMessageSender {
    client: reqwest::Client,
}

impl HttpLogoutMessageSender {
    /// Creates a sender whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> TicketResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TicketError::configuration(format!("logout HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SingleLogoutMessageSender for HttpLogoutMessageSender {
    async fn send(&self, request: &LogoutRequest, message: &str) -> TicketResult<bool> {
        let url = match Url::parse(request.service.id()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                tracing::debug!(
                    service = %request.service.id(),
                    "Service is not an HTTP endpoint; skipping logout"
                );
                return Ok(false);
            }
        };

        match self
            .client
            .post(url)
            .form(&[(LOGOUT_PARAMETER, message)])
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                tracing::debug!(
                    service = %request.service.id(),
                    status = %response.status(),
                    "Logout endpoint rejected the request"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::debug!(
                    service = %request.service.id(),
                    error = %e,
                    "Failed to deliver logout request"
                );
                Ok(false)
            }
        }
    }
}
