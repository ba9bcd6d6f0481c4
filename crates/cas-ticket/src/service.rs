//! Ticket operations of the CAS protocol.
//!
//! [`CentralAuthenticationService`] combines the factory, the tracking policy,
//! the registry and the logout manager into the operations protocol endpoints
//! call: log in, grant tickets, validate them and log out.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::TicketResult;
use crate::chain;
use crate::error::TicketError;
use crate::factory::{TicketFactory, TicketRequest};
use crate::logout::{LogoutManager, LogoutRequest};
use crate::model::{Authentication, Service, ServiceMatching, Ticket, TicketKind};
use crate::registry::TicketRegistry;
use crate::tracking::{DefaultTicketTrackingPolicy, TicketTrackingPolicy};

/// Outcome of a successful ticket validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assertion {
    /// Authentication of the root login session.
    pub primary_authentication: Authentication,
    /// Authentications along the granting chain, closest granting ticket
    /// first and the root last.
    pub chained_authentications: Vec<Authentication>,
    pub service: Service,
    pub from_new_login: bool,
}

pub struct CentralAuthenticationService {
    registry: Arc<dyn TicketRegistry>,
    factory: Arc<dyn TicketFactory>,
    tracking: Arc<dyn TicketTrackingPolicy>,
    logout_manager: LogoutManager,
    service_matching: ServiceMatching,
}

impl CentralAuthenticationService {
    #[must_use]
    pub fn new(registry: Arc<dyn TicketRegistry>, factory: Arc<dyn TicketFactory>) -> Self {
        Self {
            registry,
            factory,
            tracking: Arc::new(DefaultTicketTrackingPolicy::default()),
            logout_manager: LogoutManager::default(),
            service_matching: ServiceMatching::default(),
        }
    }

    #[must_use]
    pub fn with_tracking(mut self, tracking: Arc<dyn TicketTrackingPolicy>) -> Self {
        self.tracking = tracking;
        self
    }

    #[must_use]
    pub fn with_logout_manager(mut self, logout_manager: LogoutManager) -> Self {
        self.logout_manager = logout_manager;
        self
    }

    /// Sets how validation compares services. Defaults to
    /// [`ServiceMatching::Normalized`].
    #[must_use]
    pub fn with_service_matching(mut self, service_matching: ServiceMatching) -> Self {
        self.service_matching = service_matching;
        self
    }

    pub fn registry(&self) -> &Arc<dyn TicketRegistry> {
        &self.registry
    }

    /// Starts a login session.
    ///
    /// # Errors
    ///
    /// Returns an error if the ticket cannot be minted or stored.
    pub async fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> TicketResult<Ticket> {
        let ticket = self
            .factory
            .create(TicketRequest::ticket_granting_ticket(authentication))?;
        self.registry.add_ticket(&ticket).await?;
        tracing::info!(ticket_id = %ticket.id(), "Created ticket-granting ticket");
        Ok(ticket)
    }

    /// Issues a service ticket from a login session.
    ///
    /// # Errors
    ///
    /// - `InvalidTicket` if the session is unknown or expired
    /// - `InvalidTicketClass` if `tgt_id` is not a ticket-granting ticket
    /// - `Validation` if the session is used faster than its policy allows
    pub async fn grant_service_ticket(
        &self,
        tgt_id: &str,
        service: &Service,
        credentials_provided: bool,
    ) -> TicketResult<Ticket> {
        let ticket = self
            .grant(tgt_id, TicketKind::TicketGrantingTicket, |parent| {
                TicketRequest::service_ticket(parent, service.clone(), credentials_provided)
            })
            .await?;
        tracing::info!(
            ticket_id = %ticket.id(),
            service = %service,
            "Granted service ticket"
        );
        Ok(ticket)
    }

    /// Issues a proxy ticket from a proxy-granting ticket.
    ///
    /// # Errors
    ///
    /// Same as [`CentralAuthenticationService::grant_service_ticket`].
    pub async fn grant_proxy_ticket(&self, pgt_id: &str, service: &Service) -> TicketResult<Ticket> {
        let ticket = self
            .grant(pgt_id, TicketKind::ProxyGrantingTicket, |parent| {
                TicketRequest::proxy_ticket(parent, service.clone())
            })
            .await?;
        tracing::info!(ticket_id = %ticket.id(), service = %service, "Granted proxy ticket");
        Ok(ticket)
    }

    async fn grant<F>(&self, parent_id: &str, parent_kind: TicketKind, request: F) -> TicketResult<Ticket>
    where
        F: for<'a> Fn(&'a mut Ticket) -> TicketRequest<'a> + Send + Sync,
    {
        let factory = &self.factory;
        let tracking = &self.tracking;
        let mut issued = None;

        let mut mutator = |parent: &mut Ticket| -> TicketResult<()> {
            if parent.kind() != parent_kind {
                return Err(TicketError::kind_mismatch(parent_id, parent_kind, parent.kind()));
            }
            let now = OffsetDateTime::now_utc();
            if parent.expiration_policy().is_throttled(parent, now) {
                return Err(TicketError::validation(format!(
                    "ticket [{parent_id}] is used too frequently"
                )));
            }
            let ticket = factory.create(request(parent))?;
            tracking.track_ticket(parent, &ticket);
            issued = Some(ticket);
            Ok(())
        };
        self.registry
            .update_ticket_with(parent_id, &mut mutator)
            .await?;

        let ticket = issued.ok_or_else(|| TicketError::invalid_ticket(parent_id))?;
        self.add_child(&ticket, parent_id).await?;
        Ok(ticket)
    }

    /// Stores a ticket minted from `parent_id`.
    ///
    /// The parent is tracking the ticket already, but a concurrent revocation
    /// may have removed it before the ticket was stored. The parent is read
    /// again afterwards and the ticket withdrawn if it is gone.
    async fn add_child(&self, ticket: &Ticket, parent_id: &str) -> TicketResult<()> {
        self.registry.add_ticket(ticket).await?;
        if self.registry.get_ticket_unchecked(parent_id).await?.is_some() {
            return Ok(());
        }
        tracing::info!(
            ticket_id = %ticket.id(),
            parent_id = %parent_id,
            "Granting ticket was revoked while issuing, withdrawing ticket"
        );
        self.registry.delete_ticket(ticket.id()).await?;
        Err(TicketError::invalid_ticket(parent_id))
    }

    /// Creates a proxy-granting ticket from a service or proxy ticket.
    ///
    /// Must run before the ticket is validated. Each ticket grants at most
    /// one proxy-granting ticket, which is tracked on the login session.
    ///
    /// # Errors
    ///
    /// - `InvalidTicket` if the ticket or its granting ticket is unknown or
    ///   expired
    /// - `Creation` if the ticket already granted a proxy-granting ticket
    pub async fn create_proxy_granting_ticket(
        &self,
        service_ticket_id: &str,
        authentication: Authentication,
    ) -> TicketResult<Ticket> {
        let factory = &self.factory;
        let mut issued = None;

        let mut grant_proxy = |ticket: &mut Ticket| -> TicketResult<()> {
            if !TicketKind::ServiceTicket.accepts(ticket.kind()) {
                return Err(TicketError::kind_mismatch(
                    service_ticket_id,
                    TicketKind::ServiceTicket,
                    ticket.kind(),
                ));
            }
            issued = Some(factory.create(TicketRequest::proxy_granting_ticket(
                ticket,
                authentication.clone(),
            ))?);
            Ok(())
        };
        self.registry
            .update_ticket_with(service_ticket_id, &mut grant_proxy)
            .await?;
        let pgt = issued.ok_or_else(|| TicketError::invalid_ticket(service_ticket_id))?;

        let granting_id = pgt
            .granting_ticket_id()
            .ok_or_else(|| TicketError::invalid_ticket(service_ticket_id))?
            .to_owned();
        let tracking = &self.tracking;
        let mut track = |owner: &mut Ticket| -> TicketResult<()> {
            tracking.track_ticket(owner, &pgt);
            Ok(())
        };
        self.registry
            .update_ticket_with(&granting_id, &mut track)
            .await?;

        self.add_child(&pgt, &granting_id).await?;
        tracing::info!(
            ticket_id = %pgt.id(),
            granted_by = %service_ticket_id,
            "Created proxy-granting ticket"
        );
        Ok(pgt)
    }

    /// Validates a service or proxy ticket for `service`.
    ///
    /// The ticket is consumed whether or not the service matches. With the
    /// default [`ServiceMatching::Normalized`] a presented service differing
    /// only in query string, path parameters or fragment is accepted.
    ///
    /// # Errors
    ///
    /// - `InvalidTicket` if the ticket is unknown, expired, already used or
    ///   its granting chain is gone
    /// - `InvalidTicketClass` if the id is not a service or proxy ticket
    /// - `Validation` if the ticket was issued for another service
    pub async fn validate_service_ticket(
        &self,
        ticket_id: &str,
        service: &Service,
    ) -> TicketResult<Assertion> {
        let ticket = self
            .registry
            .consume_ticket(ticket_id, TicketKind::ServiceTicket)
            .await?
            .ok_or_else(|| TicketError::invalid_ticket(ticket_id))?;

        let ticket_service = ticket
            .service()
            .cloned()
            .ok_or_else(|| TicketError::invalid_ticket(ticket_id))?;
        if !self.service_matching.matches(&ticket_service, service) {
            tracing::warn!(
                ticket_id = %ticket_id,
                expected = %ticket_service,
                presented = %service,
                "Service does not match ticket"
            );
            return Err(TicketError::validation(format!(
                "service [{service}] does not match the service the ticket was issued for"
            )));
        }

        let chain = chain::granting_chain(self.registry.as_ref(), &ticket)
            .await?
            .ok_or_else(|| TicketError::invalid_ticket(ticket_id))?;
        let chained_authentications: Vec<Authentication> = chain
            .iter()
            .filter_map(|t| t.authentication().cloned())
            .collect();
        let primary_authentication = chained_authentications
            .last()
            .cloned()
            .ok_or_else(|| TicketError::invalid_ticket(ticket_id))?;

        tracing::info!(ticket_id = %ticket_id, service = %service, "Validated ticket");
        Ok(Assertion {
            primary_authentication,
            chained_authentications,
            service: ticket_service,
            from_new_login: ticket.from_new_login(),
        })
    }

    /// Ends a login session: notifies relying parties, then removes the
    /// session with every ticket it tracks.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTicketClass` if `tgt_id` is not a ticket-granting
    /// ticket, or an error if the backend fails. An unknown id is not an
    /// error and yields no requests.
    pub async fn destroy_ticket_granting_ticket(
        &self,
        tgt_id: &str,
    ) -> TicketResult<Vec<LogoutRequest>> {
        let Some(ticket) = self.registry.get_ticket_unchecked(tgt_id).await? else {
            return Ok(Vec::new());
        };
        if ticket.kind() != TicketKind::TicketGrantingTicket {
            return Err(TicketError::kind_mismatch(
                tgt_id,
                TicketKind::TicketGrantingTicket,
                ticket.kind(),
            ));
        }

        let requests = self.logout_manager.perform_logout(&ticket).await;
        let removed = self.registry.delete_ticket(tgt_id).await?;
        tracing::info!(ticket_id = %tgt_id, removed, "Destroyed ticket-granting ticket");
        Ok(requests)
    }
}
