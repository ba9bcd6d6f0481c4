//! Ticket factories.
//!
//! A factory mints a ticket of a requested kind with a fresh id and the
//! expiration policy configured for that kind. The ticket is returned
//! unpersisted; the caller hands it to the registry.
//!
//! Minting a service or proxy ticket records a use on the parent, and minting
//! a proxy-granting ticket marks the validated ticket as spent for proxying.
//! Parents are therefore taken by mutable reference, and callers persist the
//! parent afterwards (see [`crate::service::CentralAuthenticationService`]).

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;

use crate::TicketResult;
use crate::config::TicketConfig;
use crate::error::TicketError;
use crate::expiration::ExpirationPolicy;
use crate::id::{DefaultUniqueTicketIdGenerator, UniqueTicketIdGenerator};
use crate::model::{
    Authentication, ProxyGrantingTicket, ProxyTicket, Service, ServiceTicket, Ticket,
    TicketGrantingTicket, TicketKind, TicketState,
};

/// Data carried by the new ticket.
#[derive(Debug, Clone)]
pub enum TicketPayload {
    /// Authentication of a ticket-granting or proxy-granting ticket.
    Authentication(Authentication),
    /// Target service of a service or proxy ticket.
    Service {
        service: Service,
        /// The user presented credentials for this request (renew).
        credentials_provided: bool,
    },
}

/// How the new ticket's expiration policy is chosen.
#[derive(Debug, Clone, Default)]
pub enum PolicySelection {
    /// The policy configured for the ticket kind.
    #[default]
    Default,
    /// A policy registered under a name.
    Named(String),
    /// An explicit policy.
    Explicit(ExpirationPolicy),
}

/// Request to mint one ticket.
#[derive(Debug)]
pub struct TicketRequest<'a> {
    pub kind: TicketKind,
    pub parent: Option<&'a mut Ticket>,
    pub payload: TicketPayload,
    pub expiration: PolicySelection,
}

impl<'a> TicketRequest<'a> {
    #[must_use]
    pub fn ticket_granting_ticket(authentication: Authentication) -> Self {
        Self {
            kind: TicketKind::TicketGrantingTicket,
            parent: None,
            payload: TicketPayload::Authentication(authentication),
            expiration: PolicySelection::Default,
        }
    }

    #[must_use]
    pub fn service_ticket(
        parent: &'a mut Ticket,
        service: Service,
        credentials_provided: bool,
    ) -> Self {
        Self {
            kind: TicketKind::ServiceTicket,
            parent: Some(parent),
            payload: TicketPayload::Service {
                service,
                credentials_provided,
            },
            expiration: PolicySelection::Default,
        }
    }

    #[must_use]
    pub fn proxy_ticket(parent: &'a mut Ticket, service: Service) -> Self {
        Self {
            kind: TicketKind::ProxyTicket,
            parent: Some(parent),
            payload: TicketPayload::Service {
                service,
                credentials_provided: false,
            },
            expiration: PolicySelection::Default,
        }
    }

    /// Proxy-granting ticket created from a validated service or proxy ticket.
    #[must_use]
    pub fn proxy_granting_ticket(parent: &'a mut Ticket, authentication: Authentication) -> Self {
        Self {
            kind: TicketKind::ProxyGrantingTicket,
            parent: Some(parent),
            payload: TicketPayload::Authentication(authentication),
            expiration: PolicySelection::Default,
        }
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: PolicySelection) -> Self {
        self.expiration = expiration;
        self
    }
}

/// Mints tickets.
pub trait TicketFactory: Send + Sync {
    /// Creates a new, unpersisted ticket.
    ///
    /// # Errors
    ///
    /// - `InvalidTicketClass` if no definition is registered for the kind
    /// - `Creation` if a descendant has no parent or a parent of the wrong
    ///   kind, if the payload does not fit the kind, if a named policy is
    ///   unknown, or if the parent already granted a proxy-granting ticket
    fn create(&self, request: TicketRequest<'_>) -> TicketResult<Ticket>;

    /// Returns `true` if tickets of `kind` can be created.
    fn supports(&self, kind: TicketKind) -> bool;
}

/// Per-kind factory settings.
#[derive(Debug, Clone)]
pub struct TicketDefinition {
    pub id_generator: Arc<dyn UniqueTicketIdGenerator>,
    pub expiration_policy: ExpirationPolicy,
}

/// Factory driven by a table of [`TicketDefinition`]s.
#[derive(Debug, Clone, Default)]
pub struct DefaultTicketFactory {
    definitions: HashMap<TicketKind, TicketDefinition>,
    named_policies: HashMap<String, ExpirationPolicy>,
}

impl DefaultTicketFactory {
    #[must_use]
    pub fn builder() -> DefaultTicketFactoryBuilder {
        DefaultTicketFactoryBuilder::default()
    }

    /// Builds a factory for every ticket kind from configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if the configuration is invalid.
    pub fn from_config(config: &TicketConfig) -> TicketResult<Self> {
        config.validate()?;

        let generator = |max_length: usize| -> Arc<dyn UniqueTicketIdGenerator> {
            let generator = DefaultUniqueTicketIdGenerator::new(max_length);
            let generator = match &config.id.suffix {
                Some(suffix) => generator.with_suffix(suffix.clone()),
                None if config.id.use_host_name => generator.with_host_name_suffix(),
                None => generator,
            };
            Arc::new(generator)
        };

        let mut builder = Self::builder()
            .definition(
                TicketKind::TicketGrantingTicket,
                generator(config.tgt.max_length),
                config.ticket_granting_ticket_policy(),
            )
            .definition(
                TicketKind::ProxyGrantingTicket,
                generator(config.pgt.max_length),
                config.proxy_granting_ticket_policy(),
            )
            .definition(
                TicketKind::ServiceTicket,
                generator(config.st.max_length),
                config.service_ticket_policy(),
            )
            .definition(
                TicketKind::ProxyTicket,
                generator(config.pt.max_length),
                config.proxy_ticket_policy(),
            );
        for (name, policy) in &config.policies {
            builder = builder.named_policy(name.clone(), policy.clone());
        }
        Ok(builder.build())
    }

    /// Registered definition for `kind`.
    #[must_use]
    pub fn definition(&self, kind: TicketKind) -> Option<&TicketDefinition> {
        self.definitions.get(&kind)
    }

    fn resolve_policy(
        &self,
        definition: &TicketDefinition,
        selection: PolicySelection,
    ) -> TicketResult<ExpirationPolicy> {
        match selection {
            PolicySelection::Default => Ok(definition.expiration_policy.clone()),
            PolicySelection::Explicit(policy) => Ok(policy),
            PolicySelection::Named(name) => self
                .named_policies
                .get(&name)
                .cloned()
                .ok_or_else(|| TicketError::creation(format!("unknown expiration policy '{name}'"))),
        }
    }
}

impl TicketFactory for DefaultTicketFactory {
    fn create(&self, request: TicketRequest<'_>) -> TicketResult<Ticket> {
        let TicketRequest {
            kind,
            parent,
            payload,
            expiration,
        } = request;

        let definition = self.definitions.get(&kind).ok_or_else(|| {
            TicketError::invalid_ticket_class(format!("no ticket factory is registered for {kind}"))
        })?;
        let policy = self.resolve_policy(definition, expiration)?;
        let now = OffsetDateTime::now_utc();

        let ticket = match kind {
            TicketKind::TicketGrantingTicket => {
                if parent.is_some() {
                    return Err(TicketError::creation(
                        "a ticket-granting ticket cannot have a parent",
                    ));
                }
                let authentication = expect_authentication(kind, payload)?;
                let id = definition.id_generator.new_ticket_id(kind.prefix());
                TicketGrantingTicket::new(id, authentication, policy, now).into()
            }
            TicketKind::ServiceTicket | TicketKind::ProxyTicket => {
                let parent = require_parent(kind, parent)?;
                let expected = if kind == TicketKind::ServiceTicket {
                    TicketKind::TicketGrantingTicket
                } else {
                    TicketKind::ProxyGrantingTicket
                };
                if parent.kind() != expected {
                    return Err(TicketError::creation(format!(
                        "a {kind} must be granted by a {expected}, not a {}",
                        parent.kind()
                    )));
                }
                let TicketPayload::Service {
                    service,
                    credentials_provided,
                } = payload
                else {
                    return Err(TicketError::creation(format!("a {kind} requires a service")));
                };

                let from_new_login = credentials_provided || parent.count_of_uses() == 0;
                let id = definition.id_generator.new_ticket_id(kind.prefix());
                let state = TicketState::new(id, policy, Some(parent.id().to_string()), now);
                parent.update(now);

                if kind == TicketKind::ServiceTicket {
                    ServiceTicket {
                        state,
                        service,
                        from_new_login,
                        proxy_granted: false,
                    }
                    .into()
                } else {
                    ProxyTicket {
                        state,
                        service,
                        from_new_login,
                        proxy_granted: false,
                    }
                    .into()
                }
            }
            TicketKind::ProxyGrantingTicket => {
                let parent = require_parent(kind, parent)?;
                let authentication = expect_authentication(kind, payload)?;
                let (proxy_granted, service, state) = match parent {
                    Ticket::ServiceTicket(t) => (&mut t.proxy_granted, &t.service, &t.state),
                    Ticket::ProxyTicket(t) => (&mut t.proxy_granted, &t.service, &t.state),
                    other => {
                        return Err(TicketError::creation(format!(
                            "a {kind} must be created from a service or proxy ticket, not a {}",
                            other.kind()
                        )));
                    }
                };
                if *proxy_granted {
                    return Err(TicketError::creation(format!(
                        "ticket [{}] already granted a proxy-granting ticket",
                        state.id
                    )));
                }
                let granting_ticket_id = state.granting_ticket_id.clone().ok_or_else(|| {
                    TicketError::creation(format!("ticket [{}] has no granting ticket", state.id))
                })?;
                let proxied_by = service.clone();
                *proxy_granted = true;

                let id = definition.id_generator.new_ticket_id(kind.prefix());
                ProxyGrantingTicket {
                    grant: TicketGrantingTicket::with_parent(
                        id,
                        authentication,
                        policy,
                        Some(granting_ticket_id),
                        now,
                    ),
                    proxied_by,
                }
                .into()
            }
        };

        Ok(ticket)
    }

    fn supports(&self, kind: TicketKind) -> bool {
        self.definitions.contains_key(&kind)
    }
}

fn require_parent(kind: TicketKind, parent: Option<&mut Ticket>) -> TicketResult<&mut Ticket> {
    parent.ok_or_else(|| TicketError::creation(format!("a {kind} requires a parent ticket")))
}

fn expect_authentication(kind: TicketKind, payload: TicketPayload) -> TicketResult<Authentication> {
    match payload {
        TicketPayload::Authentication(authentication) => Ok(authentication),
        TicketPayload::Service { .. } => Err(TicketError::creation(format!(
            "a {kind} requires an authentication"
        ))),
    }
}

/// Builder for [`DefaultTicketFactory`].
#[derive(Debug, Default)]
pub struct DefaultTicketFactoryBuilder {
    definitions: HashMap<TicketKind, TicketDefinition>,
    named_policies: HashMap<String, ExpirationPolicy>,
}

impl DefaultTicketFactoryBuilder {
    #[must_use]
    pub fn definition(
        mut self,
        kind: TicketKind,
        id_generator: Arc<dyn UniqueTicketIdGenerator>,
        expiration_policy: ExpirationPolicy,
    ) -> Self {
        self.definitions.insert(
            kind,
            TicketDefinition {
                id_generator,
                expiration_policy,
            },
        );
        self
    }

    #[must_use]
    pub fn named_policy(mut self, name: impl Into<String>, policy: ExpirationPolicy) -> Self {
        self.named_policies.insert(name.into(), policy);
        self
    }

    #[must_use]
    pub fn build(self) -> DefaultTicketFactory {
        DefaultTicketFactory {
            definitions: self.definitions,
            named_policies: self.named_policies,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::Principal;

    fn factory() -> DefaultTicketFactory {
        let mut config = TicketConfig::default();
        config.id.use_host_name = false;
        config.policies.insert(
            "long".to_string(),
            ExpirationPolicy::HardTimeout {
                time_to_kill: Duration::from_secs(86_400),
            },
        );
        DefaultTicketFactory::from_config(&config).unwrap()
    }

    fn authentication() -> Authentication {
        Authentication::new(Principal::new("casuser"))
    }

    #[test]
    fn test_create_ticket_granting_ticket() {
        let tgt = factory()
            .create(TicketRequest::ticket_granting_ticket(authentication()))
            .unwrap();
        assert_eq!(tgt.kind(), TicketKind::TicketGrantingTicket);
        assert!(tgt.id().starts_with("TGT-"));
        assert!(tgt.is_root());
        assert_eq!(tgt.count_of_uses(), 0);
    }

    #[test]
    fn test_service_ticket_is_chained_and_uses_parent() {
        let factory = factory();
        let mut tgt = factory
            .create(TicketRequest::ticket_granting_ticket(authentication()))
            .unwrap();

        let first = factory
            .create(TicketRequest::service_ticket(
                &mut tgt,
                Service::new("https://app.example.org"),
                false,
            ))
            .unwrap();
        assert_eq!(first.granting_ticket_id(), Some(tgt.id()));
        assert!(first.id().starts_with("ST-"));
        assert!(first.from_new_login());
        assert_eq!(tgt.count_of_uses(), 1);

        let second = factory
            .create(TicketRequest::service_ticket(
                &mut tgt,
                Service::new("https://app.example.org"),
                false,
            ))
            .unwrap();
        assert!(!second.from_new_login());

        let renewed = factory
            .create(TicketRequest::service_ticket(
                &mut tgt,
                Service::new("https://app.example.org"),
                true,
            ))
            .unwrap();
        assert!(renewed.from_new_login());
    }

    #[test]
    fn test_descendant_without_parent_fails() {
        let request = TicketRequest {
            kind: TicketKind::ServiceTicket,
            parent: None,
            payload: TicketPayload::Service {
                service: Service::new("https://app"),
                credentials_provided: false,
            },
            expiration: PolicySelection::Default,
        };
        let err = factory().create(request).unwrap_err();
        assert!(matches!(err, TicketError::Creation { .. }));
    }

    #[test]
    fn test_unregistered_kind_fails_with_invalid_class() {
        let factory = DefaultTicketFactory::builder().build();
        assert!(!factory.supports(TicketKind::TicketGrantingTicket));
        let err = factory
            .create(TicketRequest::ticket_granting_ticket(authentication()))
            .unwrap_err();
        assert!(matches!(err, TicketError::InvalidTicketClass { .. }));
    }

    #[test]
    fn test_wrong_parent_kind_fails() {
        let factory = factory();
        let mut tgt = factory
            .create(TicketRequest::ticket_granting_ticket(authentication()))
            .unwrap();
        let err = factory
            .create(TicketRequest::proxy_ticket(&mut tgt, Service::new("https://backend")))
            .unwrap_err();
        assert!(matches!(err, TicketError::Creation { .. }));
        assert_eq!(tgt.count_of_uses(), 0);
    }

    #[test]
    fn test_proxy_granting_ticket_once_per_service_ticket() {
        let factory = factory();
        let mut tgt = factory
            .create(TicketRequest::ticket_granting_ticket(authentication()))
            .unwrap();
        let mut st = factory
            .create(TicketRequest::service_ticket(&mut tgt, Service::new("https://proxy"), false))
            .unwrap();

        let pgt = factory
            .create(TicketRequest::proxy_granting_ticket(
                &mut st,
                Authentication::new(Principal::new("https://proxy/callback")),
            ))
            .unwrap();
        assert_eq!(pgt.kind(), TicketKind::ProxyGrantingTicket);
        assert_eq!(pgt.granting_ticket_id(), Some(tgt.id()));
        assert_eq!(pgt.service(), Some(&Service::new("https://proxy")));

        let err = factory
            .create(TicketRequest::proxy_granting_ticket(&mut st, authentication()))
            .unwrap_err();
        assert!(matches!(err, TicketError::Creation { .. }));
    }

    #[test]
    fn test_policy_selection() {
        let factory = factory();
        let named = factory
            .create(
                TicketRequest::ticket_granting_ticket(authentication())
                    .with_expiration(PolicySelection::Named("long".into())),
            )
            .unwrap();
        assert_eq!(named.expiration_policy().name(), "hard_timeout");

        let explicit = factory
            .create(
                TicketRequest::ticket_granting_ticket(authentication())
                    .with_expiration(PolicySelection::Explicit(ExpirationPolicy::NeverExpires)),
            )
            .unwrap();
        assert_eq!(explicit.expiration_policy(), &ExpirationPolicy::NeverExpires);

        let err = factory
            .create(
                TicketRequest::ticket_granting_ticket(authentication())
                    .with_expiration(PolicySelection::Named("missing".into())),
            )
            .unwrap_err();
        assert!(matches!(err, TicketError::Creation { .. }));
    }
}
