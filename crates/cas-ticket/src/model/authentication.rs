use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Authentication attribute that marks a remember-me login.
pub const REMEMBER_ME_ATTRIBUTE: &str = "org.apereo.cas.authentication.principal.REMEMBER_ME";

/// Multi-valued attribute map.
pub type Attributes = BTreeMap<String, Vec<String>>;

/// The authenticated subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl Principal {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Attributes::new(),
        }
    }
}

/// Result of a successful primary authentication.
///
/// Produced upstream by the authentication subsystem and carried by
/// ticket-granting tickets as an opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authentication {
    pub principal: Principal,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    #[serde(with = "time::serde::rfc3339")]
    pub authentication_date: OffsetDateTime,
}

impl Authentication {
    /// Creates an authentication for `principal` dated now.
    #[must_use]
    pub fn new(principal: Principal) -> Self {
        Self {
            principal,
            attributes: Attributes::new(),
            authentication_date: OffsetDateTime::now_utc(),
        }
    }

    /// Adds a single-valued authentication attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Marks this authentication as a remember-me login.
    #[must_use]
    pub fn remembered(self) -> Self {
        self.with_attribute(REMEMBER_ME_ATTRIBUTE, "true")
    }

    #[must_use]
    pub fn is_remember_me(&self) -> bool {
        self.attributes
            .get(REMEMBER_ME_ATTRIBUTE)
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case("true")))
    }
}
