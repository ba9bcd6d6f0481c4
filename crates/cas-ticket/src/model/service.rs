use std::fmt;

use serde::{Deserialize, Serialize};

/// A relying party identified by its service URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
}

impl Service {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Service id without query string, path parameters or fragment.
    ///
    /// `https://app.example.org/a?x=1`, `https://app.example.org/a;jsessionid=2`
    /// and `https://app.example.org/a#top` all normalize to
    /// `https://app.example.org/a`.
    #[must_use]
    pub fn normalized_id(&self) -> &str {
        let end = self.id.find(['?', ';', '#']).unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Returns `true` if both services address the same endpoint.
    #[must_use]
    pub fn matches(&self, other: &Service) -> bool {
        self.normalized_id() == other.normalized_id()
    }
}

/// How the service presented at validation is compared with the service a
/// ticket was issued for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMatching {
    /// Ids match once normalized; see [`Service::normalized_id`].
    #[default]
    Normalized,
    /// Ids must be identical.
    Exact,
}

impl ServiceMatching {
    #[must_use]
    pub fn matches(self, issued: &Service, presented: &Service) -> bool {
        match self {
            Self::Normalized => issued.matches(presented),
            Self::Exact => issued.id == presented.id,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for Service {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_id() {
        assert_eq!(
            Service::new("http://host.com?test").normalized_id(),
            "http://host.com"
        );
        assert_eq!(
            Service::new("http://host.com;JSESSIONID=xxx").normalized_id(),
            "http://host.com"
        );
        assert_eq!(
            Service::new("http://host.com/#frag").normalized_id(),
            "http://host.com/"
        );
        assert_eq!(Service::new("/webapp1").normalized_id(), "/webapp1");
    }

    #[test]
    fn test_matches() {
        assert!(Service::new("http://host.com?test").matches(&"http://host.com;JSESSIONID=xxx".into()));
        assert!(Service::new("/webapp1").matches(&"/webapp1?test=true".into()));
        assert!(!Service::new("/webapp1").matches(&"/webapp2".into()));
    }

    #[test]
    fn test_exact_matching() {
        let issued = Service::new("https://app.example.org/a?x=1");
        assert!(ServiceMatching::Normalized.matches(&issued, &"https://app.example.org/a".into()));
        assert!(!ServiceMatching::Exact.matches(&issued, &"https://app.example.org/a".into()));
        assert!(ServiceMatching::Exact.matches(&issued, &"https://app.example.org/a?x=1".into()));
    }
}
