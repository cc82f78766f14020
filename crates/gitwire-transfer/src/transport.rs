use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::session::{Connection, Service};

/// Where a remote repository lives, as far as the core cares: a scheme to
/// pick the transport and an opaque remainder the transport interprets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: String,
    pub rest: String,
}

impl Endpoint {
    pub fn new(scheme: impl Into<String>, rest: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            rest: rest.into(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() => Ok(Self::new(scheme, rest)),
            // Bare paths are local repositories.
            _ => Ok(Self::new("file", s)),
        }
    }
}

/// A way of establishing pack-transfer connections for one URL scheme.
/// Concrete implementations (tcp, ssh, http, pipes) live outside the core.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, service: Service, endpoint: &Endpoint) -> Result<Connection>;
}

type Registry = RwLock<HashMap<String, Option<Arc<dyn Transport>>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Adds or replaces the transport for a scheme. A `None` value reserves the
/// scheme while yielding an explicit error on lookup.
pub fn register(scheme: &str, transport: Option<Arc<dyn Transport>>) {
    registry().write().insert(scheme.to_string(), transport);
}

pub fn unregister(scheme: &str) {
    registry().write().remove(scheme);
}

/// Resolves a scheme, distinguishing an unknown scheme from a reserved but
/// malformed (nil-valued) registration.
pub fn lookup(scheme: &str) -> Result<Arc<dyn Transport>> {
    match registry().read().get(scheme) {
        None => Err(Error::UnknownScheme(scheme.to_string())),
        Some(None) => Err(Error::MalformedRegistration(scheme.to_string())),
        Some(Some(transport)) => Ok(Arc::clone(transport)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn connect(&self, _service: Service, _endpoint: &Endpoint) -> Result<Connection> {
            Err(Error::NotConnected)
        }
    }

    #[test]
    fn test_register_lookup_unregister() {
        register("test-rlu", Some(Arc::new(NullTransport)));
        assert!(lookup("test-rlu").is_ok());

        unregister("test-rlu");
        assert!(matches!(
            lookup("test-rlu"),
            Err(Error::UnknownScheme(_))
        ));
    }

    #[test]
    fn test_unknown_scheme() {
        assert!(matches!(
            lookup("test-never-registered"),
            Err(Error::UnknownScheme(_))
        ));
    }

    #[test]
    fn test_nil_registration_is_distinguished() {
        register("test-nil", None);
        assert!(matches!(
            lookup("test-nil"),
            Err(Error::MalformedRegistration(_))
        ));
        unregister("test-nil");
    }

    #[test]
    fn test_register_replaces() {
        register("test-replace", None);
        register("test-replace", Some(Arc::new(NullTransport)));
        assert!(lookup("test-replace").is_ok());
        unregister("test-replace");
    }

    #[test]
    fn test_endpoint_parse_scheme() {
        let ep: Endpoint = "ssh://git@host/repo.git".parse().unwrap();
        assert_eq!(ep.scheme, "ssh");
        assert_eq!(ep.rest, "git@host/repo.git");
    }

    #[test]
    fn test_endpoint_parse_bare_path() {
        let ep: Endpoint = "/srv/git/repo.git".parse().unwrap();
        assert_eq!(ep.scheme, "file");
        assert_eq!(ep.rest, "/srv/git/repo.git");
    }
}
