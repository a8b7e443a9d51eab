//! Scheme → connector registry.
//!
//! An explicit value threaded into session construction, not a process
//! global: callers that need a custom scheme (or want to stub a transport
//! in tests) register it on their own instance.

use std::collections::HashMap;

use crate::{http, local, ssh, tcp, Auth, GitUrl, Scheme, Service, Transport, TransportError};

/// A function that opens a transport for one scheme.
pub type Connector =
    fn(&GitUrl, Service, &Auth) -> Result<Box<dyn Transport>, TransportError>;

/// Maps URL schemes to connectors.
#[derive(Clone)]
pub struct TransportRegistry {
    connectors: HashMap<Scheme, Connector>,
}

impl TransportRegistry {
    /// An empty registry with no schemes at all.
    pub fn empty() -> Self {
        Self {
            connectors: HashMap::new(),
        }
    }

    /// Register (or replace) the connector for a scheme.
    pub fn register(&mut self, scheme: Scheme, connector: Connector) -> &mut Self {
        self.connectors.insert(scheme, connector);
        self
    }

    /// Whether a scheme can be connected.
    pub fn supports(&self, scheme: Scheme) -> bool {
        self.connectors.contains_key(&scheme)
    }

    /// Open a transport for `url`.
    pub fn connect(
        &self,
        url: &GitUrl,
        service: Service,
        auth: &Auth,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let connector = self
            .connectors
            .get(&url.scheme)
            .ok_or_else(|| TransportError::UnsupportedScheme(url.scheme.to_string()))?;
        connector(url, service, auth)
    }
}

impl Default for TransportRegistry {
    /// All built-in schemes.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(Scheme::Ssh, ssh::connect)
            .register(Scheme::Git, |url, service, _auth| {
                tcp::connect(url, service)
            })
            .register(Scheme::Http, http::connect)
            .register(Scheme::Https, http::connect)
            .register(Scheme::File, |url, service, _auth| {
                local::connect(url, service)
            })
            .register(Scheme::Local, |url, service, _auth| {
                local::connect(url, service)
            });
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_covers_all_schemes() {
        let registry = TransportRegistry::default();
        for scheme in [
            Scheme::Git,
            Scheme::Ssh,
            Scheme::Http,
            Scheme::Https,
            Scheme::File,
            Scheme::Local,
        ] {
            assert!(registry.supports(scheme), "{scheme}");
        }
    }

    #[test]
    fn empty_registry_rejects_everything() {
        let registry = TransportRegistry::empty();
        let url = GitUrl::parse("git://example.invalid/repo").unwrap();
        let err = match registry.connect(&url, Service::UploadPack, &Auth::None) {
            Ok(_) => panic!("expected connect to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, TransportError::UnsupportedScheme(_)));
    }

    #[test]
    fn custom_connector_wins() {
        fn refuse(
            _url: &GitUrl,
            _service: Service,
            _auth: &Auth,
        ) -> Result<Box<dyn Transport>, TransportError> {
            Err(TransportError::ConnectionFailed("stub".into()))
        }

        let mut registry = TransportRegistry::empty();
        registry.register(Scheme::Git, refuse);
        let url = GitUrl::parse("git://example.invalid/repo").unwrap();
        let err = match registry.connect(&url, Service::UploadPack, &Auth::None) {
            Ok(_) => panic!("expected connect to fail"),
            Err(err) => err,
        };
        assert!(matches!(err, TransportError::ConnectionFailed(msg) if msg == "stub"));
    }
}
