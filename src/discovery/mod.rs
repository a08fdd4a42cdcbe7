//! # Service discovery over the coordination store.
//!
//! Endpoints are advertised as ephemeral sequential nodes under
//! `/<namespace>/<service>/service-<seq>` (default namespace
//! `/discoverable`). The [`DiscoveryRegistry`] publishes endpoints and
//! survives session loss by re-registering; [`ServiceView`]s give
//! subscribers a live snapshot of the membership set.

mod registry;
mod resolver;

use serde::{Deserialize, Serialize};

pub use registry::{Cancellable, DiscoveryRegistry};
pub use resolver::ServiceView;

/// A service name plus the network endpoint advertising it.
///
/// ## Wire format
/// ```text
/// {"service":"foo","hostname":"h","port":1234}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Discoverable {
    service: String,
    hostname: String,
    port: u16,
}

impl Discoverable {
    /// Builds a discoverable endpoint.
    pub fn new(service: impl Into<String>, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            hostname: hostname.into(),
            port,
        }
    }

    /// Returns the service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the advertised hostname.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the advertised port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Encodes the endpoint to its JSON byte form.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("discoverable serializes to JSON")
    }

    /// Decodes a JSON byte form; `None` for malformed payloads.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_flat() {
        let d = Discoverable::new("foo", "h", 1234);
        assert_eq!(d.encode(), br#"{"service":"foo","hostname":"h","port":1234}"#);
        assert_eq!(Discoverable::decode(&d.encode()), Some(d));
    }

    #[test]
    fn malformed_payload_decodes_to_none() {
        assert_eq!(Discoverable::decode(b"{}"), None);
        assert_eq!(Discoverable::decode(b"garbage"), None);
        assert_eq!(
            Discoverable::decode(br#"{"service":"x","hostname":"h","port":"not-a-port"}"#),
            None
        );
    }
}
