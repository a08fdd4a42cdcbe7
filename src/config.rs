//! # Global runtime configuration.
//!
//! [`Config`] defines the runtime knobs shared by the supervisor and the
//! discovery registry: the discovery namespace, the capacity of the
//! serialized message-callback queue, and the capacity of the session
//! event channel.
//!
//! # Example
//! ```
//! use servisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.callback_queue_capacity = 128;
//!
//! assert_eq!(cfg.discovery_namespace, "/discoverable");
//! ```

/// Global configuration for the supervisor and discovery registry.
///
/// Controls the discovery namespace and internal channel capacities.
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespace under which discoverable services are registered.
    pub discovery_namespace: String,
    /// Capacity of the serialized message-callback queue.
    pub callback_queue_capacity: usize,
    /// Capacity of the session event broadcast channel.
    pub session_bus_capacity: usize,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `discovery_namespace = "/discoverable"`
    /// - `callback_queue_capacity = 64`
    /// - `session_bus_capacity = 64`
    fn default() -> Self {
        Self {
            discovery_namespace: "/discoverable".to_string(),
            callback_queue_capacity: 64,
            session_bus_capacity: 64,
        }
    }
}
