//! # Error types used by the coordination gateway and the discovery registry.
//!
//! This module defines two main error enums:
//!
//! - [`CoordError`] errors surfaced by coordination store operations.
//! - [`DiscoveryError`] errors surfaced by the discovery registry.
//!
//! Both types provide helper methods `as_label` for metrics. [`CoordError`]
//! has additional predicates (`is_no_node()`, `is_node_exists()`, ...) used
//! to decide where a failure is ignored for idempotence.

use thiserror::Error;

/// # Errors produced by coordination store operations.
///
/// Semantic kinds (`NoNode`, `NodeExists`, `BadVersion`, `NotEmpty`) map to
/// the store's own failure codes; transport kinds (`ConnectionLoss`,
/// `SessionExpired`) reflect the state of the session carrying the request.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    /// The addressed node does not exist.
    #[error("no node at '{path}'")]
    NoNode {
        /// Path of the missing node.
        path: String,
    },
    /// A node already exists at the creation path.
    #[error("node already exists at '{path}'")]
    NodeExists {
        /// Path of the conflicting node.
        path: String,
    },
    /// A versioned mutation did not match the node's current version.
    #[error("version mismatch at '{path}'")]
    BadVersion {
        /// Path of the node whose version did not match.
        path: String,
    },
    /// A delete was attempted on a node that still has children.
    #[error("node at '{path}' has children")]
    NotEmpty {
        /// Path of the non-empty node.
        path: String,
    },
    /// The connection to the coordination store was lost mid-operation.
    #[error("connection to the coordination store was lost")]
    ConnectionLoss,
    /// The session backing this client has expired.
    #[error("coordination session expired")]
    SessionExpired,
    /// Any other failure reported by the store.
    #[error("coordination operation failed: {reason}")]
    Failure {
        /// Human-readable failure description.
        reason: String,
    },
}

impl CoordError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CoordError::NoNode { .. } => "coord_no_node",
            CoordError::NodeExists { .. } => "coord_node_exists",
            CoordError::BadVersion { .. } => "coord_bad_version",
            CoordError::NotEmpty { .. } => "coord_not_empty",
            CoordError::ConnectionLoss => "coord_connection_loss",
            CoordError::SessionExpired => "coord_session_expired",
            CoordError::Failure { .. } => "coord_failure",
        }
    }

    /// True for the `NoNode` kind.
    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordError::NoNode { .. })
    }

    /// True for the `NodeExists` kind.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, CoordError::NodeExists { .. })
    }

    /// True for transport-level kinds tied to the session rather than a node.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CoordError::ConnectionLoss | CoordError::SessionExpired
        )
    }
}

/// # Errors produced by the discovery registry.
///
/// Registration is synchronous to the caller; a failed initial create
/// surfaces here so the caller crashes fast instead of running
/// unadvertised.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The initial ephemeral-sequential create for an endpoint failed.
    #[error("failed to register '{service}'")]
    Register {
        /// Service name that could not be advertised.
        service: String,
        /// Underlying store failure.
        #[source]
        source: CoordError,
    },
}

impl DiscoveryError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            DiscoveryError::Register { .. } => "discovery_register",
        }
    }
}
