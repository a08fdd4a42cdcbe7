//! # Gateway contract for the coordination store.
//!
//! [`Coordinator`] is the thin async capability the supervisor and the
//! discovery registry require from a hierarchical, session-oriented
//! key/value service: CRUD on versioned nodes, one-shot child watches,
//! and a session event stream.
//!
//! ## Rules
//! - All operations are async; nothing here blocks a caller's thread.
//! - Child watches are **one-shot**: a registered watcher fires at most
//!   once and must be re-armed by issuing `get_children` again.
//! - Session events are broadcast; late subscribers only see events
//!   emitted after they subscribed.

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot};

use crate::error::CoordError;

/// Creation disposition of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creator's session.
    Persistent,
    /// Removed by the store when the creator's session ends.
    Ephemeral,
    /// Ephemeral, with a store-assigned monotone suffix appended to the
    /// requested path.
    EphemeralSequential,
}

/// Payload and version of a node read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    /// Node payload bytes.
    pub data: Vec<u8>,
    /// Version observed at read time; deletes pinned to it fail with
    /// `BadVersion` if the node changed since.
    pub version: i32,
}

/// Child names and parent version of a children listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeChildren {
    /// Child node names (relative, unordered).
    pub children: Vec<String>,
    /// Parent version at listing time.
    pub version: i32,
}

/// Kind of a fired node watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEventKind {
    /// The watched node gained or lost a child.
    NodeChildrenChanged,
    /// The watched node was created.
    NodeCreated,
    /// The watched node was deleted.
    NodeDeleted,
    /// The watched node's payload changed.
    NodeDataChanged,
}

/// A fired node watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// What happened.
    pub kind: NodeEventKind,
    /// Path the watch was registered on.
    pub path: String,
}

/// One-shot receiver slot for a node watch.
pub type Watcher = oneshot::Sender<WatchedEvent>;

/// Session-level connection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The client (re-)connected with a live session.
    SyncConnected,
    /// The session expired; all ephemeral nodes it owned are gone.
    Expired,
}

/// # Async gateway to the coordination store.
///
/// Implementations deliver completions on their own tasks; callers must
/// not assume any particular executor.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Creates a node, returning the actual path (which differs from the
    /// requested one for `EphemeralSequential`). With `create_parents`,
    /// missing ancestors are created as persistent empty nodes.
    async fn create(
        &self,
        path: &str,
        data: Option<Vec<u8>>,
        mode: CreateMode,
        create_parents: bool,
    ) -> Result<String, CoordError>;

    /// Deletes a node. A `Some(version)` pins the delete to the version
    /// observed at read time.
    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), CoordError>;

    /// Reads a node's payload and version.
    async fn get_data(&self, path: &str) -> Result<NodeData, CoordError>;

    /// Replaces a node's payload, returning the new version.
    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<i32, CoordError>;

    /// Lists a node's children, optionally arming a one-shot child watch.
    /// The watch is armed only when the listing succeeds.
    async fn get_children(
        &self,
        path: &str,
        watch: Option<Watcher>,
    ) -> Result<NodeChildren, CoordError>;

    /// Subscribes to session-level connection events.
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;
}
