//! # In-memory coordination store.
//!
//! [`MemCoordinator`] implements the full [`Coordinator`] contract against
//! a process-local node tree: versioned payloads, ephemeral ownership,
//! store-assigned sequential suffixes, one-shot child watches, and a
//! session event channel.
//!
//! It exists to exercise the supervisor and the discovery registry
//! end-to-end without a server. Test hooks simulate the failure modes the
//! crate must survive:
//!
//! - [`expire_session`](MemCoordinator::expire_session) drops every
//!   ephemeral node and broadcasts `Expired`.
//! - [`reconnect`](MemCoordinator::reconnect) broadcasts `SyncConnected`.
//! - [`fail_set_data`](MemCoordinator::fail_set_data) makes payload writes
//!   fail with `ConnectionLoss` until cleared.
//!
//! ## Rules
//! - Child watches fire once, on the next create/delete under the watched
//!   node, and are consumed by firing.
//! - Sequential suffixes are 10-digit zero-padded counters per parent.
//! - The tree lock is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::coordinator::client::{
    Coordinator, CreateMode, NodeChildren, NodeData, NodeEventKind, SessionEvent, WatchedEvent,
    Watcher,
};
use crate::error::CoordError;

struct Node {
    data: Vec<u8>,
    version: i32,
    ephemeral: bool,
}

#[derive(Default)]
struct Tree {
    nodes: HashMap<String, Node>,
    /// Per-parent counters backing `EphemeralSequential` suffixes.
    counters: HashMap<String, u64>,
    child_watches: HashMap<String, Vec<Watcher>>,
}

impl Tree {
    fn has(&self, path: &str) -> bool {
        path.is_empty() || self.nodes.contains_key(path)
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = format!("{path}/");
        let mut names: Vec<String> = self
            .nodes
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();
        names.sort_unstable();
        names
    }

    fn fire_child_watches(&mut self, parent: &str) {
        if let Some(watchers) = self.child_watches.remove(parent) {
            for watcher in watchers {
                let _ = watcher.send(WatchedEvent {
                    kind: NodeEventKind::NodeChildrenChanged,
                    path: parent.to_string(),
                });
            }
        }
    }
}

/// In-memory [`Coordinator`] with session and fault simulation.
pub struct MemCoordinator {
    tree: Mutex<Tree>,
    session_tx: broadcast::Sender<SessionEvent>,
    set_data_fails: AtomicBool,
}

impl MemCoordinator {
    /// Creates an empty store with the default session channel capacity.
    pub fn new() -> Self {
        Self::with_session_capacity(Config::default().session_bus_capacity)
    }

    /// Creates an empty store with the given session channel capacity.
    pub fn with_session_capacity(capacity: usize) -> Self {
        let (session_tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tree: Mutex::new(Tree::default()),
            session_tx,
            set_data_fails: AtomicBool::new(false),
        }
    }

    /// Drops every ephemeral node (firing the affected child watches) and
    /// broadcasts `Expired`.
    pub fn expire_session(&self) {
        let mut tree = self.lock_tree();
        let ephemerals: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral)
            .map(|(path, _)| path.clone())
            .collect();
        for path in ephemerals {
            tree.nodes.remove(&path);
            let parent = parent_of(&path).to_string();
            tree.fire_child_watches(&parent);
        }
        drop(tree);
        let _ = self.session_tx.send(SessionEvent::Expired);
    }

    /// Broadcasts `SyncConnected`, completing a simulated expiry cycle.
    pub fn reconnect(&self) {
        let _ = self.session_tx.send(SessionEvent::SyncConnected);
    }

    /// While set, every `set_data` fails with `ConnectionLoss`.
    pub fn fail_set_data(&self, fail: bool) {
        self.set_data_fails.store(fail, Ordering::SeqCst);
    }

    /// True if a node exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        self.lock_tree().has(path)
    }

    /// Returns a node's payload, or `None` if the node is absent.
    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.lock_tree().nodes.get(path).map(|n| n.data.clone())
    }

    /// Returns the sorted child names under `path`.
    pub fn children_of(&self, path: &str) -> Vec<String> {
        self.lock_tree().children_of(path)
    }

    fn lock_tree(&self) -> std::sync::MutexGuard<'_, Tree> {
        self.tree
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "",
        Some(idx) => &path[..idx],
    }
}

fn validate(path: &str) -> Result<(), CoordError> {
    if !path.starts_with('/') || path.ends_with('/') && path.len() > 1 {
        return Err(CoordError::Failure {
            reason: format!("invalid path '{path}'"),
        });
    }
    Ok(())
}

#[async_trait]
impl Coordinator for MemCoordinator {
    async fn create(
        &self,
        path: &str,
        data: Option<Vec<u8>>,
        mode: CreateMode,
        create_parents: bool,
    ) -> Result<String, CoordError> {
        validate(path)?;
        let mut tree = self.lock_tree();

        let parent = parent_of(path).to_string();
        if !tree.has(&parent) {
            if !create_parents {
                return Err(CoordError::NoNode { path: parent });
            }
            let mut ancestors = Vec::new();
            let mut cursor = parent.as_str();
            while !cursor.is_empty() && !tree.has(cursor) {
                ancestors.push(cursor.to_string());
                cursor = parent_of(cursor);
            }
            for ancestor in ancestors.into_iter().rev() {
                tree.nodes.insert(
                    ancestor.clone(),
                    Node {
                        data: Vec::new(),
                        version: 0,
                        ephemeral: false,
                    },
                );
                let grandparent = parent_of(&ancestor).to_string();
                tree.fire_child_watches(&grandparent);
            }
        }

        let actual = match mode {
            CreateMode::EphemeralSequential => {
                let counter = tree.counters.entry(parent.clone()).or_insert(0);
                let suffix = *counter;
                *counter += 1;
                format!("{path}{suffix:010}")
            }
            _ => path.to_string(),
        };

        if tree.nodes.contains_key(&actual) {
            return Err(CoordError::NodeExists { path: actual });
        }
        tree.nodes.insert(
            actual.clone(),
            Node {
                data: data.unwrap_or_default(),
                version: 0,
                ephemeral: mode != CreateMode::Persistent,
            },
        );
        tree.fire_child_watches(&parent);
        Ok(actual)
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), CoordError> {
        validate(path)?;
        let mut tree = self.lock_tree();
        let node = tree.nodes.get(path).ok_or_else(|| CoordError::NoNode {
            path: path.to_string(),
        })?;
        if let Some(expected) = version {
            if node.version != expected {
                return Err(CoordError::BadVersion {
                    path: path.to_string(),
                });
            }
        }
        if !tree.children_of(path).is_empty() {
            return Err(CoordError::NotEmpty {
                path: path.to_string(),
            });
        }
        tree.nodes.remove(path);
        let parent = parent_of(path).to_string();
        tree.fire_child_watches(&parent);
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<NodeData, CoordError> {
        validate(path)?;
        let tree = self.lock_tree();
        let node = tree.nodes.get(path).ok_or_else(|| CoordError::NoNode {
            path: path.to_string(),
        })?;
        Ok(NodeData {
            data: node.data.clone(),
            version: node.version,
        })
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<i32, CoordError> {
        validate(path)?;
        if self.set_data_fails.load(Ordering::SeqCst) {
            return Err(CoordError::ConnectionLoss);
        }
        let mut tree = self.lock_tree();
        let node = tree.nodes.get_mut(path).ok_or_else(|| CoordError::NoNode {
            path: path.to_string(),
        })?;
        node.data = data;
        node.version += 1;
        Ok(node.version)
    }

    async fn get_children(
        &self,
        path: &str,
        watch: Option<Watcher>,
    ) -> Result<NodeChildren, CoordError> {
        validate(path)?;
        let mut tree = self.lock_tree();
        let version = match tree.nodes.get(path) {
            Some(node) => node.version,
            None => {
                return Err(CoordError::NoNode {
                    path: path.to_string(),
                })
            }
        };
        let children = tree.children_of(path);
        if let Some(watcher) = watch {
            tree.child_watches
                .entry(path.to_string())
                .or_default()
                .push(watcher);
        }
        Ok(NodeChildren { children, version })
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn sequential_create_appends_padded_counter() {
        let coord = MemCoordinator::new();
        let first = coord
            .create("/svc/x/service-", None, CreateMode::EphemeralSequential, true)
            .await
            .expect("create");
        let second = coord
            .create("/svc/x/service-", None, CreateMode::EphemeralSequential, true)
            .await
            .expect("create");
        assert_eq!(first, "/svc/x/service-0000000000");
        assert_eq!(second, "/svc/x/service-0000000001");
    }

    #[tokio::test]
    async fn child_watch_fires_once_on_change() {
        let coord = MemCoordinator::new();
        coord
            .create("/parent", None, CreateMode::Persistent, true)
            .await
            .expect("create");

        let (tx, rx) = oneshot::channel();
        coord
            .get_children("/parent", Some(tx))
            .await
            .expect("listing");

        coord
            .create("/parent/a", None, CreateMode::Persistent, false)
            .await
            .expect("create child");
        let event = rx.await.expect("watch fired");
        assert_eq!(event.kind, NodeEventKind::NodeChildrenChanged);
        assert_eq!(event.path, "/parent");
    }

    #[tokio::test]
    async fn versioned_delete_rejects_stale_version() {
        let coord = MemCoordinator::new();
        coord
            .create("/n", Some(b"v0".to_vec()), CreateMode::Persistent, true)
            .await
            .expect("create");
        let v1 = coord.set_data("/n", b"v1".to_vec()).await.expect("set");

        let stale = coord.delete("/n", Some(v1 - 1)).await;
        assert!(matches!(stale, Err(CoordError::BadVersion { .. })));
        coord.delete("/n", Some(v1)).await.expect("delete");
    }

    #[tokio::test]
    async fn expiry_removes_only_ephemerals_and_broadcasts() {
        let coord = MemCoordinator::new();
        let mut events = coord.session_events();
        coord
            .create("/stable", None, CreateMode::Persistent, true)
            .await
            .expect("create");
        coord
            .create("/gone", None, CreateMode::Ephemeral, true)
            .await
            .expect("create");

        coord.expire_session();
        coord.reconnect();

        assert!(coord.exists("/stable"));
        assert!(!coord.exists("/gone"));
        assert_eq!(events.recv().await, Ok(SessionEvent::Expired));
        assert_eq!(events.recv().await, Ok(SessionEvent::SyncConnected));
    }

    #[tokio::test]
    async fn set_data_fault_injection() {
        let coord = MemCoordinator::new();
        coord
            .create("/n", None, CreateMode::Persistent, true)
            .await
            .expect("create");

        coord.fail_set_data(true);
        let err = coord.set_data("/n", b"x".to_vec()).await;
        assert_eq!(err, Err(CoordError::ConnectionLoss));

        coord.fail_set_data(false);
        coord.set_data("/n", b"x".to_vec()).await.expect("set");
    }
}
