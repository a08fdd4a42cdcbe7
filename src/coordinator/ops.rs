//! # Compound operations over the gateway.
//!
//! Helpers the supervisor needs beyond raw CRUD: a recursive delete that
//! tolerates concurrent removals, result adapters that turn one semantic
//! failure kind into success, and the delete-then-create used to reset a
//! path to a known payload.

use crate::coordinator::client::{Coordinator, CreateMode};
use crate::error::CoordError;

/// Maps a `NoNode` failure to `Ok(None)`; any other outcome passes through.
pub fn ignore_no_node<T>(result: Result<T, CoordError>) -> Result<Option<T>, CoordError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_no_node() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Maps a `NodeExists` failure to `Ok(None)`; any other outcome passes through.
pub fn ignore_node_exists<T>(result: Result<T, CoordError>) -> Result<Option<T>, CoordError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_node_exists() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Deletes `path` and its whole subtree, children first.
///
/// Nodes that vanish mid-walk are tolerated; the walk treats `NoNode` as
/// success at every step.
pub async fn recursive_delete(coord: &dyn Coordinator, path: &str) -> Result<(), CoordError> {
    let children = match coord.get_children(path, None).await {
        Ok(listing) => listing.children,
        Err(e) if e.is_no_node() => return Ok(()),
        Err(e) => return Err(e),
    };
    for child in children {
        let child_path = format!("{path}/{child}");
        Box::pin(recursive_delete(coord, &child_path)).await?;
    }
    ignore_no_node(coord.delete(path, None).await).map(|_| ())
}

/// Resets `path`: recursively deletes whatever is there, then creates it
/// (with parents) carrying the given payload.
pub async fn delete_and_create(
    coord: &dyn Coordinator,
    path: &str,
    data: Option<Vec<u8>>,
    mode: CreateMode,
) -> Result<String, CoordError> {
    recursive_delete(coord, path).await?;
    coord.create(path, data, mode, true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::memory::MemCoordinator;

    #[test]
    fn ignore_adapters_pass_real_errors_through() {
        let missing: Result<(), _> = Err(CoordError::NoNode { path: "/a".into() });
        assert_eq!(ignore_no_node(missing), Ok(None));

        let exists: Result<(), _> = Err(CoordError::NodeExists { path: "/a".into() });
        assert_eq!(ignore_node_exists(exists), Ok(None));

        let lost: Result<(), _> = Err(CoordError::ConnectionLoss);
        assert_eq!(ignore_no_node(lost.clone()), Err(CoordError::ConnectionLoss));
        assert_eq!(ignore_node_exists(lost), Err(CoordError::ConnectionLoss));
    }

    #[tokio::test]
    async fn recursive_delete_removes_subtree() {
        let coord = MemCoordinator::new();
        coord
            .create("/a/b/c", Some(b"x".to_vec()), CreateMode::Persistent, true)
            .await
            .expect("create");
        coord
            .create("/a/b2", None, CreateMode::Persistent, true)
            .await
            .expect("create");

        recursive_delete(&coord, "/a").await.expect("delete");
        assert!(!coord.exists("/a"));
        assert!(!coord.exists("/a/b/c"));
    }

    #[tokio::test]
    async fn recursive_delete_of_missing_path_is_ok() {
        let coord = MemCoordinator::new();
        recursive_delete(&coord, "/nothing").await.expect("no-op");
    }

    #[tokio::test]
    async fn delete_and_create_resets_payload() {
        let coord = MemCoordinator::new();
        coord
            .create("/s/old", Some(b"junk".to_vec()), CreateMode::Persistent, true)
            .await
            .expect("create");

        delete_and_create(&coord, "/s", Some(b"fresh".to_vec()), CreateMode::Persistent)
            .await
            .expect("reset");
        assert_eq!(coord.node_data("/s").as_deref(), Some(&b"fresh"[..]));
        assert!(!coord.exists("/s/old"));
    }
}
