use std::sync::Arc;

use tracing::info;

use crate::coordinator::client::{Coordinator, CreateMode};
use crate::coordinator::ops;
use crate::error::CoordError;

/// Manages the ephemeral presence marker under `/instances/<RunId>`.
///
/// The marker's content wraps the caller-supplied payload as
/// `{"data": <payload>}`. Creation swallows `NodeExists`: the prior
/// owner's session will eventually expire, or ownership is ambiguous by
/// design. Removal swallows `NoNode`.
pub(crate) struct LiveNode {
    coord: Arc<dyn Coordinator>,
    path: String,
    content: serde_json::Value,
}

impl LiveNode {
    pub(crate) fn new(coord: Arc<dyn Coordinator>, path: &str, content: serde_json::Value) -> Self {
        Self {
            coord,
            path: path.to_string(),
            content,
        }
    }

    pub(crate) async fn create(&self) -> Result<(), CoordError> {
        info!(path = %self.path, "creating live node");
        let wrapped = serde_json::json!({ "data": self.content });
        let bytes = wrapped.to_string().into_bytes();
        ops::ignore_node_exists(
            self.coord
                .create(&self.path, Some(bytes), CreateMode::Ephemeral, true)
                .await,
        )
        .map(|_| ())
    }

    pub(crate) async fn remove(&self) -> Result<(), CoordError> {
        info!(path = %self.path, "removing live node");
        ops::ignore_no_node(self.coord.delete(&self.path, None).await).map(|_| ())
    }
}
