//! # Discovery resolver: live membership views.
//!
//! A [`ServiceView`] holds an atomically swappable reference to an
//! immutable membership snapshot. A background task per service keeps the
//! snapshot current: each pass lists the service's children with a
//! one-shot watch, fetches every child's payload in parallel, and swaps
//! the snapshot in when all fetches have resolved.
//!
//! ## Rules
//! - Partial failure of sibling fetches keeps the successful ones: the
//!   view prefers availability over completeness on transient reads; the
//!   next watch firing corrects it.
//! - Decoding errors drop that child from the snapshot.
//! - Snapshots are monotone only within a single watch epoch; across a
//!   reconnection the view may transiently shrink and regrow.

use std::sync::{Arc, RwLock};

use futures::future::join_all;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::coordinator::client::{Coordinator, CreateMode};
use crate::coordinator::ops;
use crate::discovery::Discoverable;

/// Live, iterable view of one service's membership.
///
/// Each iteration starts from the snapshot current at that moment and
/// traverses a frozen list; concurrent updates become visible on the next
/// iteration.
#[derive(Clone)]
pub struct ServiceView {
    snapshot: Arc<RwLock<Arc<Vec<Discoverable>>>>,
}

impl ServiceView {
    pub(crate) fn empty() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Arc::new(Vec::new()))),
        }
    }

    /// Returns the current frozen snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Discoverable>> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Iterates over the current snapshot.
    pub fn iter(&self) -> ServiceViewIter {
        ServiceViewIter {
            snapshot: self.snapshot(),
            index: 0,
        }
    }

    /// Number of members in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// True if the current snapshot has no members.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    fn install(&self, members: Vec<Discoverable>) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(members);
    }
}

impl<'a> IntoIterator for &'a ServiceView {
    type Item = Discoverable;
    type IntoIter = ServiceViewIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over one frozen membership snapshot.
pub struct ServiceViewIter {
    snapshot: Arc<Vec<Discoverable>>,
    index: usize,
}

impl Iterator for ServiceViewIter {
    type Item = Discoverable;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.snapshot.get(self.index).cloned();
        self.index += 1;
        item
    }
}

/// Creates a view for `base` and spawns the task keeping it current.
pub(crate) fn install(
    coord: Arc<dyn Coordinator>,
    base: String,
    cancel: CancellationToken,
) -> ServiceView {
    let view = ServiceView::empty();
    tokio::spawn(watch_members(coord, base, view.clone(), cancel));
    view
}

async fn watch_members(
    coord: Arc<dyn Coordinator>,
    base: String,
    view: ServiceView,
    cancel: CancellationToken,
) {
    // The service may not have registered yet; materialize the base so the
    // child watch can be installed. Registration creates parents too, so
    // both sides converge on the same node.
    if let Err(e) = ops::ignore_node_exists(
        coord
            .create(&base, None, CreateMode::Persistent, true)
            .await,
    ) {
        error!(%base, error = %e, "failed to prepare service base");
        return;
    }

    loop {
        let (watch_tx, watch_rx) = oneshot::channel();
        let listing = match coord.get_children(&base, Some(watch_tx)).await {
            Ok(listing) => listing,
            Err(e) => {
                error!(%base, error = %e, "failed to list service members");
                return;
            }
        };

        let fetches = listing.children.iter().map(|child| {
            let coord = Arc::clone(&coord);
            let path = format!("{base}/{child}");
            async move { coord.get_data(&path).await }
        });
        let results = join_all(fetches).await;

        let mut members = Vec::with_capacity(results.len());
        for result in results {
            // Fetch failures and undecodable payloads drop the member.
            let Ok(node) = result else { continue };
            if let Some(discoverable) = Discoverable::decode(&node.data) {
                members.push(discoverable);
            }
        }
        view.install(members);

        tokio::select! {
            _ = cancel.cancelled() => return,
            event = watch_rx => {
                if event.is_err() {
                    return;
                }
            }
        }
    }
}
