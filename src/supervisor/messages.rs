//! # Command listener: watches the messages path and dispatches commands.
//!
//! Armed once the worker reports `RUNNING`. Each pass lists
//! `/<RunId>/messages` with a one-shot child watch, sorts the child names
//! ascending (the name is the message id; lexical order is delivery
//! order), and processes each child in turn.
//!
//! ## Architecture
//! ```text
//! messages path ──► CommandListener::run()
//!                        │  get_children + watch
//!                        │  sort ascending
//!                        ▼
//!                  per child: get_data
//!                        ├─► malformed  → delete at read version, log
//!                        ├─► SYSTEM/stop → Job::Stop  ──┐
//!                        └─► USER        → Job::User  ──┤
//!                                                       ▼
//!                                          Dispatcher (single consumer)
//!                                                       │ FIFO
//!                                                       ├─► callback → delete
//!                                                       └─► worker.stop → delete
//! ```
//!
//! ## Rules
//! - The dispatcher is the only serializing queue: user message handling
//!   and stop handling are mutually exclusive and ordered.
//! - Deletions are pinned to the version observed at read time.
//! - Only `NodeChildrenChanged` while the worker is still running re-arms
//!   the watch; any other event ends the listener and is logged.
//! - Delivery is at-most-once in normal operation: a deleted node is never
//!   redelivered. If the process dies before deletion, the message is
//!   redelivered after recovery.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::coordinator::client::{Coordinator, NodeEventKind};
use crate::coordinator::ops;
use crate::message::Message;
use crate::service::{MessageCallback, Service};
use crate::state::State;
use crate::supervisor::paths::RunPaths;

/// One unit of work for the dispatcher.
pub(crate) enum Job {
    /// Deliver a user message to the worker callback, then delete.
    User {
        id: String,
        message: Message,
        path: String,
        version: i32,
    },
    /// Stop the worker, then delete the stop message node.
    Stop { path: String, version: i32 },
}

/// Single-consumer queue executing [`Job`]s in FIFO order.
pub(crate) struct Dispatcher {
    coord: Arc<dyn Coordinator>,
    worker: Arc<dyn Service>,
    callback: Option<Arc<dyn MessageCallback>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        coord: Arc<dyn Coordinator>,
        worker: Arc<dyn Service>,
        cancel: CancellationToken,
    ) -> Self {
        let callback = worker.message_callback();
        Self {
            coord,
            worker,
            callback,
            cancel,
        }
    }

    /// Consumes jobs until the queue closes or the supervisor tears down.
    /// An in-flight job always runs to completion.
    pub(crate) fn spawn(self, mut rx: mpsc::Receiver<Job>) {
        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };
                self.execute(job).await;
            }
        });
    }

    async fn execute(&self, job: Job) {
        match job {
            Job::User {
                id,
                message,
                path,
                version,
            } => {
                if let Some(callback) = &self.callback {
                    if let Err(cause) = callback.on_received(&id, &message).await {
                        error!(%id, %path, error = %cause, "message callback failed");
                    }
                }
                if let Err(e) = self.coord.delete(&path, Some(version)).await {
                    error!(%path, error = e.as_label(), "message delete failed");
                }
            }
            Job::Stop { path, version } => {
                self.worker.stop().await;
                // The run subtree may already be gone by the time the
                // worker has stopped.
                if let Err(e) =
                    ops::ignore_no_node(self.coord.delete(&path, Some(version)).await)
                {
                    error!(%path, error = e.as_label(), "stop message delete failed");
                }
            }
        }
    }
}

/// Watch-driven reader of the messages path.
pub(crate) struct CommandListener {
    coord: Arc<dyn Coordinator>,
    paths: RunPaths,
    dispatch: mpsc::Sender<Job>,
    has_callback: bool,
    state_rx: watch::Receiver<State>,
    cancel: CancellationToken,
}

impl CommandListener {
    pub(crate) fn new(
        coord: Arc<dyn Coordinator>,
        paths: RunPaths,
        dispatch: mpsc::Sender<Job>,
        has_callback: bool,
        state_rx: watch::Receiver<State>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            coord,
            paths,
            dispatch,
            has_callback,
            state_rx,
            cancel,
        }
    }

    pub(crate) fn spawn(self) {
        tokio::spawn(self.run());
    }

    async fn run(self) {
        loop {
            let (watch_tx, watch_rx) = oneshot::channel();
            match self
                .coord
                .get_children(self.paths.messages(), Some(watch_tx))
                .await
            {
                Ok(listing) => {
                    // The child name is the message id; lexical order is
                    // delivery order.
                    let mut ids = listing.children;
                    ids.sort();
                    for id in ids {
                        self.process_message(&id).await;
                    }
                }
                Err(e) => {
                    error!(path = %self.paths.messages(), error = %e, "failed to watch messages");
                    return;
                }
            }

            let event = tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = watch_rx => match event {
                    Ok(event) => event,
                    Err(_) => return,
                },
            };
            let running = *self.state_rx.borrow() == State::Running;
            if event.kind == NodeEventKind::NodeChildrenChanged && running {
                continue;
            }
            debug!(kind = ?event.kind, running, "message watch not re-armed");
            return;
        }
    }

    async fn process_message(&self, id: &str) {
        let path = self.paths.message(id);
        let node = match self.coord.get_data(&path).await {
            Ok(node) => node,
            Err(e) => {
                error!(%path, error = %e, "failed to fetch message content");
                return;
            }
        };

        let Some(message) = Message::decode(&node.data) else {
            error!(id, %path, "failed to decode message");
            self.delete_logged(&path, node.version).await;
            return;
        };
        debug!(id, command = message.command(), "message received");

        if message.is_stop() {
            // Never delivered to the worker callback.
            let _ = self
                .dispatch
                .send(Job::Stop {
                    path,
                    version: node.version,
                })
                .await;
            return;
        }

        if !self.has_callback {
            debug!(id, %path, "ignoring incoming message, worker has no callback");
            self.delete_logged(&path, node.version).await;
            return;
        }
        let _ = self
            .dispatch
            .send(Job::User {
                id: id.to_string(),
                message,
                path,
                version: node.version,
            })
            .await;
    }

    async fn delete_logged(&self, path: &str, version: i32) {
        if let Err(e) = self.coord.delete(path, Some(version)).await {
            error!(path, error = e.as_label(), "message delete failed");
        }
    }
}
