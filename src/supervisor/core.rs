//! # Supervisor: mirrors a worker's lifecycle onto the coordination store.
//!
//! [`ServiceSupervisor`] decorates a hosted worker so that its state
//! transitions are published under `/<RunId>/state`, its presence is
//! advertised as an ephemeral node under `/instances/<RunId>`, and inbound
//! commands written under `/<RunId>/messages` reach it in order.
//!
//! ## Architecture
//! ```text
//! start()
//!   ├──► create live node (ephemeral, NodeExists swallowed)
//!   ├──► reset /<id>/state (STARTING) + /<id>/messages   (parallel)
//!   ├──► install worker listener ──► lifecycle event loop
//!   └──► worker.start()
//!
//! event loop (owned task, no re-entrant callbacks)
//!   STARTING  ──► write state
//!   RUNNING   ──► notify observers, arm command listener, write state
//!   STOPPING  ──► write state
//!   TERMINATED│FAILED
//!             ──► remove live node + delete /<id> subtree (parallel)
//!             ──► run finalizer once, notify observers, settle terminal
//! ```
//!
//! ## Rules
//! - A failed state write latches the coordinator-failure flag: the worker
//!   is forced down, the run reports `FAILED` with the write error, and
//!   the terminal branch skips all further store writes.
//! - Any unresolved store error during terminal cleanup also reports
//!   `FAILED`; a run is never reported `TERMINATED` over a partial
//!   cleanup.
//! - The published state sequence never regresses.
//! - The finalizer runs exactly once, on either terminal branch; a panic
//!   inside it is logged and changes nothing.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::coordinator::client::{Coordinator, CreateMode};
use crate::coordinator::ops;
use crate::error::CoordError;
use crate::run_id::RunId;
use crate::service::{Cause, ListenerSet, Service, ServiceListener};
use crate::state::{State, StateNode};
use crate::supervisor::live::LiveNode;
use crate::supervisor::messages::{CommandListener, Dispatcher, Job};
use crate::supervisor::paths::RunPaths;
use crate::supervisor::state_writer::StateWriter;

type Finalizer = Box<dyn FnOnce() + Send + 'static>;

/// Worker transition as seen by the supervisor's event loop.
enum LifecycleEvent {
    Starting,
    Running,
    Stopping { from: State },
    Terminated { from: State },
    Failed { from: State, cause: Cause },
}

/// Listener installed on the worker; forwards transitions onto the
/// supervisor's own loop so no store I/O runs on the worker's callers.
struct ChannelListener {
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

#[async_trait]
impl ServiceListener for ChannelListener {
    async fn on_starting(&self) {
        let _ = self.tx.send(LifecycleEvent::Starting);
    }

    async fn on_running(&self) {
        let _ = self.tx.send(LifecycleEvent::Running);
    }

    async fn on_stopping(&self, from: State) {
        let _ = self.tx.send(LifecycleEvent::Stopping { from });
    }

    async fn on_terminated(&self, from: State) {
        let _ = self.tx.send(LifecycleEvent::Terminated { from });
    }

    async fn on_failed(&self, from: State, cause: Cause) {
        let _ = self.tx.send(LifecycleEvent::Failed { from, cause });
    }
}

/// Decorates a worker with store-mirrored lifecycle, presence, and
/// command delivery.
pub struct ServiceSupervisor {
    inner: Arc<Inner>,
}

struct Inner {
    coord: Arc<dyn Coordinator>,
    run_id: RunId,
    paths: RunPaths,
    worker: Arc<dyn Service>,
    live: LiveNode,
    writer: StateWriter,
    listeners: ListenerSet,
    /// Write error that latched the coordinator-failure flag; reported as
    /// the terminal cause.
    pending_failure: Mutex<Option<Cause>>,
    finalizer: Mutex<Option<Finalizer>>,
    state_tx: watch::Sender<State>,
    dispatch_tx: mpsc::Sender<Job>,
    dispatch_rx: Mutex<Option<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
}

impl ServiceSupervisor {
    /// Creates a supervisor with the default [`Config`].
    ///
    /// `live_content` is embedded in the live node as `{"data": …}`.
    pub fn new(
        coord: Arc<dyn Coordinator>,
        run_id: RunId,
        live_content: serde_json::Value,
        worker: Arc<dyn Service>,
    ) -> Self {
        Self::with_config(coord, run_id, live_content, worker, Config::default())
    }

    /// Creates a supervisor with an explicit [`Config`].
    pub fn with_config(
        coord: Arc<dyn Coordinator>,
        run_id: RunId,
        live_content: serde_json::Value,
        worker: Arc<dyn Service>,
        config: Config,
    ) -> Self {
        let paths = RunPaths::new(&run_id);
        let live = LiveNode::new(Arc::clone(&coord), paths.live(), live_content);
        let writer = StateWriter::new(Arc::clone(&coord), paths.state());
        let (state_tx, _state_rx) = watch::channel(State::Starting);
        let (dispatch_tx, dispatch_rx) =
            mpsc::channel(config.callback_queue_capacity.max(1));

        Self {
            inner: Arc::new(Inner {
                coord,
                run_id,
                paths,
                worker,
                live,
                writer,
                listeners: ListenerSet::new(),
                pending_failure: Mutex::new(None),
                finalizer: Mutex::new(None),
                state_tx,
                dispatch_tx,
                dispatch_rx: Mutex::new(Some(dispatch_rx)),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Installs a hook that runs exactly once when the run reaches a
    /// terminal state. Its panic is logged and does not alter the
    /// reported state.
    pub fn with_finalizer(self, finalizer: impl FnOnce() + Send + 'static) -> Self {
        *self
            .inner
            .finalizer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Box::new(finalizer));
        self
    }

    /// Registers an observer of the supervised run's own lifecycle.
    pub fn add_listener(&self, listener: Arc<dyn ServiceListener>) {
        self.inner.listeners.add(listener);
    }

    /// Returns the run identity this supervisor owns.
    pub fn run_id(&self) -> &RunId {
        &self.inner.run_id
    }

    /// Returns the current supervised state.
    pub fn state(&self) -> State {
        *self.inner.state_tx.borrow()
    }

    /// Waits until the run reaches `TERMINATED` or `FAILED` and returns
    /// that state.
    pub async fn await_terminal(&self) -> State {
        let mut rx = self.inner.state_tx.subscribe();
        let result = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            // The sender lives as long as `inner`; closure means the
            // process is tearing down anyway.
            Err(_) => *self.inner.state_tx.borrow(),
        };
        result
    }

    /// Sets up the run namespace and starts the worker.
    ///
    /// Namespace setup failures are returned *and* reported through the
    /// `failed` notification, so observers see the same outcome as
    /// callers. A second call is a no-op.
    pub async fn start(&self) -> Result<(), CoordError> {
        let inner = &self.inner;
        let dispatch_rx = inner
            .dispatch_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(dispatch_rx) = dispatch_rx else {
            return Ok(());
        };
        Dispatcher::new(
            Arc::clone(&inner.coord),
            Arc::clone(&inner.worker),
            inner.cancel.child_token(),
        )
        .spawn(dispatch_rx);

        if let Err(e) = inner.initialize().await {
            inner.fail_before_start(Arc::new(e.clone())).await;
            return Err(e);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        inner
            .worker
            .add_listener(Arc::new(ChannelListener { tx: event_tx }));
        tokio::spawn(run_event_loop(Arc::clone(inner), event_rx));
        inner.worker.start().await;
        Ok(())
    }

    /// Requests a graceful stop; the worker's terminal transition drives
    /// namespace teardown. Wait with [`await_terminal`](Self::await_terminal).
    pub async fn stop(&self) {
        self.inner.worker.stop().await;
    }
}

impl Inner {
    /// Creates the live node, then resets the state and messages paths.
    async fn initialize(&self) -> Result<(), CoordError> {
        self.live.create().await?;

        let state_bytes = StateNode::new(State::Starting).encode();
        let (state_res, messages_res) = tokio::join!(
            ops::delete_and_create(
                self.coord.as_ref(),
                self.paths.state(),
                Some(state_bytes),
                CreateMode::Persistent,
            ),
            ops::delete_and_create(
                self.coord.as_ref(),
                self.paths.messages(),
                None,
                CreateMode::Persistent,
            ),
        );
        state_res?;
        messages_res?;
        Ok(())
    }

    async fn save_state(&self, state: State) {
        if let Err(e) = self.writer.save(state).await {
            // The writer latched; remember the cause and force the worker
            // down. The terminal branch reports FAILED with it.
            *self
                .pending_failure
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(e));
            self.worker.stop().await;
        }
    }

    fn arm_command_listener(&self) {
        CommandListener::new(
            Arc::clone(&self.coord),
            self.paths.clone(),
            self.dispatch_tx.clone(),
            self.worker.message_callback().is_some(),
            self.state_tx.subscribe(),
            self.cancel.child_token(),
        )
        .spawn();
    }

    /// Advances the published state, rejecting regressions.
    fn advance(&self, next: State) {
        self.state_tx.send_if_modified(|current| {
            if next.rank() > current.rank() {
                *current = next;
                true
            } else {
                false
            }
        });
    }

    fn take_pending_failure(&self) -> Option<Cause> {
        self.pending_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn run_finalizer(&self) {
        let finalizer = self
            .finalizer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(finalizer) = finalizer {
            if std::panic::catch_unwind(AssertUnwindSafe(finalizer)).is_err() {
                warn!(run_id = %self.run_id, "finalizer panicked");
            }
        }
    }

    /// Terminal branch for a setup failure: nothing to clean up yet
    /// beyond best-effort removal of whatever initialize() managed to
    /// create.
    async fn fail_before_start(&self, cause: Cause) {
        warn!(run_id = %self.run_id, error = %cause, "failed to set up run namespace");
        let _ = self.live.remove().await;
        let _ = ops::recursive_delete(self.coord.as_ref(), self.paths.root()).await;
        self.settle(State::Starting, Some(cause)).await;
    }

    /// Terminal branch: store cleanup, finalizer, observer notification.
    async fn finish(&self, from: State, cause: Option<Cause>) {
        // A latched write error takes precedence as the reported cause.
        let failure = self.take_pending_failure().or(cause);

        if self.writer.latched() {
            let failure = failure.unwrap_or_else(|| {
                Arc::new(CoordError::Failure {
                    reason: "coordination writes latched as failed".to_string(),
                })
            });
            self.settle(from, Some(failure)).await;
            return;
        }

        let (live_res, subtree_res) = tokio::join!(
            self.live.remove(),
            ops::recursive_delete(self.coord.as_ref(), self.paths.root()),
        );
        let cleanup = live_res.and(subtree_res);

        match (failure, cleanup) {
            (None, Ok(())) => {
                info!(run_id = %self.run_id, "service and state nodes removed");
                self.settle(from, None).await;
            }
            (None, Err(e)) => {
                // A clean worker exit with unresolved store errors is still
                // a failed run.
                warn!(run_id = %self.run_id, error = %e, "failed to remove store nodes");
                self.settle(from, Some(Arc::new(e))).await;
            }
            (Some(cause), cleanup) => {
                if let Err(e) = cleanup {
                    warn!(run_id = %self.run_id, error = %e, "failed to remove store nodes");
                }
                self.settle(from, Some(cause)).await;
            }
        }
    }

    async fn settle(&self, from: State, failure: Option<Cause>) {
        self.cancel.cancel();
        self.run_finalizer();
        match failure {
            None => {
                info!(run_id = %self.run_id, "terminated");
                self.advance(State::Terminated);
                self.listeners.notify_terminated(from).await;
            }
            Some(cause) => {
                warn!(run_id = %self.run_id, error = %cause, "failed");
                self.advance(State::Failed);
                self.listeners.notify_failed(from, &cause).await;
            }
        }
    }
}

async fn run_event_loop(
    inner: Arc<Inner>,
    mut rx: mpsc::UnboundedReceiver<LifecycleEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            LifecycleEvent::Starting => {
                info!(run_id = %inner.run_id, "starting");
                inner.advance(State::Starting);
                inner.listeners.notify_starting().await;
                inner.save_state(State::Starting).await;
            }
            LifecycleEvent::Running => {
                info!(run_id = %inner.run_id, "running");
                inner.advance(State::Running);
                inner.listeners.notify_running().await;
                inner.arm_command_listener();
                inner.save_state(State::Running).await;
            }
            LifecycleEvent::Stopping { from } => {
                info!(run_id = %inner.run_id, "stopping");
                inner.advance(State::Stopping);
                inner.listeners.notify_stopping(from).await;
                inner.save_state(State::Stopping).await;
            }
            LifecycleEvent::Terminated { from } => {
                inner.finish(from, None).await;
                break;
            }
            LifecycleEvent::Failed { from, cause } => {
                inner.finish(from, Some(cause)).await;
                break;
            }
        }
    }
}
