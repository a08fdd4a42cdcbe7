//! # Consumer contracts expected of the hosted worker.
//!
//! This module defines the [`Service`] trait (async start/stop with
//! listener registration) that a worker must implement to be supervised,
//! the [`ServiceListener`] hooks through which lifecycle transitions are
//! observed, and the optional [`MessageCallback`] for receiving user
//! commands from the messages path.
//!
//! A worker reports its own transitions to every registered listener, in
//! registration order. The supervisor installs one listener to mirror the
//! worker onto the coordination store and exposes the same listener surface
//! for its own observers.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use servisor::{Service, ServiceListener};
//!
//! struct Worker {
//!     // channels, sockets, ...
//! #   listeners: std::sync::Mutex<Vec<Arc<dyn ServiceListener>>>,
//! }
//!
//! #[async_trait]
//! impl Service for Worker {
//!     async fn start(&self) {
//!         // bring the worker up, then report transitions to listeners
//!     }
//!     async fn stop(&self) {
//!         // wind the worker down
//!     }
//!     fn add_listener(&self, listener: Arc<dyn ServiceListener>) {
//! #       self.listeners.lock().unwrap().push(listener);
//!     }
//! }
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::message::Message;
use crate::state::State;

/// Failure cause carried through terminal notifications.
pub type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// # A supervisable worker.
///
/// A `Service` owns its own state machine; [`start`](Service::start) and
/// [`stop`](Service::stop) initiate transitions, and the resulting state
/// changes are reported through registered [`ServiceListener`]s. Both calls
/// must be idempotent once a terminal state is reached.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Begins startup. Transitions are reported through listeners.
    async fn start(&self);

    /// Begins shutdown. Must be safe to call more than once.
    async fn stop(&self);

    /// Registers a lifecycle listener.
    ///
    /// Listeners registered after a transition happened do not see it
    /// retroactively.
    fn add_listener(&self, listener: Arc<dyn ServiceListener>);

    /// Returns the worker's message callback, if it accepts user commands.
    ///
    /// Workers without a callback have their messages discarded (and the
    /// nodes deleted) by the supervisor.
    fn message_callback(&self) -> Option<Arc<dyn MessageCallback>> {
        None
    }
}

/// # Lifecycle transition hooks.
///
/// All hooks default to no-ops so implementors pick only the transitions
/// they care about. Hooks are awaited one listener at a time; keep them
/// short and non-blocking.
#[async_trait]
pub trait ServiceListener: Send + Sync + 'static {
    /// The worker entered `STARTING`.
    async fn on_starting(&self) {}

    /// The worker entered `RUNNING`.
    async fn on_running(&self) {}

    /// The worker entered `STOPPING`.
    async fn on_stopping(&self, _from: State) {}

    /// The worker reached `TERMINATED`.
    async fn on_terminated(&self, _from: State) {}

    /// The worker reached `FAILED`.
    async fn on_failed(&self, _from: State, _cause: Cause) {}
}

/// # Message receiving capability.
///
/// Invoked on the supervisor's serialized callback queue, one message at a
/// time, in ascending lexical order of the message-node names. Completion
/// of the returned future (success or failure) gates deletion of the
/// message node.
#[async_trait]
pub trait MessageCallback: Send + Sync + 'static {
    /// Handles one message. A returned error is logged; the node is
    /// deleted either way.
    async fn on_received(&self, id: &str, message: &Message) -> Result<(), Cause>;
}

/// Fan-out holder for lifecycle listeners.
///
/// Notifications run on the caller's task, sequentially in registration
/// order. The lock is never held across an await.
pub(crate) struct ListenerSet {
    inner: Mutex<Vec<Arc<dyn ServiceListener>>>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn ServiceListener>) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    fn snapshot(&self) -> Vec<Arc<dyn ServiceListener>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) async fn notify_starting(&self) {
        for l in self.snapshot() {
            l.on_starting().await;
        }
    }

    pub(crate) async fn notify_running(&self) {
        for l in self.snapshot() {
            l.on_running().await;
        }
    }

    pub(crate) async fn notify_stopping(&self, from: State) {
        for l in self.snapshot() {
            l.on_stopping(from).await;
        }
    }

    pub(crate) async fn notify_terminated(&self, from: State) {
        for l in self.snapshot() {
            l.on_terminated(from).await;
        }
    }

    pub(crate) async fn notify_failed(&self, from: State, cause: &Cause) {
        for l in self.snapshot() {
            l.on_failed(from, Arc::clone(cause)).await;
        }
    }
}
