use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::error;

use crate::coordinator::client::Coordinator;
use crate::error::CoordError;
use crate::state::{State, StateNode};

/// Publishes the worker's lifecycle state to `/<RunId>/state`.
///
/// The first failed write latches the coordinator-failure flag; every
/// later write is skipped. The latch is read by the supervisor's terminal
/// branch to decide whether store cleanup is still attempted.
pub(crate) struct StateWriter {
    coord: Arc<dyn Coordinator>,
    path: String,
    latched: AtomicBool,
}

impl StateWriter {
    pub(crate) fn new(coord: Arc<dyn Coordinator>, path: &str) -> Self {
        Self {
            coord,
            path: path.to_string(),
            latched: AtomicBool::new(false),
        }
    }

    /// Writes the given state; skipped entirely once latched.
    ///
    /// The returned error is the write failure that latched the flag; the
    /// caller owns the shutdown-and-report policy.
    pub(crate) async fn save(&self, state: State) -> Result<(), CoordError> {
        if self.latched() {
            return Ok(());
        }
        let bytes = StateNode::new(state).encode();
        match self.coord.set_data(&self.path, bytes).await {
            Ok(_version) => Ok(()),
            Err(e) => {
                error!(path = %self.path, state = ?state, error = %e, "state write failed");
                self.latched.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// True once any write has failed.
    pub(crate) fn latched(&self) -> bool {
        self.latched.load(Ordering::SeqCst)
    }
}
