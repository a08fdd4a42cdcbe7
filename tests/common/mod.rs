//! Shared test fixtures: a scripted worker and polling helpers.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use servisor::{Cause, Message, MessageCallback, Service, ServiceListener, State};

/// Records messages handed to the worker callback. Commands named
/// `explode` fail the callback future to exercise the delete-anyway path.
pub struct Recorder {
    received: Mutex<Vec<(String, Message)>>,
}

#[async_trait]
impl MessageCallback for Recorder {
    async fn on_received(&self, id: &str, message: &Message) -> Result<(), Cause> {
        self.received
            .lock()
            .unwrap()
            .push((id.to_string(), message.clone()));
        if message.command() == "explode" {
            return Err(Arc::new(std::io::Error::other("callback exploded")) as Cause);
        }
        Ok(())
    }
}

/// A worker that reports RUNNING as soon as it is started and walks
/// STOPPING → TERMINATED on stop. Stop is idempotent.
pub struct TestWorker {
    listeners: Mutex<Vec<Arc<dyn ServiceListener>>>,
    state: Mutex<State>,
    recorder: Option<Arc<Recorder>>,
}

impl TestWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(Vec::new()),
            state: Mutex::new(State::Starting),
            recorder: Some(Arc::new(Recorder {
                received: Mutex::new(Vec::new()),
            })),
        })
    }

    pub fn without_callback() -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(Vec::new()),
            state: Mutex::new(State::Starting),
            recorder: None,
        })
    }

    /// Messages seen by the callback so far, in delivery order.
    pub fn received(&self) -> Vec<(String, Message)> {
        match &self.recorder {
            Some(recorder) => recorder.received.lock().unwrap().clone(),
            None => Vec::new(),
        }
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn ServiceListener>> {
        self.listeners.lock().unwrap().clone()
    }

    /// Swaps the state if it is not already terminal; returns the previous
    /// state when the swap happened.
    fn transition(&self, next: State) -> Option<State> {
        let mut state = self.state.lock().unwrap();
        if state.is_terminal() {
            return None;
        }
        let from = *state;
        *state = next;
        Some(from)
    }
}

#[async_trait]
impl Service for TestWorker {
    async fn start(&self) {
        for l in self.snapshot_listeners() {
            l.on_starting().await;
        }
        self.transition(State::Running);
        for l in self.snapshot_listeners() {
            l.on_running().await;
        }
    }

    async fn stop(&self) {
        let Some(from) = self.transition(State::Stopping) else {
            return;
        };
        for l in self.snapshot_listeners() {
            l.on_stopping(from).await;
        }
        self.transition(State::Terminated);
        for l in self.snapshot_listeners() {
            l.on_terminated(State::Stopping).await;
        }
    }

    fn add_listener(&self, listener: Arc<dyn ServiceListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn message_callback(&self) -> Option<Arc<dyn MessageCallback>> {
        self.recorder
            .as_ref()
            .map(|recorder| Arc::clone(recorder) as Arc<dyn MessageCallback>)
    }
}

/// Records the supervisor-level notifications, in order.
pub struct EventLog {
    pub events: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn entries(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceListener for EventLog {
    async fn on_starting(&self) {
        self.events.lock().unwrap().push("starting".into());
    }

    async fn on_running(&self) {
        self.events.lock().unwrap().push("running".into());
    }

    async fn on_stopping(&self, _from: State) {
        self.events.lock().unwrap().push("stopping".into());
    }

    async fn on_terminated(&self, _from: State) {
        self.events.lock().unwrap().push("terminated".into());
    }

    async fn on_failed(&self, _from: State, cause: Cause) {
        self.events.lock().unwrap().push(format!("failed: {cause}"));
    }
}

/// Polls `cond` until it holds or a 5s deadline passes.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
