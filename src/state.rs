//! # Lifecycle states and the serialized state record.
//!
//! [`State`] classifies the lifecycle of a supervised worker; [`StateNode`]
//! is the record written to the coordination store on every transition.
//!
//! ## Wire format
//! ```text
//! {"state":"RUNNING"}
//! {"state":"FAILED","error":{"message":"...","stackTrace":[
//!     {"className":"...","methodName":"...","fileName":"...","lineNumber":42}]}}
//! ```
//!
//! Decoding a malformed or unknown payload yields `None`; the caller states
//! its policy per use (the command listener deletes such nodes, the
//! discovery resolver drops such members).

use serde::{Deserialize, Serialize};

use crate::service::Cause;

/// Lifecycle state of a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Startup is in progress.
    Starting,
    /// The worker is serving.
    Running,
    /// Shutdown is in progress.
    Stopping,
    /// The worker exited cleanly.
    Terminated,
    /// The worker exited with a failure.
    Failed,
}

impl State {
    /// True for `Terminated` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Terminated | State::Failed)
    }

    /// Ordering rank used to reject regressions (RUNNING never goes back
    /// to STARTING).
    pub(crate) fn rank(self) -> u8 {
        match self {
            State::Starting => 0,
            State::Running => 1,
            State::Stopping => 2,
            State::Terminated => 3,
            State::Failed => 3,
        }
    }
}

/// One frame of a serialized failure trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    /// Declaring type of the frame.
    pub class_name: String,
    /// Method executing in the frame.
    pub method_name: String,
    /// Source file of the frame.
    pub file_name: String,
    /// Source line of the frame.
    pub line_number: i32,
}

/// Failure detail carried by a [`StateNode`] in the `FAILED` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Failure message.
    pub message: String,
    /// Serialized trace frames, possibly empty.
    #[serde(rename = "stackTrace", default, skip_serializing_if = "Vec::is_empty")]
    pub stack_trace: Vec<StackFrame>,
}

impl ErrorInfo {
    /// Builds failure detail from an arbitrary cause, without trace frames.
    pub fn from_cause(cause: &Cause) -> Self {
        Self {
            message: cause.to_string(),
            stack_trace: Vec::new(),
        }
    }
}

/// The record published at `/<RunId>/state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateNode {
    /// Current lifecycle state.
    pub state: State,
    /// Failure detail, present only for `FAILED`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl StateNode {
    /// Builds a record without failure detail.
    pub fn new(state: State) -> Self {
        Self { state, error: None }
    }

    /// Builds a `FAILED` record carrying the given detail.
    pub fn failed(error: ErrorInfo) -> Self {
        Self {
            state: State::Failed,
            error: Some(error),
        }
    }

    /// Encodes the record to its JSON byte form.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("state node serializes to JSON")
    }

    /// Decodes a JSON byte form; `None` for malformed payloads.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}
