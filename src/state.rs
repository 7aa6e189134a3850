//! # Task State and Progress
//!
//! The fixed state vocabulary shared by results and progress snapshots, plus the
//! [`TaskProgress`] snapshot itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// State of a task execution
///
/// The four well-known states serialize as `STARTED`, `SUCCESS`, `FAILURE` and `RETRY`.
/// Any other string is preserved verbatim as [`TaskState::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskState {
    Started,
    Success,
    Failure,
    Retry,
    Custom(String),
}

impl TaskState {
    /// Whether no further progress is expected after this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Whether this state asks an external policy to re-enqueue the message
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Started => "STARTED",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Retry => "RETRY",
            Self::Custom(s) => s,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for TaskState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "STARTED" => Self::Started,
            "SUCCESS" => Self::Success,
            "FAILURE" => Self::Failure,
            "RETRY" => Self::Retry,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for TaskState {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<TaskState> for String {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::Custom(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

/// Progress snapshot stored per task id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub state: TaskState,
    #[serde(default)]
    pub meta: Option<Value>,
}

impl TaskProgress {
    pub fn new(state: impl Into<TaskState>, meta: Option<Value>) -> Self {
        Self {
            state: state.into(),
            meta,
        }
    }
}
