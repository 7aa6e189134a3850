//! # Task Message
//!
//! The immutable wire envelope that travels from a producer, through the broker, to a
//! receiver.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Label carrying the per-task execution timeout in seconds
pub const TIMEOUT_LABEL: &str = "timeout";
/// Label enabling the retry middleware for a message
pub const RETRY_ON_ERROR_LABEL: &str = "retry_on_error";
/// Label overriding the retry middleware's maximum attempts
pub const MAX_RETRIES_LABEL: &str = "max_retries";
/// Label counting retries already performed
pub const RETRIES_LABEL: &str = "_retries";
/// Label counting explicit requeues performed by the task itself
pub const REQUEUE_LABEL: &str = "requeue_count";

/// Message sent to the broker for one task invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    /// Opaque unique id, generated by the broker or supplied by the caller
    pub task_id: String,
    /// Registry key of the task to run
    pub task_name: String,
    /// Routing and policy metadata
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TaskMessage {
    /// Create a message without arguments or labels
    pub fn new(task_id: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_name: task_name.into(),
            labels: HashMap::new(),
            args: Vec::new(),
            kwargs: Map::new(),
        }
    }

    /// Replace the positional arguments
    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    /// Add one keyword argument
    pub fn with_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    /// Add one label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Look up a label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Parse a label, ignoring values that don't parse
    pub fn parsed_label<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.label(key).and_then(|v| v.trim().parse().ok())
    }

    /// Whether a label is set to a truthy value
    pub fn label_flag(&self, key: &str) -> Option<bool> {
        self.label(key)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
    }

    /// Per-message timeout taken from the `timeout` label (seconds).
    ///
    /// Values that are not positive or don't fit a `Duration` are ignored.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.parsed_label::<f64>(TIMEOUT_LABEL)
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| std::time::Duration::try_from_secs_f64(secs).ok())
    }
}
