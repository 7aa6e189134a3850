//! # Task Results
//!
//! The outcome record the receiver builds exactly once per message, and the failure
//! classification it carries.
//!
//! A [`TaskResult`] is either a success carrying the task's return value or an error
//! carrying a [`TaskErrorInfo`]. The two are mutually exclusive; deserialization
//! rejects payloads that violate this.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{QueueError, QueueResult};
use crate::state::TaskState;

/// Where in the pipeline a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Arguments or dependencies failed validation; the task never started
    Resolution,
    /// The task name is not registered on this worker
    NotFound,
    /// The task body returned an error
    Execution,
    /// The task body ran past its time limit
    Timeout,
    /// The task body panicked
    Panic,
    /// A middleware hook failed
    Middleware,
    /// The message was sent again, by the task or by an `on_error` hook; nothing is
    /// persisted for this attempt
    Requeued,
}

impl FailureKind {
    /// Retryability used when the failure itself doesn't say
    pub fn default_retryable(&self) -> bool {
        matches!(self, Self::Execution | Self::Timeout | Self::Requeued)
    }

    /// Whether the task body never began executing
    pub fn is_pre_execution(&self) -> bool {
        matches!(self, Self::Resolution | Self::NotFound)
    }
}

/// Captured failure detail stored in an error result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?} failure ({error_type}): {message}")]
pub struct TaskErrorInfo {
    pub kind: FailureKind,
    /// Domain-level error type, e.g. `InsufficientFunds` or `handler_timeout`
    pub error_type: String,
    pub message: String,
    pub retryable: bool,
}

impl TaskErrorInfo {
    pub fn new(kind: FailureKind, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            error_type: error_type.into(),
            message: message.into(),
            retryable: kind.default_retryable(),
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Classify an error returned by a task body.
    ///
    /// A [`TaskFailure`] anywhere in the error chain supplies the domain error type and
    /// retryability. A [`QueueError`] raised from inside the body (for instance a failed
    /// argument lookup) keeps its own classification.
    pub fn from_task_error(err: &anyhow::Error) -> Self {
        if let Some(failure) = err.chain().find_map(|e| e.downcast_ref::<TaskFailure>()) {
            return Self::new(FailureKind::Execution, &failure.error_type, &failure.message)
                .with_retryable(failure.retryable);
        }
        if let Some(queue_err) = err.downcast_ref::<QueueError>() {
            if matches!(queue_err, QueueError::NoResult) {
                return Self::new(FailureKind::Requeued, "requeued", queue_err.to_string());
            }
            if queue_err.is_resolution() {
                return Self::new(FailureKind::Resolution, "validation_error", queue_err.to_string());
            }
            return Self::new(FailureKind::Execution, "queue_error", queue_err.to_string());
        }
        Self::new(FailureKind::Execution, "task_error", format!("{err:#}"))
    }

    /// Classify a queue error raised outside the task body
    pub fn from_queue_error(err: &QueueError) -> Self {
        match err {
            QueueError::TaskNotFound { .. } => {
                Self::new(FailureKind::NotFound, "task_not_found", err.to_string())
            }
            QueueError::Middleware { .. } => {
                Self::new(FailureKind::Middleware, "middleware_error", err.to_string())
            }
            QueueError::Timeout { .. } => {
                Self::new(FailureKind::Timeout, "handler_timeout", err.to_string())
            }
            e if e.is_resolution() => {
                Self::new(FailureKind::Resolution, "validation_error", err.to_string())
            }
            _ => Self::new(FailureKind::Execution, "queue_error", err.to_string()),
        }
    }
}

/// Domain failure a task body can return to control classification
///
/// ```rust
/// use tasker_queue::TaskFailure;
///
/// fn withdraw(balance: i64, amount: i64) -> anyhow::Result<i64> {
///     if amount > balance {
///         return Err(TaskFailure::permanent("InsufficientFunds", "balance too low").into());
///     }
///     Ok(balance - amount)
/// }
/// # assert!(withdraw(1, 2).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error_type}: {message}")]
pub struct TaskFailure {
    pub error_type: String,
    pub message: String,
    pub retryable: bool,
}

impl TaskFailure {
    /// A failure an external retry policy may retry
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that must not be retried
    pub fn permanent(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(error_type, message)
        }
    }

    /// Explicitly ask for the message to be retried
    pub fn retry(message: impl Into<String>) -> Self {
        Self::new("Retry", message)
    }
}

/// Outcome record for one executed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaskResultRepr")]
pub struct TaskResult {
    is_err: bool,
    return_value: Value,
    error: Option<TaskErrorInfo>,
    execution_time_ms: u64,
    labels: HashMap<String, String>,
    log: Option<String>,
    completed_at: DateTime<Utc>,
}

impl TaskResult {
    /// Successful execution
    pub fn success(return_value: Value, execution_time: Duration) -> Self {
        Self {
            is_err: false,
            return_value,
            error: None,
            execution_time_ms: duration_ms(execution_time),
            labels: HashMap::new(),
            log: None,
            completed_at: Utc::now(),
        }
    }

    /// Failed execution
    pub fn failure(error: TaskErrorInfo, execution_time: Duration) -> Self {
        Self {
            is_err: true,
            return_value: Value::Null,
            error: Some(error),
            execution_time_ms: duration_ms(execution_time),
            labels: HashMap::new(),
            log: None,
            completed_at: Utc::now(),
        }
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    pub fn is_err(&self) -> bool {
        self.is_err
    }

    /// The task's return value, present only for successful executions
    pub fn return_value(&self) -> Option<&Value> {
        (!self.is_err).then_some(&self.return_value)
    }

    /// Deserialize the return value into a concrete type
    pub fn return_value_as<T: DeserializeOwned>(&self) -> QueueResult<T> {
        match self.return_value() {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Err(QueueError::serialization(
                "error result carries no return value",
            )),
        }
    }

    pub fn error(&self) -> Option<&TaskErrorInfo> {
        self.error.as_ref()
    }

    pub fn execution_time(&self) -> Duration {
        Duration::from_millis(self.execution_time_ms)
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn log(&self) -> Option<&str> {
        self.log.as_deref()
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// State this outcome maps to in the shared vocabulary
    pub fn state(&self) -> TaskState {
        match &self.error {
            None => TaskState::Success,
            Some(info) if info.retryable => TaskState::Retry,
            Some(_) => TaskState::Failure,
        }
    }

    /// Whether this outcome must be dropped instead of persisted
    pub fn is_requeued(&self) -> bool {
        matches!(&self.error, Some(info) if info.kind == FailureKind::Requeued)
    }

    /// Turn an error result into `Err`
    pub fn raise_for_error(self) -> Result<Self, TaskErrorInfo> {
        match self.error {
            Some(info) => Err(info),
            None => Ok(self),
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Deserialize)]
struct TaskResultRepr {
    is_err: bool,
    #[serde(default)]
    return_value: Value,
    #[serde(default)]
    error: Option<TaskErrorInfo>,
    #[serde(default)]
    execution_time_ms: u64,
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    log: Option<String>,
    completed_at: DateTime<Utc>,
}

impl TryFrom<TaskResultRepr> for TaskResult {
    type Error = String;

    fn try_from(repr: TaskResultRepr) -> Result<Self, Self::Error> {
        if repr.is_err != repr.error.is_some() {
            return Err(format!(
                "is_err={} disagrees with error presence",
                repr.is_err
            ));
        }
        if repr.is_err && !repr.return_value.is_null() {
            return Err("error result must not carry a return value".to_string());
        }
        Ok(Self {
            is_err: repr.is_err,
            return_value: repr.return_value,
            error: repr.error,
            execution_time_ms: repr.execution_time_ms,
            labels: repr.labels,
            log: repr.log,
            completed_at: repr.completed_at,
        })
    }
}
