//! # Queue Error Types
//!
//! Structured error handling for the task queue core using thiserror.
//!
//! Task bodies never surface these errors to the receive loop: the receiver converts
//! every failure into an error [`TaskResult`](crate::result::TaskResult). `QueueError`
//! is what the infrastructure (brokers, backends, registry building, configuration)
//! returns to its direct callers.

use thiserror::Error;

/// Errors produced by the queue infrastructure
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Resolution error for task {task_name}: {message}")]
    Resolution { task_name: String, message: String },

    #[error("Task not found in registry: {task_name}")]
    TaskNotFound { task_name: String },

    #[error("Task already registered: {task_name}")]
    DuplicateTask { task_name: String },

    #[error("Dependency cycle detected: {path}")]
    DependencyCycle { path: String },

    #[error("Unknown dependency {dependency} required by {required_by}")]
    UnknownDependency {
        dependency: String,
        required_by: String,
    },

    #[error("Middleware {middleware} failed in {hook}: {message}")]
    Middleware {
        middleware: String,
        hook: String,
        message: String,
    },

    #[error("Transport error: {operation}: {message}")]
    Transport { operation: String, message: String },

    #[error("Storage error: {operation}: {message}")]
    Storage { operation: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Receiver is already listening on this broker")]
    AlreadyRunning,

    #[error("Task produced no result to persist")]
    NoResult,
}

impl QueueError {
    /// Create a resolution (argument validation) error
    pub fn resolution(task_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolution {
            task_name: task_name.into(),
            message: message.into(),
        }
    }

    /// Create a task not found error
    pub fn task_not_found(task_name: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_name: task_name.into(),
        }
    }

    /// Create a middleware error
    pub fn middleware(
        middleware: impl Into<String>,
        hook: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Middleware {
            middleware: middleware.into(),
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether this error came from argument or dependency validation
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::Resolution { .. } | Self::UnknownDependency { .. } | Self::DependencyCycle { .. }
        )
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::serialization(err.to_string())
    }
}

impl From<config::ConfigError> for QueueError {
    fn from(err: config::ConfigError) -> Self {
        QueueError::configuration("config", err.to_string())
    }
}

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
