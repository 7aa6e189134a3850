//! # Configuration
//!
//! Layered configuration for the queue: built-in defaults, then an optional TOML file,
//! then `TASKER_QUEUE__`-prefixed environment variables.
//!
//! ```toml
//! [receiver]
//! max_async_tasks = 50
//! max_blocking_workers = 4
//! task_timeout_ms = 30000
//!
//! [logging]
//! level = "info"
//! json = true
//! ```
//!
//! The same settings from the environment:
//! `TASKER_QUEUE__RECEIVER__MAX_ASYNC_TASKS=50`, `TASKER_QUEUE__LOGGING__JSON=true`.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{QueueError, QueueResult};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TASKER_QUEUE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub receiver: ReceiverConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Concurrent non-blocking executions; `None` or `0` is unlimited
    pub max_async_tasks: Option<usize>,
    /// Size of the blocking worker pool
    pub max_blocking_workers: usize,
    /// Type-check wire arguments against declared parameters
    pub validate_params: bool,
    /// Default execution time limit; the `timeout` label overrides it
    pub task_timeout_ms: Option<u64>,
    /// How long shutdown waits for in-flight executions; `None` waits forever
    pub wait_tasks_timeout_ms: Option<u64>,
    /// Messages pulled from the broker ahead of admission
    pub max_prefetch: usize,
    pub completion_buffer_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_async_tasks: Some(100),
            max_blocking_workers: 8,
            validate_params: true,
            task_timeout_ms: None,
            wait_tasks_timeout_ms: Some(30_000),
            max_prefetch: 32,
            completion_buffer_size: 1000,
        }
    }
}

impl ReceiverConfig {
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn wait_tasks_timeout(&self) -> Option<Duration> {
        self.wait_tasks_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.max_blocking_workers == 0 {
            return Err(QueueError::configuration(
                "receiver",
                "max_blocking_workers must be greater than 0",
            ));
        }
        if self.max_prefetch == 0 {
            return Err(QueueError::configuration(
                "receiver",
                "max_prefetch must be greater than 0",
            ));
        }
        if self.completion_buffer_size == 0 {
            return Err(QueueError::configuration(
                "receiver",
                "completion_buffer_size must be greater than 0",
            ));
        }
        if self.task_timeout_ms == Some(0) {
            return Err(QueueError::configuration(
                "receiver",
                "task_timeout_ms must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `tasker_queue=debug`; `RUST_LOG` wins when set
    pub level: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl QueueConfig {
    /// Load from defaults and the environment
    pub fn load() -> QueueResult<Self> {
        Self::load_from(None)
    }

    /// Load from defaults, an optional TOML file and the environment
    pub fn load_from(path: Option<&Path>) -> QueueResult<Self> {
        Self::build(path, environment())
    }

    fn build(path: Option<&Path>, env: Environment) -> QueueResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(QueueError::configuration(
                    "config",
                    format!("file not found: {}", path.display()),
                ));
            }
            builder = builder.add_source(File::from(path));
        }

        let config: QueueConfig = builder.add_source(env).build()?.try_deserialize()?;
        config.receiver.validate()?;
        Ok(config)
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}
