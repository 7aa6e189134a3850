//! # Result Backends
//!
//! Durable keyed storage for final results and transient progress snapshots.
//!
//! ## Contract
//!
//! - `set_result` upserts; calling it twice for one task id is last-write-wins.
//! - `get_result` returns `Ok(None)` when nothing is stored, which is distinct from any
//!   stored result.
//! - Progress lives in its own keyspace: a task can have a result and no progress, or
//!   the other way round.
//!
//! Every operation may fail with [`QueueError::Storage`](crate::error::QueueError).

pub mod in_memory;

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::result::TaskResult;
use crate::state::TaskProgress;

pub use in_memory::InMemoryResultBackend;

/// Storage for task results and progress
#[async_trait]
pub trait ResultBackend: Send + Sync + 'static {
    /// Called once when the owning broker starts
    async fn startup(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Called once when the owning broker shuts down
    async fn shutdown(&self) -> QueueResult<()> {
        Ok(())
    }

    /// Store the final result for a task
    async fn set_result(&self, task_id: &str, result: &TaskResult) -> QueueResult<()>;

    /// Fetch the final result for a task
    async fn get_result(&self, task_id: &str) -> QueueResult<Option<TaskResult>>;

    /// Whether a final result has been stored
    async fn is_result_ready(&self, task_id: &str) -> QueueResult<bool> {
        Ok(self.get_result(task_id).await?.is_some())
    }

    /// Store a progress snapshot for a task
    async fn set_progress(&self, task_id: &str, progress: &TaskProgress) -> QueueResult<()>;

    /// Fetch the latest progress snapshot for a task
    async fn get_progress(&self, task_id: &str) -> QueueResult<Option<TaskProgress>>;

    /// Backend name for logging
    fn name(&self) -> &str;
}
