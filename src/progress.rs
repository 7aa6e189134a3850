//! # Progress Tracker
//!
//! The narrow handle a running task uses to publish progress snapshots. It is scoped
//! to one task id and never exposes the backend behind it.
//!
//! `set_progress` without new meta carries the previously stored meta forward. The
//! read-then-write is not atomic: concurrent updates for one task id from different
//! executions are the caller's problem.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

use crate::backend::ResultBackend;
use crate::error::{QueueError, QueueResult};
use crate::state::{TaskProgress, TaskState};

#[derive(Clone)]
pub struct ProgressTracker {
    task_id: String,
    backend: Arc<dyn ResultBackend>,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    pub(crate) fn new(task_id: String, backend: Arc<dyn ResultBackend>) -> Self {
        Self { task_id, backend }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Publish a snapshot. `None` meta keeps whatever meta is already stored.
    pub async fn set_progress(
        &self,
        state: impl Into<TaskState>,
        meta: Option<Value>,
    ) -> QueueResult<()> {
        let state = state.into();
        let meta = match meta {
            Some(meta) => Some(meta),
            None => self
                .backend
                .get_progress(&self.task_id)
                .await?
                .and_then(|previous| previous.meta),
        };

        debug!(task_id = %self.task_id, state = %state, "Setting task progress");
        self.backend
            .set_progress(&self.task_id, &TaskProgress::new(state, meta))
            .await
    }

    pub async fn get_progress(&self) -> QueueResult<Option<TaskProgress>> {
        self.backend.get_progress(&self.task_id).await
    }

    /// Publish a snapshot with a typed meta payload
    pub async fn set_progress_with<T: Serialize>(
        &self,
        state: impl Into<TaskState>,
        meta: &T,
    ) -> QueueResult<()> {
        self.set_progress(state, Some(serde_json::to_value(meta)?))
            .await
    }

    /// Read the stored snapshot, decoding its meta. A snapshot without meta yields `None`.
    pub async fn get_progress_as<T: DeserializeOwned>(&self) -> QueueResult<Option<(TaskState, Option<T>)>> {
        let Some(progress) = self.get_progress().await? else {
            return Ok(None);
        };
        let meta = progress.meta.map(serde_json::from_value).transpose()?;
        Ok(Some((progress.state, meta)))
    }

    /// [`set_progress`](Self::set_progress) for blocking task bodies
    pub fn set_progress_blocking(
        &self,
        state: impl Into<TaskState>,
        meta: Option<Value>,
    ) -> QueueResult<()> {
        runtime_handle()?.block_on(self.set_progress(state, meta))
    }

    /// [`get_progress`](Self::get_progress) for blocking task bodies
    pub fn get_progress_blocking(&self) -> QueueResult<Option<TaskProgress>> {
        runtime_handle()?.block_on(self.get_progress())
    }
}

/// Handle of the runtime that spawned the current blocking task
fn runtime_handle() -> QueueResult<Handle> {
    Handle::try_current().map_err(|e| {
        QueueError::configuration("progress", format!("no tokio runtime available: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryResultBackend;
    use serde::Deserialize;
    use serde_json::json;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new("t1".to_string(), Arc::new(InMemoryResultBackend::new()))
    }

    #[tokio::test]
    async fn test_meta_carried_forward() {
        let tracker = tracker();
        tracker
            .set_progress(TaskState::Started, Some(json!({"pct": 10})))
            .await
            .unwrap();
        tracker.set_progress("working", None).await.unwrap();

        let progress = tracker.get_progress().await.unwrap().unwrap();
        assert_eq!(progress.state, TaskState::Custom("working".to_string()));
        assert_eq!(progress.meta, Some(json!({"pct": 10})));
    }

    #[tokio::test]
    async fn test_absent_progress_is_none() {
        assert!(tracker().get_progress().await.unwrap().is_none());
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Step {
        done: u32,
        total: u32,
    }

    #[tokio::test]
    async fn test_typed_meta() {
        let tracker = tracker();
        tracker
            .set_progress_with(TaskState::Started, &Step { done: 1, total: 4 })
            .await
            .unwrap();

        let (state, meta) = tracker.get_progress_as::<Step>().await.unwrap().unwrap();
        assert_eq!(state, TaskState::Started);
        assert_eq!(meta, Some(Step { done: 1, total: 4 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_helpers_from_spawn_blocking() {
        let tracker = tracker();
        let inner = tracker.clone();
        tokio::task::spawn_blocking(move || {
            inner
                .set_progress_blocking(TaskState::Started, Some(json!("hi")))
                .unwrap();
            inner.get_progress_blocking().unwrap()
        })
        .await
        .unwrap()
        .unwrap();

        let progress = tracker.get_progress().await.unwrap().unwrap();
        assert_eq!(progress.meta, Some(json!("hi")));
    }
}
