//! # In-Memory Result Backend
//!
//! Thread-safe result storage for testing and single-process deployments.
//!
//! ## Features
//!
//! - **Bounded results**: at most `max_stored_results` final results are kept; the
//!   oldest insertion is evicted first
//! - **Unbounded progress**: progress snapshots are never evicted, their lifetime is
//!   the caller's responsibility
//! - **Lock-light**: `DashMap` shards for both keyspaces

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

use crate::backend::ResultBackend;
use crate::error::QueueResult;
use crate::result::TaskResult;
use crate::state::TaskProgress;

/// Default number of final results kept in memory
pub const DEFAULT_MAX_STORED_RESULTS: usize = 1000;

/// In-memory result backend
#[derive(Debug)]
pub struct InMemoryResultBackend {
    results: DashMap<String, TaskResult>,
    progress: DashMap<String, TaskProgress>,
    /// Insertion order of result keys, used for eviction
    insertion_order: Mutex<VecDeque<String>>,
    max_stored_results: usize,
}

impl Default for InMemoryResultBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResultBackend {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STORED_RESULTS)
    }

    /// Create a backend keeping at most `max_stored_results` results (minimum 1)
    pub fn with_capacity(max_stored_results: usize) -> Self {
        Self {
            results: DashMap::new(),
            progress: DashMap::new(),
            insertion_order: Mutex::new(VecDeque::new()),
            max_stored_results: max_stored_results.max(1),
        }
    }

    /// Number of stored results (for testing)
    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Number of stored progress snapshots (for testing)
    pub fn progress_count(&self) -> usize {
        self.progress.len()
    }
}

#[async_trait]
impl ResultBackend for InMemoryResultBackend {
    async fn set_result(&self, task_id: &str, result: &TaskResult) -> QueueResult<()> {
        let replaced = self
            .results
            .insert(task_id.to_string(), result.clone())
            .is_some();

        if !replaced {
            let mut order = self.insertion_order.lock();
            order.push_back(task_id.to_string());
            while order.len() > self.max_stored_results {
                if let Some(evicted) = order.pop_front() {
                    self.results.remove(&evicted);
                    debug!(task_id = %evicted, "Evicted oldest stored result");
                }
            }
        }
        Ok(())
    }

    async fn get_result(&self, task_id: &str) -> QueueResult<Option<TaskResult>> {
        Ok(self.results.get(task_id).map(|r| r.value().clone()))
    }

    async fn set_progress(&self, task_id: &str, progress: &TaskProgress) -> QueueResult<()> {
        self.progress.insert(task_id.to_string(), progress.clone());
        Ok(())
    }

    async fn get_progress(&self, task_id: &str) -> QueueResult<Option<TaskProgress>> {
        Ok(self.progress.get(task_id).map(|p| p.value().clone()))
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
