//! # Execution Lanes
//!
//! Two explicitly separated lanes for task bodies:
//!
//! ```text
//! non-blocking:  [admission semaphore] → body.await on the runtime
//! blocking:      [pool semaphore]      → spawn_blocking(body)
//! ```
//!
//! Both lanes report a [`LaneOutcome`], so completion handling is shared. Panics are
//! caught in both lanes; time limits apply to both, but a timed-out blocking body keeps
//! its pool slot until the thread actually returns.

use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, warn};

use crate::dependencies::TaskArgs;
use crate::registry::TaskHandler;

/// How a task body ended
#[derive(Debug)]
pub enum LaneOutcome {
    Returned(anyhow::Result<Value>),
    Panicked(String),
    TimedOut(Duration),
}

pub struct ExecutionLanes {
    /// `None` when non-blocking concurrency is unlimited
    async_permits: Option<Arc<Semaphore>>,
    max_async: Option<usize>,
    blocking_permits: Arc<Semaphore>,
    max_blocking: usize,
}

impl std::fmt::Debug for ExecutionLanes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLanes")
            .field("max_async", &self.max_async)
            .field("max_blocking", &self.max_blocking)
            .field("async_in_use", &self.async_in_use())
            .field("blocking_in_use", &self.blocking_in_use())
            .finish()
    }
}

impl ExecutionLanes {
    /// `max_async` of `None` or `Some(0)` means unlimited
    pub fn new(max_async: Option<usize>, max_blocking: usize) -> Self {
        let max_async = max_async.filter(|limit| *limit > 0);
        let max_blocking = max_blocking.max(1);
        Self {
            async_permits: max_async.map(|limit| Arc::new(Semaphore::new(limit))),
            max_async,
            blocking_permits: Arc::new(Semaphore::new(max_blocking)),
            max_blocking,
        }
    }

    /// Wait for a non-blocking execution slot.
    ///
    /// The permit must be held from before `pre_execute` until after `post_save`.
    /// Returns `None` when the lane is unlimited.
    pub async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        let semaphore = self.async_permits.as_ref()?;
        match semaphore.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                // The semaphore is never closed; admit without a slot rather than stall.
                error!("Admission semaphore closed, admitting without a slot");
                None
            }
        }
    }

    /// Non-blocking executions currently holding a slot
    pub fn async_in_use(&self) -> usize {
        match (&self.async_permits, self.max_async) {
            (Some(semaphore), Some(max)) => max.saturating_sub(semaphore.available_permits()),
            _ => 0,
        }
    }

    /// Blocking bodies currently occupying a pool thread
    pub fn blocking_in_use(&self) -> usize {
        self.max_blocking
            .saturating_sub(self.blocking_permits.available_permits())
    }

    pub fn max_async(&self) -> Option<usize> {
        self.max_async
    }

    pub fn max_blocking(&self) -> usize {
        self.max_blocking
    }

    /// Run a task body in its lane, returning how it ended and how long it took
    pub async fn execute(
        &self,
        handler: &TaskHandler,
        args: TaskArgs,
        timeout: Option<Duration>,
    ) -> (LaneOutcome, Duration) {
        let started = Instant::now();
        let outcome = match handler {
            TaskHandler::Async(body) => {
                let run = AssertUnwindSafe(async move { body(args).await }).catch_unwind();
                match timeout {
                    Some(limit) => match tokio::time::timeout(limit, run).await {
                        Ok(caught) => caught_outcome(caught),
                        Err(_) => LaneOutcome::TimedOut(limit),
                    },
                    None => caught_outcome(run.await),
                }
            }
            TaskHandler::Blocking(body) => self.run_blocking(body.clone(), args, timeout).await,
        };
        (outcome, started.elapsed())
    }

    async fn run_blocking(
        &self,
        body: crate::registry::BlockingTaskFn,
        args: TaskArgs,
        timeout: Option<Duration>,
    ) -> LaneOutcome {
        let permit = match self.blocking_permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return LaneOutcome::Panicked("blocking pool closed".to_string()),
        };
        debug!(
            blocking_in_use = self.blocking_in_use(),
            max_blocking = self.max_blocking,
            "Dispatching to blocking pool"
        );

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            std::panic::catch_unwind(AssertUnwindSafe(|| body(args)))
        });

        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        "Blocking task timed out; its thread runs to completion in the background"
                    );
                    return LaneOutcome::TimedOut(limit);
                }
            },
            None => handle.await,
        };

        match joined {
            Ok(caught) => caught_outcome(caught),
            Err(join_error) if join_error.is_panic() => {
                LaneOutcome::Panicked(panic_message(join_error.into_panic()))
            }
            Err(join_error) => LaneOutcome::Panicked(join_error.to_string()),
        }
    }
}

fn caught_outcome(caught: Result<anyhow::Result<Value>, Box<dyn Any + Send>>) -> LaneOutcome {
    match caught {
        Ok(returned) => LaneOutcome::Returned(returned),
        Err(payload) => LaneOutcome::Panicked(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
