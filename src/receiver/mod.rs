//! # Receiver
//!
//! Turns each inbound message into exactly one recorded result.
//!
//! ## Pipeline
//!
//! ```text
//! decode → registry lookup ─(miss)→ NotFound result → set_result
//!              │
//!              ▼
//!   [admission slot] → bind/validate ─(fail)→ Resolution result → set_result
//!              │
//!              ▼
//!   pre_execute* → inject → lane (async | blocking) → classify
//!              │
//!              ▼
//!   [on_error*] → post_execute* → set_result → post_save* → release slot
//! ```
//!
//! ## Error Handling
//!
//! Nothing a task body or a hook does escapes [`Receiver::run_task`]:
//! - task errors, panics and timeouts become error results
//! - a failing `pre_execute` hook skips the body; a failing `post_execute` hook
//!   replaces the result; both are recorded as middleware failures
//! - `on_error` and `post_save` failures are logged
//! - an `on_error` hook that sends the message again turns the attempt into a requeue,
//!   so only the final attempt's result is persisted
//! - a failed `set_result` is logged and counted, since the execution already happened
//!
//! Failures before `pre_execute` (unknown task, invalid arguments) are persisted but
//! run no hooks, so hooks that bracket execution always come in pairs.

pub mod lanes;

use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::ReceiverConfig;
use crate::dependencies::{Context, DependencyResolver};
use crate::error::{QueueError, QueueResult};
use crate::logging::log_task_operation;
use crate::messaging::TaskMessage;
use crate::registry::TaskRegistration;
use crate::result::{FailureKind, TaskErrorInfo, TaskResult};

pub use lanes::{ExecutionLanes, LaneOutcome};

/// Counters over the receiver's lifetime
#[derive(Debug, Default)]
pub struct ReceiverStats {
    received: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
    persist_failures: AtomicU64,
    decode_failures: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStatsSnapshot {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub requeued: u64,
    pub persist_failures: u64,
    pub decode_failures: u64,
}

impl ReceiverStats {
    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }

    fn record(&self, result: &TaskResult) {
        let counter = if result.is_requeued() {
            &self.requeued
        } else if result.is_err() {
            &self.failed
        } else {
            &self.succeeded
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Report sent from each spawned execution to the listen loop
#[derive(Debug)]
struct Completion {
    task_id: String,
    is_err: bool,
}

pub struct Receiver {
    broker: Arc<dyn Broker>,
    config: ReceiverConfig,
    resolver: DependencyResolver,
    lanes: ExecutionLanes,
    stats: ReceiverStats,
    listening: AtomicBool,
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("broker", &self.broker.name())
            .field("config", &self.config)
            .field("lanes", &self.lanes)
            .finish()
    }
}

impl Receiver {
    pub fn new(broker: Arc<dyn Broker>, config: ReceiverConfig) -> Self {
        Self {
            resolver: DependencyResolver::new(config.validate_params),
            lanes: ExecutionLanes::new(config.max_async_tasks, config.max_blocking_workers),
            broker,
            config,
            stats: ReceiverStats::default(),
            listening: AtomicBool::new(false),
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    pub fn lanes(&self) -> &ExecutionLanes {
        &self.lanes
    }

    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.stats.snapshot()
    }

    /// Decode a raw payload. Undecodable payloads carry no usable task id, so they are
    /// logged and dropped.
    pub fn decode(&self, payload: &[u8]) -> Option<TaskMessage> {
        match self.broker.codec().decode(payload) {
            Ok(message) => Some(message),
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    codec = self.broker.codec().name(),
                    bytes = payload.len(),
                    error = %e,
                    "Dropping undecodable message"
                );
                None
            }
        }
    }

    /// Handle one decoded message: look the task up and run it
    pub async fn callback(&self, message: TaskMessage) -> TaskResult {
        match self.broker.registry().get(&message.task_name) {
            Some(task) => self.run_task(task, message).await,
            None => self.record_not_found(message).await,
        }
    }

    /// Run one message against a resolved task, waiting for an admission slot first
    pub async fn run_task(&self, task: Arc<TaskRegistration>, message: TaskMessage) -> TaskResult {
        let permit = if task.is_blocking() {
            None
        } else {
            self.lanes.admit().await
        };
        self.run_admitted(task, message, permit).await
    }

    async fn record_not_found(&self, message: TaskMessage) -> TaskResult {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        warn!(
            task_id = %message.task_id,
            task_name = %message.task_name,
            "Task not found in registry"
        );
        let info = TaskErrorInfo::from_queue_error(&QueueError::task_not_found(&message.task_name));
        let result = TaskResult::failure(info, Duration::ZERO).with_labels(message.labels.clone());
        self.persist(&message, &result).await;
        self.stats.record(&result);
        result
    }

    async fn run_admitted(
        &self,
        task: Arc<TaskRegistration>,
        message: TaskMessage,
        permit: Option<OwnedSemaphorePermit>,
    ) -> TaskResult {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        debug!(
            task_id = %message.task_id,
            task_name = %message.task_name,
            async_in_use = self.lanes.async_in_use(),
            "Executing task"
        );

        if let Err(e) = self.resolver.bind(&task, &message) {
            warn!(
                task_id = %message.task_id,
                task_name = %message.task_name,
                error = %e,
                "Rejected task arguments"
            );
            let result = TaskResult::failure(TaskErrorInfo::from_queue_error(&e), started.elapsed())
                .with_labels(message.labels.clone());
            self.persist(&message, &result).await;
            self.stats.record(&result);
            drop(permit);
            return result;
        }

        let message = match self.broker.middlewares().pre_execute(message.clone()).await {
            Ok(transformed) => transformed,
            Err(e) => {
                let result = self.hook_failure(&message, &e, started.elapsed());
                return self.finish(&task, message, result, permit).await;
            }
        };

        let context = Arc::new(Context::new(message.clone(), self.broker.clone()));
        let args = match self
            .resolver
            .resolve(&task, self.broker.registry(), context)
            .await
        {
            Ok(args) => args,
            Err(e) => {
                warn!(task_id = %message.task_id, error = %e, "Dependency resolution failed");
                let result =
                    TaskResult::failure(TaskErrorInfo::from_queue_error(&e), started.elapsed())
                        .with_labels(message.labels.clone());
                return self.finish(&task, message, result, permit).await;
            }
        };

        let timeout = message.timeout().or_else(|| self.config.task_timeout());
        let (outcome, elapsed) = self.lanes.execute(task.handler(), args, timeout).await;
        let result = classify(&message, outcome, elapsed);
        self.finish(&task, message, result, permit).await
    }

    fn hook_failure(&self, message: &TaskMessage, err: &QueueError, elapsed: Duration) -> TaskResult {
        error!(task_id = %message.task_id, error = %err, "Middleware hook failed");
        TaskResult::failure(TaskErrorInfo::from_queue_error(err), elapsed)
            .with_labels(message.labels.clone())
    }

    /// Completion handling shared by both lanes
    async fn finish(
        &self,
        task: &TaskRegistration,
        message: TaskMessage,
        mut result: TaskResult,
        permit: Option<OwnedSemaphorePermit>,
    ) -> TaskResult {
        let chain = self.broker.middlewares();

        if let Some(info) = result.error().cloned() {
            if !result.is_requeued() && chain.on_error(&message, &result, &info).await {
                result = resent(result);
            }
        }

        if let Err(e) = chain.post_execute(&message, &result).await {
            let requeued = result.is_requeued();
            result = self.hook_failure(&message, &e, result.execution_time());
            if let Some(info) = result.error().cloned() {
                if chain.on_error(&message, &result, &info).await || requeued {
                    result = resent(result);
                }
            }
        }

        if result.is_requeued() {
            debug!(task_id = %message.task_id, "Result persistence skipped for requeued task");
        } else if self.persist(&message, &result).await {
            chain.post_save(&message, &result).await;
        }

        drop(permit);
        self.stats.record(&result);

        let status = match result.error() {
            None => "success",
            Some(info) if info.kind == FailureKind::Requeued => "requeued",
            Some(_) => "failure",
        };
        log_task_operation(
            "execute",
            &message.task_id,
            Some(task.name()),
            status,
            Some(u64::try_from(result.execution_time().as_millis()).unwrap_or(u64::MAX)),
            result.error().map(|info| info.message.as_str()),
        );
        result
    }

    /// Store a result, logging storage failures. Returns whether it was stored.
    async fn persist(&self, message: &TaskMessage, result: &TaskResult) -> bool {
        match self
            .broker
            .result_backend()
            .set_result(&message.task_id, result)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                self.stats.persist_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    task_id = %message.task_id,
                    task_name = %message.task_name,
                    error = %e,
                    "Failed to persist task result"
                );
                false
            }
        }
    }

    /// Consume the broker until `shutdown` flips to `true` or the stream ends, then
    /// wait for in-flight executions.
    ///
    /// A listener task pulls up to `max_prefetch` messages ahead, so reception keeps
    /// going while a message waits for admission. The wait races shutdown and
    /// completions, so a full lane never delays stopping. Each admitted message runs in
    /// its own task and reports through a single completion channel.
    pub async fn listen(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> QueueResult<()> {
        if self.listening.swap(true, Ordering::AcqRel) {
            return Err(QueueError::AlreadyRunning);
        }
        let outcome = self.clone().listen_inner(&mut shutdown).await;
        self.listening.store(false, Ordering::Release);
        outcome
    }

    async fn listen_inner(self: Arc<Self>, shutdown: &mut watch::Receiver<bool>) -> QueueResult<()> {
        let mut stream = self.broker.listen().await?;
        let (prefetch_tx, mut prefetch_rx) = mpsc::channel::<Vec<u8>>(self.config.max_prefetch);
        let listener = tokio::spawn(async move {
            while let Some(payload) = stream.next().await {
                if prefetch_tx.send(payload).await.is_err() {
                    break;
                }
            }
        });

        let (completion_tx, mut completion_rx) =
            mpsc::channel::<Completion>(self.config.completion_buffer_size);
        let mut in_flight: usize = 0;
        // Message waiting for a non-blocking slot; reception pauses until it starts
        let mut awaiting: Option<(Arc<TaskRegistration>, TaskMessage)> = None;

        info!(
            broker = self.broker.name(),
            max_async_tasks = ?self.lanes.max_async(),
            max_blocking_workers = self.lanes.max_blocking(),
            "Receiver listening"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(completion) = completion_rx.recv() => {
                    in_flight = in_flight.saturating_sub(1);
                    debug!(
                        task_id = %completion.task_id,
                        is_err = completion.is_err,
                        in_flight,
                        "Execution completed"
                    );
                }
                permit = self.lanes.admit(), if awaiting.is_some() => {
                    if let Some((task, message)) = awaiting.take() {
                        in_flight += 1;
                        let this = self.clone();
                        spawn_tracked(message.task_id.clone(), completion_tx.clone(), async move {
                            this.run_admitted(task, message, permit).await
                        });
                    }
                }
                payload = prefetch_rx.recv(), if awaiting.is_none() => {
                    let Some(payload) = payload else {
                        info!("Broker stream ended");
                        break;
                    };
                    let Some(message) = self.decode(&payload) else {
                        continue;
                    };
                    match self.dispatch(message, &completion_tx) {
                        Dispatched::Spawned => in_flight += 1,
                        Dispatched::AwaitingAdmission(task, message) => {
                            awaiting = Some((task, message));
                        }
                    }
                }
            }
        }

        listener.abort();
        if let Some((_, message)) = &awaiting {
            warn!(
                task_id = %message.task_id,
                task_name = %message.task_name,
                "Message waiting for admission left unprocessed at shutdown"
            );
        }
        let unstarted = prefetch_rx.len();
        if unstarted > 0 {
            warn!(unstarted, "Prefetched messages left unprocessed at shutdown");
        }

        info!(in_flight, "Receiver stopping, waiting for in-flight executions");
        drop(completion_tx);
        let drain = async {
            while in_flight > 0 {
                match completion_rx.recv().await {
                    Some(_) => in_flight -= 1,
                    None => break,
                }
            }
        };
        match self.config.wait_tasks_timeout() {
            Some(limit) => {
                if tokio::time::timeout(limit, drain).await.is_err() {
                    warn!(
                        timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        "Timed out waiting for in-flight executions"
                    );
                }
            }
            None => drain.await,
        }

        info!(stats = ?self.stats(), "Receiver stopped");
        Ok(())
    }

    /// Spawn a message that needs no admission slot, or hand it back to wait for one.
    /// Waiting happens in the listen loop so shutdown stays observable.
    fn dispatch(
        self: &Arc<Self>,
        message: TaskMessage,
        completions: &mpsc::Sender<Completion>,
    ) -> Dispatched {
        let task_id = message.task_id.clone();
        let this = self.clone();
        match self.broker.registry().get(&message.task_name) {
            None => {
                spawn_tracked(task_id, completions.clone(), async move {
                    this.record_not_found(message).await
                });
                Dispatched::Spawned
            }
            Some(task) if task.is_blocking() => {
                spawn_tracked(task_id, completions.clone(), async move {
                    this.run_admitted(task, message, None).await
                });
                Dispatched::Spawned
            }
            Some(task) => Dispatched::AwaitingAdmission(task, message),
        }
    }
}

/// What the listen loop does with a decoded message
enum Dispatched {
    Spawned,
    AwaitingAdmission(Arc<TaskRegistration>, TaskMessage),
}

fn spawn_tracked<F>(task_id: String, completions: mpsc::Sender<Completion>, execution: F)
where
    F: Future<Output = TaskResult> + Send + 'static,
{
    tokio::spawn(async move {
        let is_err = match AssertUnwindSafe(execution).catch_unwind().await {
            Ok(result) => result.is_err(),
            Err(_) => {
                error!(task_id = %task_id, "Message handling panicked outside the task body");
                true
            }
        };
        if completions.send(Completion { task_id, is_err }).await.is_err() {
            debug!("Completion channel closed");
        }
    });
}

/// Reclassify a failure whose message an `on_error` hook already sent again
fn resent(result: TaskResult) -> TaskResult {
    let message = result
        .error()
        .map(|info| info.message.clone())
        .unwrap_or_default();
    let info = TaskErrorInfo::new(FailureKind::Requeued, "resent", message);
    TaskResult::failure(info, result.execution_time()).with_labels(result.labels().clone())
}

/// Turn a lane outcome into a result carrying the message labels
fn classify(message: &TaskMessage, outcome: LaneOutcome, elapsed: Duration) -> TaskResult {
    let result = match outcome {
        LaneOutcome::Returned(Ok(value)) => TaskResult::success(value, elapsed),
        LaneOutcome::Returned(Err(e)) => {
            let info = TaskErrorInfo::from_task_error(&e);
            if info.kind != FailureKind::Requeued {
                warn!(
                    task_id = %message.task_id,
                    task_name = %message.task_name,
                    error_type = %info.error_type,
                    error = %info.message,
                    "Task returned error"
                );
            }
            TaskResult::failure(info, elapsed).with_log(format!("{e:?}"))
        }
        LaneOutcome::Panicked(panic_msg) => {
            error!(
                task_id = %message.task_id,
                task_name = %message.task_name,
                panic_msg = %panic_msg,
                "Task panicked"
            );
            TaskResult::failure(
                TaskErrorInfo::new(
                    FailureKind::Panic,
                    "handler_panic",
                    format!("Task panicked: {panic_msg}"),
                ),
                elapsed,
            )
        }
        LaneOutcome::TimedOut(limit) => {
            let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            error!(
                task_id = %message.task_id,
                task_name = %message.task_name,
                timeout_ms,
                "Task timed out"
            );
            TaskResult::failure(
                TaskErrorInfo::from_queue_error(&QueueError::timeout("execute", timeout_ms)),
                elapsed,
            )
        }
    };
    result.with_labels(message.labels.clone())
}
