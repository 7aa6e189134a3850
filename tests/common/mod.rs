#![allow(dead_code)]

pub mod strategies;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use tasker_queue::{
    InMemoryBroker, InMemoryResultBackend, Middleware, Param, ParamType, QueueResult,
    ReceiverConfig, ResultBackend, ShutdownHandle, TaskFailure, TaskHandle, TaskProgress,
    TaskRegistration, TaskRegistry, TaskResult, TaskState, ValueDependency, Worker,
};

/// Result backend wrapper that counts `set_result` calls per task id
#[derive(Debug, Default)]
pub struct CountingBackend {
    inner: InMemoryResultBackend,
    set_result_calls: Mutex<HashMap<String, usize>>,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_result_calls(&self, task_id: &str) -> usize {
        self.set_result_calls.lock().get(task_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ResultBackend for CountingBackend {
    async fn set_result(&self, task_id: &str, result: &TaskResult) -> QueueResult<()> {
        *self
            .set_result_calls
            .lock()
            .entry(task_id.to_string())
            .or_default() += 1;
        self.inner.set_result(task_id, result).await
    }

    async fn get_result(&self, task_id: &str) -> QueueResult<Option<TaskResult>> {
        self.inner.get_result(task_id).await
    }

    async fn set_progress(&self, task_id: &str, progress: &TaskProgress) -> QueueResult<()> {
        self.inner.set_progress(task_id, progress).await
    }

    async fn get_progress(&self, task_id: &str) -> QueueResult<Option<TaskProgress>> {
        self.inner.get_progress(task_id).await
    }

    fn name(&self) -> &str {
        "counting"
    }
}

/// `add(a, b) -> a + b`
pub fn add_task() -> TaskRegistration {
    TaskRegistration::new_async(
        "add",
        vec![
            Param::required("a", ParamType::Integer),
            Param::required("b", ParamType::Integer),
        ],
        |args| async move { Ok(args.get::<i64>("a")? + args.get::<i64>("b")?) },
    )
}

/// Always fails with a permanent domain error
pub fn withdraw_task() -> TaskRegistration {
    TaskRegistration::new_async(
        "withdraw",
        vec![Param::required("amount", ParamType::Integer)],
        |args| async move {
            let amount: i64 = args.get("amount")?;
            Err::<i64, _>(
                TaskFailure::permanent("InsufficientFunds", format!("cannot withdraw {amount}"))
                    .into(),
            )
        },
    )
}

/// Publishes `STARTED "hi"`, then waits on the `gate` provider before returning
pub fn gated_progress_task() -> TaskRegistration {
    TaskRegistration::new_async(
        "report",
        vec![Param::progress("progress"), Param::depends("gate", "gate")],
        |args| async move {
            let progress = args.progress("progress")?;
            progress
                .set_progress(TaskState::Started, Some(serde_json::json!("hi")))
                .await?;
            args.dependency::<Notify>("gate")?.notified().await;
            Ok("done")
        },
    )
}

/// A `gate` provider and the handle that opens it
pub fn gate() -> (Arc<ValueDependency<Notify>>, Arc<Notify>) {
    let notify = Arc::new(Notify::new());
    (Arc::new(ValueDependency::from_arc(notify.clone())), notify)
}

pub fn broker_with(
    registry: TaskRegistry,
    backend: Arc<dyn ResultBackend>,
    middlewares: Vec<Arc<dyn Middleware>>,
) -> Arc<InMemoryBroker> {
    let mut builder = InMemoryBroker::builder()
        .registry(registry)
        .result_backend(backend);
    for middleware in middlewares {
        builder = builder.middleware(middleware);
    }
    builder.build()
}

/// Spawn a worker; returns its shutdown handle and join handle
pub fn start_worker(
    broker: Arc<InMemoryBroker>,
    config: ReceiverConfig,
) -> (ShutdownHandle, JoinHandle<QueueResult<()>>) {
    let worker = Worker::new(broker, config);
    let shutdown = worker.shutdown_handle();
    let join = tokio::spawn(async move { worker.run().await });
    (shutdown, join)
}

pub async fn wait(handle: &TaskHandle) -> TaskResult {
    handle
        .wait_result(Duration::from_millis(5), Duration::from_secs(5))
        .await
        .expect("result within timeout")
}

/// Poll until `check` passes or the deadline expires
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
