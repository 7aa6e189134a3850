//! # Kicker
//!
//! Producer side of the queue: builds messages, runs `pre_send`/`post_send` hooks,
//! encodes and enqueues them, and hands back a [`TaskHandle`] for the result.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::broker::{Broker, BrokerMessage};
use crate::error::{QueueError, QueueResult};
use crate::messaging::TaskMessage;
use crate::result::TaskResult;
use crate::state::TaskProgress;

/// Run `pre_send` hooks, enqueue, then run `post_send` hooks.
///
/// Returns the message as it was actually sent. `post_send` failures are logged; the
/// message is already on the broker at that point.
pub async fn send_message(broker: &dyn Broker, message: TaskMessage) -> QueueResult<TaskMessage> {
    let message = broker.middlewares().pre_send(message).await?;
    kick_raw(broker, &message).await?;
    if let Err(e) = broker.middlewares().post_send(&message).await {
        warn!(task_id = %message.task_id, error = %e, "post_send hook failed");
    }
    Ok(message)
}

/// Encode and enqueue without running any hooks
pub async fn kick_raw(broker: &dyn Broker, message: &TaskMessage) -> QueueResult<()> {
    let payload = broker.codec().encode(message)?;
    debug!(
        task_id = %message.task_id,
        task_name = %message.task_name,
        codec = broker.codec().name(),
        "Kicking message"
    );
    broker
        .kick(BrokerMessage {
            task_id: message.task_id.clone(),
            task_name: message.task_name.clone(),
            payload,
            labels: message.labels.clone(),
        })
        .await
}

/// Builder for sending one task
///
/// Labels registered with the task are merged under the labels set here.
#[derive(Clone)]
pub struct TaskKicker {
    broker: Arc<dyn Broker>,
    task_name: String,
    task_id: Option<String>,
    labels: HashMap<String, String>,
}

impl std::fmt::Debug for TaskKicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskKicker")
            .field("task_name", &self.task_name)
            .field("task_id", &self.task_id)
            .field("labels", &self.labels)
            .finish()
    }
}

impl TaskKicker {
    pub fn new(broker: Arc<dyn Broker>, task_name: impl Into<String>) -> Self {
        Self {
            broker,
            task_name: task_name.into(),
            task_id: None,
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Use a caller-chosen task id instead of a generated one
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Send the task with the given arguments
    pub async fn kiq(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> QueueResult<TaskHandle> {
        let task_id = self
            .task_id
            .clone()
            .unwrap_or_else(|| self.broker.id_generator());

        let mut labels = self
            .broker
            .registry()
            .get(&self.task_name)
            .map(|task| task.labels().clone())
            .unwrap_or_default();
        labels.extend(self.labels.clone());

        let message = TaskMessage {
            task_id,
            task_name: self.task_name.clone(),
            labels,
            args,
            kwargs,
        };
        let sent = send_message(self.broker.as_ref(), message).await?;
        Ok(TaskHandle::new(sent.task_id, self.broker.clone()))
    }
}

/// Handle to a sent task's result and progress
#[derive(Clone)]
pub struct TaskHandle {
    task_id: String,
    broker: Arc<dyn Broker>,
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

impl TaskHandle {
    pub fn new(task_id: impl Into<String>, broker: Arc<dyn Broker>) -> Self {
        Self {
            task_id: task_id.into(),
            broker,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn is_ready(&self) -> QueueResult<bool> {
        self.broker.result_backend().is_result_ready(&self.task_id).await
    }

    pub async fn get_result(&self) -> QueueResult<Option<TaskResult>> {
        self.broker.result_backend().get_result(&self.task_id).await
    }

    pub async fn get_progress(&self) -> QueueResult<Option<TaskProgress>> {
        self.broker.result_backend().get_progress(&self.task_id).await
    }

    /// Poll until the result is stored, failing with a timeout error after `timeout`
    pub async fn wait_result(&self, poll_interval: Duration, timeout: Duration) -> QueueResult<TaskResult> {
        let started = Instant::now();
        loop {
            if let Some(result) = self.get_result().await? {
                return Ok(result);
            }
            if started.elapsed() >= timeout {
                return Err(QueueError::timeout(
                    "wait_result",
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
