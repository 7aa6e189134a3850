//! # Execution Context
//!
//! Per-invocation bundle handed to task bodies: the message being processed and the
//! broker it came from. Dropped when the execution completes.

use std::sync::Arc;
use tracing::info;

use crate::backend::ResultBackend;
use crate::broker::Broker;
use crate::error::QueueError;
use crate::kicker;
use crate::messaging::{TaskMessage, REQUEUE_LABEL};
use crate::progress::ProgressTracker;

#[derive(Clone)]
pub struct Context {
    message: TaskMessage,
    broker: Arc<dyn Broker>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("message", &self.message)
            .field("broker", &self.broker.name())
            .finish()
    }
}

impl Context {
    pub fn new(message: TaskMessage, broker: Arc<dyn Broker>) -> Self {
        Self { message, broker }
    }

    /// The message as seen after every `pre_execute` hook
    pub fn message(&self) -> &TaskMessage {
        &self.message
    }

    pub fn task_id(&self) -> &str {
        &self.message.task_id
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn result_backend(&self) -> Arc<dyn ResultBackend> {
        self.broker.result_backend()
    }

    /// Progress tracker scoped to this task id
    pub fn progress(&self) -> ProgressTracker {
        ProgressTracker::new(self.message.task_id.clone(), self.broker.result_backend())
    }

    /// Send this message again and tell the receiver not to persist a result.
    ///
    /// The returned error is meant to be returned from the task body:
    ///
    /// ```rust,ignore
    /// if !ready {
    ///     return Err(ctx.requeue().await);
    /// }
    /// ```
    ///
    /// The copy keeps the task id and carries an incremented `requeue_count` label.
    /// `pre_send` hooks are not run again. If the send fails, the transport error is
    /// returned instead and the attempt is recorded as a normal failure.
    pub async fn requeue(&self) -> anyhow::Error {
        let mut message = self.message.clone();
        let count = message
            .parsed_label::<u32>(REQUEUE_LABEL)
            .unwrap_or(0)
            .saturating_add(1);
        message
            .labels
            .insert(REQUEUE_LABEL.to_string(), count.to_string());

        match kicker::kick_raw(self.broker.as_ref(), &message).await {
            Ok(()) => {
                info!(
                    task_id = %message.task_id,
                    task_name = %message.task_name,
                    requeue_count = count,
                    "Task requeued itself"
                );
                QueueError::NoResult.into()
            }
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use futures::StreamExt;

    async fn requeued_copy(broker: &Arc<InMemoryBroker>) -> TaskMessage {
        let payload = broker.listen().await.unwrap().next().await.unwrap();
        broker.codec().decode(&payload).unwrap()
    }

    #[tokio::test]
    async fn test_requeue_increments_count() {
        let broker = InMemoryBroker::builder().build();
        let context = Context::new(TaskMessage::new("r1", "poll"), broker.clone());

        let signal = context.requeue().await;
        assert!(matches!(
            signal.downcast_ref::<QueueError>(),
            Some(QueueError::NoResult)
        ));

        let copy = requeued_copy(&broker).await;
        assert_eq!(copy.task_id, "r1");
        assert_eq!(copy.label(REQUEUE_LABEL), Some("1"));
    }

    #[tokio::test]
    async fn test_requeue_count_saturates() {
        let broker = InMemoryBroker::builder().build();
        let message =
            TaskMessage::new("r2", "poll").with_label(REQUEUE_LABEL, u32::MAX.to_string());
        let context = Context::new(message, broker.clone());

        let signal = context.requeue().await;
        assert!(matches!(
            signal.downcast_ref::<QueueError>(),
            Some(QueueError::NoResult)
        ));
        let copy = requeued_copy(&broker).await;
        assert_eq!(copy.label(REQUEUE_LABEL), Some(u32::MAX.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_requeue_on_closed_broker_returns_transport_error() {
        let broker = InMemoryBroker::builder().build();
        broker.shutdown().await.unwrap();
        let context = Context::new(TaskMessage::new("r3", "poll"), broker);

        let err = context.requeue().await;
        assert!(matches!(
            err.downcast_ref::<QueueError>(),
            Some(QueueError::Transport { .. })
        ));
    }
}
