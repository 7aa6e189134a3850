//! # Retry Middleware
//!
//! Re-sends failed messages with exponential backoff.
//!
//! A message is retried when its failure is retryable, retrying is enabled (the
//! `retry_on_error` label, else [`RetryConfig::default_retry_on_error`]) and the
//! `_retries` label is below `max_retries` (label, else config). The copy keeps the task
//! id, so a waiting producer sees the result of the last attempt.
//!
//! Once a retry is scheduled the hook returns [`QueueError::NoResult`], so the failed
//! attempt is not persisted and the task id has no result until an attempt stops
//! retrying. If a delayed resend cannot be sent, the failed attempt's result is stored
//! instead.

use async_trait::async_trait;
use std::sync::{OnceLock, Weak};
use std::time::Duration;
use tracing::{info, warn};

use super::{Hook, HookSet, Middleware};
use crate::broker::Broker;
use crate::error::QueueError;
use crate::kicker;
use crate::messaging::{TaskMessage, MAX_RETRIES_LABEL, RETRIES_LABEL, RETRY_ON_ERROR_LABEL};
use crate::result::{FailureKind, TaskErrorInfo, TaskResult};

/// Retry policy defaults
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry messages that don't carry a `retry_on_error` label
    pub default_retry_on_error: bool,
    /// Attempts allowed when the message doesn't carry `max_retries`
    pub default_max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_retry_on_error: false,
            default_max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.powi(exponent);
        if !factor.is_finite() {
            return self.max_delay;
        }
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Default)]
pub struct RetryMiddleware {
    config: RetryConfig,
    broker: OnceLock<Weak<dyn Broker>>,
}

impl RetryMiddleware {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            broker: OnceLock::new(),
        }
    }

    /// The retry copy of `message`, or `None` when no retry applies
    pub fn next_attempt(&self, message: &TaskMessage, error: &TaskErrorInfo) -> Option<(TaskMessage, Duration)> {
        if !error.retryable || error.kind == FailureKind::Requeued {
            return None;
        }
        let enabled = message
            .label_flag(RETRY_ON_ERROR_LABEL)
            .unwrap_or(self.config.default_retry_on_error);
        if !enabled {
            return None;
        }

        let retries = message.parsed_label::<u32>(RETRIES_LABEL).unwrap_or(0);
        let max_retries = message
            .parsed_label::<u32>(MAX_RETRIES_LABEL)
            .unwrap_or(self.config.default_max_retries);
        if retries >= max_retries {
            return None;
        }

        let attempt = retries + 1;
        let retry = message.clone().with_label(RETRIES_LABEL, attempt.to_string());
        Some((retry, self.config.delay_for(attempt)))
    }
}

#[async_trait]
impl Middleware for RetryMiddleware {
    fn name(&self) -> &str {
        "retry"
    }

    fn hooks(&self) -> HookSet {
        HookSet::empty().with(Hook::OnError)
    }

    fn bind_broker(&self, broker: Weak<dyn Broker>) {
        let _ = self.broker.set(broker);
    }

    async fn on_error(
        &self,
        message: &TaskMessage,
        result: &TaskResult,
        error: &TaskErrorInfo,
    ) -> anyhow::Result<()> {
        let Some((retry, delay)) = self.next_attempt(message, error) else {
            return Ok(());
        };
        let Some(broker) = self.broker.get().and_then(Weak::upgrade) else {
            warn!(task_id = %message.task_id, "Retry skipped: broker no longer available");
            return Ok(());
        };

        info!(
            task_id = %retry.task_id,
            task_name = %retry.task_name,
            attempt = retry.label(RETRIES_LABEL).unwrap_or_default(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error_type = %error.error_type,
            "Scheduling retry"
        );

        if delay.is_zero() {
            kicker::send_message(broker.as_ref(), retry).await?;
            return Err(QueueError::NoResult.into());
        }

        let failed = result.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let task_id = retry.task_id.clone();
            if let Err(e) = kicker::send_message(broker.as_ref(), retry).await {
                warn!(task_id = %task_id, error = %e, "Delayed retry could not be sent, storing last failure");
                if let Err(e) = broker.result_backend().set_result(&task_id, &failed).await {
                    warn!(task_id = %task_id, error = %e, "Failed to store result of abandoned retry");
                }
            }
        });
        Err(QueueError::NoResult.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use futures::StreamExt;
    use std::sync::Arc;

    fn error(retryable: bool) -> TaskErrorInfo {
        TaskErrorInfo::new(FailureKind::Execution, "Boom", "boom").with_retryable(retryable)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = RetryConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(350));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_millis(350));
    }

    #[test]
    fn test_retry_requires_opt_in() {
        let middleware = RetryMiddleware::default();
        let message = TaskMessage::new("id", "flaky");
        assert!(middleware.next_attempt(&message, &error(true)).is_none());

        let message = message.with_label(RETRY_ON_ERROR_LABEL, "true");
        let (retry, _) = middleware.next_attempt(&message, &error(true)).unwrap();
        assert_eq!(retry.task_id, "id");
        assert_eq!(retry.label(RETRIES_LABEL), Some("1"));
    }

    #[test]
    fn test_permanent_failures_are_not_retried() {
        let middleware = RetryMiddleware::new(RetryConfig {
            default_retry_on_error: true,
            ..RetryConfig::default()
        });
        let message = TaskMessage::new("id", "flaky");
        assert!(middleware.next_attempt(&message, &error(false)).is_none());
    }

    #[test]
    fn test_max_retries_label_is_respected() {
        let middleware = RetryMiddleware::new(RetryConfig {
            default_retry_on_error: true,
            ..RetryConfig::default()
        });
        let message = TaskMessage::new("id", "flaky")
            .with_label(MAX_RETRIES_LABEL, "2")
            .with_label(RETRIES_LABEL, "2");
        assert!(middleware.next_attempt(&message, &error(true)).is_none());

        let message = message.with_label(RETRIES_LABEL, "1");
        let (retry, _) = middleware.next_attempt(&message, &error(true)).unwrap();
        assert_eq!(retry.label(RETRIES_LABEL), Some("2"));
    }

    fn bound(config: RetryConfig) -> (Arc<RetryMiddleware>, Arc<InMemoryBroker>) {
        let retry = Arc::new(RetryMiddleware::new(config));
        let broker = InMemoryBroker::builder()
            .middleware(retry.clone() as Arc<dyn Middleware>)
            .build();
        (retry, broker)
    }

    fn immediate() -> RetryConfig {
        RetryConfig {
            default_retry_on_error: true,
            base_delay: Duration::ZERO,
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_scheduled_retry_reports_no_result() {
        let (retry, broker) = bound(immediate());
        let message = TaskMessage::new("id", "flaky");
        let failure = TaskResult::failure(error(true), Duration::ZERO);

        let err = retry.on_error(&message, &failure, &error(true)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<QueueError>(), Some(QueueError::NoResult)));

        let mut stream = broker.listen().await.unwrap();
        let payload = stream.next().await.unwrap();
        let resent = broker.codec().decode(&payload).unwrap();
        assert_eq!(resent.task_id, "id");
        assert_eq!(resent.label(RETRIES_LABEL), Some("1"));
    }

    #[tokio::test]
    async fn test_failed_resend_is_reported_as_error() {
        let (retry, broker) = bound(immediate());
        broker.shutdown().await.unwrap();
        let message = TaskMessage::new("id", "flaky");
        let failure = TaskResult::failure(error(true), Duration::ZERO);

        let err = retry.on_error(&message, &failure, &error(true)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<QueueError>(), Some(QueueError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_abandoned_delayed_retry_stores_last_failure() {
        let (retry, broker) = bound(RetryConfig {
            base_delay: Duration::from_millis(20),
            ..immediate()
        });
        let message = TaskMessage::new("id", "flaky");
        let failure = TaskResult::failure(error(true), Duration::ZERO);

        let err = retry.on_error(&message, &failure, &error(true)).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<QueueError>(), Some(QueueError::NoResult)));
        broker.shutdown().await.unwrap();

        let mut stored = None;
        for _ in 0..50 {
            stored = broker.result_backend().get_result("id").await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored, Some(failure));
    }
}
