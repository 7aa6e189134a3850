//! # Middleware Chain
//!
//! Ordered, append-only list of middlewares. The chain is assembled while the broker is
//! built and is shared read-only afterwards.

use std::sync::{Arc, Weak};
use tracing::{debug, error};

use super::{Hook, Middleware};
use crate::broker::Broker;
use crate::error::{QueueError, QueueResult};
use crate::messaging::TaskMessage;
use crate::result::{TaskErrorInfo, TaskResult};

#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("middlewares", &self.names())
            .finish()
    }
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware; it runs after every middleware already present
    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.middlewares.iter().map(|m| m.name().to_string()).collect()
    }

    pub(crate) fn bind_broker(&self, broker: &Weak<dyn Broker>) {
        for middleware in &self.middlewares {
            middleware.bind_broker(broker.clone());
        }
    }

    fn implementing(&self, hook: Hook) -> impl Iterator<Item = &Arc<dyn Middleware>> {
        self.middlewares
            .iter()
            .filter(move |m| m.hooks().contains(hook))
    }

    fn failure(middleware: &Arc<dyn Middleware>, hook: Hook, err: anyhow::Error) -> QueueError {
        QueueError::middleware(middleware.name(), hook.as_str(), format!("{err:#}"))
    }

    /// Run `pre_send` hooks, threading the message through each
    pub async fn pre_send(&self, mut message: TaskMessage) -> QueueResult<TaskMessage> {
        for middleware in self.implementing(Hook::PreSend) {
            message = middleware
                .pre_send(message)
                .await
                .map_err(|e| Self::failure(middleware, Hook::PreSend, e))?;
        }
        Ok(message)
    }

    /// Run `post_send` hooks
    pub async fn post_send(&self, message: &TaskMessage) -> QueueResult<()> {
        for middleware in self.implementing(Hook::PostSend) {
            middleware
                .post_send(message)
                .await
                .map_err(|e| Self::failure(middleware, Hook::PostSend, e))?;
        }
        Ok(())
    }

    /// Run `pre_execute` hooks, threading the message through each
    pub async fn pre_execute(&self, mut message: TaskMessage) -> QueueResult<TaskMessage> {
        for middleware in self.implementing(Hook::PreExecute) {
            debug!(
                middleware = middleware.name(),
                task_id = %message.task_id,
                "Running pre_execute hook"
            );
            message = middleware
                .pre_execute(message)
                .await
                .map_err(|e| Self::failure(middleware, Hook::PreExecute, e))?;
        }
        Ok(message)
    }

    /// Run `post_execute` hooks, stopping at the first failure
    pub async fn post_execute(&self, message: &TaskMessage, result: &TaskResult) -> QueueResult<()> {
        for middleware in self.implementing(Hook::PostExecute) {
            middleware
                .post_execute(message, result)
                .await
                .map_err(|e| Self::failure(middleware, Hook::PostExecute, e))?;
        }
        Ok(())
    }

    /// Run `post_save` hooks. The result is already durable, so failures are logged
    /// and the remaining hooks still run.
    pub async fn post_save(&self, message: &TaskMessage, result: &TaskResult) {
        for middleware in self.implementing(Hook::PostSave) {
            if let Err(e) = middleware.post_save(message, result).await {
                error!(
                    middleware = middleware.name(),
                    task_id = %message.task_id,
                    error = %e,
                    "post_save hook failed"
                );
            }
        }
    }

    /// Run `on_error` hooks. Failures are logged and the remaining hooks still run.
    ///
    /// Returns `true` when a hook re-sent the message, signalled by returning
    /// [`QueueError::NoResult`].
    pub async fn on_error(
        &self,
        message: &TaskMessage,
        result: &TaskResult,
        error: &TaskErrorInfo,
    ) -> bool {
        let mut resent = false;
        for middleware in self.implementing(Hook::OnError) {
            match middleware.on_error(message, result, error).await {
                Ok(()) => {}
                Err(e) if matches!(e.downcast_ref::<QueueError>(), Some(QueueError::NoResult)) => {
                    debug!(
                        middleware = middleware.name(),
                        task_id = %message.task_id,
                        "Message re-sent by on_error hook"
                    );
                    resent = true;
                }
                Err(e) => {
                    error!(
                        middleware = middleware.name(),
                        task_id = %message.task_id,
                        error = %e,
                        "on_error hook failed"
                    );
                }
            }
        }
        resent
    }
}
