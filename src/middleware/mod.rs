//! # Middleware
//!
//! Hook objects invoked around task sending and execution.
//!
//! ## Lifecycle
//!
//! ```text
//! producer:  pre_send ──→ kick ──→ post_send
//! receiver:  pre_execute ──→ task ──→ [on_error] ──→ post_execute ──→ set_result ──→ post_save
//! ```
//!
//! Every hook kind runs in registration order. Each hook is optional: a middleware
//! advertises the hooks it implements through [`Middleware::hooks`] and the chain only
//! invokes those.

pub mod chain;
pub mod retry;

use async_trait::async_trait;
use std::sync::Weak;

use crate::broker::Broker;
use crate::messaging::TaskMessage;
use crate::result::{TaskErrorInfo, TaskResult};

pub use chain::MiddlewareChain;
pub use retry::{RetryConfig, RetryMiddleware};

/// Hook kinds a middleware can implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    PreSend,
    PostSend,
    PreExecute,
    PostExecute,
    PostSave,
    OnError,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreSend => "pre_send",
            Self::PostSend => "post_send",
            Self::PreExecute => "pre_execute",
            Self::PostExecute => "post_execute",
            Self::PostSave => "post_save",
            Self::OnError => "on_error",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of hooks a middleware implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSet(u8);

impl HookSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b0011_1111)
    }

    pub fn with(self, hook: Hook) -> Self {
        Self(self.0 | hook.bit())
    }

    pub fn contains(&self, hook: Hook) -> bool {
        self.0 & hook.bit() != 0
    }
}

impl FromIterator<Hook> for HookSet {
    fn from_iter<I: IntoIterator<Item = Hook>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), HookSet::with)
    }
}

/// A middleware participating in the send and execute lifecycle
///
/// All hooks default to no-ops. Hooks returning a message replace the message for
/// the rest of the pipeline; the others are side-effect only. Errors are reported
/// by the chain as [`QueueError::Middleware`](crate::error::QueueError).
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Middleware name for logging and error reports
    fn name(&self) -> &str;

    /// Hooks this middleware implements
    fn hooks(&self) -> HookSet {
        HookSet::all()
    }

    /// Called once when the owning broker is constructed
    fn bind_broker(&self, _broker: Weak<dyn Broker>) {}

    async fn pre_send(&self, message: TaskMessage) -> anyhow::Result<TaskMessage> {
        Ok(message)
    }

    async fn post_send(&self, _message: &TaskMessage) -> anyhow::Result<()> {
        Ok(())
    }

    async fn pre_execute(&self, message: TaskMessage) -> anyhow::Result<TaskMessage> {
        Ok(message)
    }

    async fn post_execute(&self, _message: &TaskMessage, _result: &TaskResult) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_save(&self, _message: &TaskMessage, _result: &TaskResult) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return [`QueueError::NoResult`](crate::QueueError::NoResult) after sending the
    /// message again; the failed attempt is then recorded as requeued and not persisted.
    async fn on_error(
        &self,
        _message: &TaskMessage,
        _result: &TaskResult,
        _error: &TaskErrorInfo,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_set() {
        let set: HookSet = [Hook::PreExecute, Hook::PostSave].into_iter().collect();
        assert!(set.contains(Hook::PreExecute));
        assert!(set.contains(Hook::PostSave));
        assert!(!set.contains(Hook::OnError));

        let all = HookSet::all();
        for hook in [
            Hook::PreSend,
            Hook::PostSend,
            Hook::PreExecute,
            Hook::PostExecute,
            Hook::PostSave,
            Hook::OnError,
        ] {
            assert!(all.contains(hook), "{}", hook.as_str());
            assert!(!HookSet::empty().contains(hook));
        }
    }
}
