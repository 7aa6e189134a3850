//! # Worker
//!
//! Process-level lifecycle around a [`Receiver`]: broker startup, the listen loop,
//! graceful drain and broker shutdown.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tasker_queue::{InMemoryBroker, QueueConfig, Worker};
//!
//! # async fn example() -> Result<(), tasker_queue::QueueError> {
//! let config = QueueConfig::load()?;
//! let broker = InMemoryBroker::builder().build();
//! let worker = Worker::new(broker, config.receiver);
//! let shutdown = worker.shutdown_handle();
//!
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.shutdown();
//! });
//! worker.run().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::broker::Broker;
use crate::config::ReceiverConfig;
use crate::error::QueueResult;
use crate::receiver::{Receiver, ReceiverStatsSnapshot};

/// Cloneable trigger for a graceful stop
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Stop pulling new messages; in-flight executions are drained
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }
}

pub struct Worker {
    broker: Arc<dyn Broker>,
    receiver: Arc<Receiver>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("broker", &self.broker.name())
            .field("receiver", &self.receiver)
            .finish()
    }
}

impl Worker {
    pub fn new(broker: Arc<dyn Broker>, config: ReceiverConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            receiver: Arc::new(Receiver::new(broker.clone(), config)),
            broker,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            sender: self.shutdown.clone(),
        }
    }

    pub fn receiver(&self) -> &Arc<Receiver> {
        &self.receiver
    }

    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.receiver.stats()
    }

    /// Start the broker, process messages until shutdown, drain and stop the broker
    pub async fn run(&self) -> QueueResult<()> {
        self.broker.startup().await?;
        info!(broker = self.broker.name(), "Worker started");

        let listened = self
            .receiver
            .clone()
            .listen(self.shutdown.subscribe())
            .await;
        if let Err(e) = &listened {
            error!(error = %e, "Receiver stopped with error");
        }

        let stopped = self.broker.shutdown().await;
        info!(stats = ?self.receiver.stats(), "Worker stopped");
        listened.and(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;

    #[tokio::test]
    async fn test_shutdown_before_run_returns_promptly() {
        let worker = Worker::new(InMemoryBroker::builder().build(), ReceiverConfig::default());
        let handle = worker.shutdown_handle();
        handle.shutdown();
        assert!(handle.is_shutdown());

        tokio::time::timeout(std::time::Duration::from_secs(1), worker.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(worker.stats().received, 0);
    }
}
