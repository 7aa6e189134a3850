//! # In-Memory Broker
//!
//! Channel-backed broker for testing and single-process deployments.
//!
//! ## Features
//!
//! - **Bounded channel**: `kick` waits when `capacity` messages are queued, which is the
//!   broker-side flow control that bounds buffering ahead of the receiver
//! - **Shared consumption**: several `listen()` streams may coexist; each message is
//!   delivered to exactly one of them
//! - **Explicit close**: after `shutdown()` every `kick` fails with a transport error

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::backend::{InMemoryResultBackend, ResultBackend};
use crate::broker::{Broker, BrokerMessage, MessageStream};
use crate::error::{QueueError, QueueResult};
use crate::messaging::{JsonCodec, MessageCodec};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::registry::TaskRegistry;

/// Default number of queued messages before `kick` applies backpressure
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub struct InMemoryBroker {
    sender: mpsc::Sender<Vec<u8>>,
    receiver: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    closed: AtomicBool,
    registry: TaskRegistry,
    middlewares: MiddlewareChain,
    result_backend: Arc<dyn ResultBackend>,
    codec: Arc<dyn MessageCodec>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("tasks", &self.registry.task_names())
            .field("middlewares", &self.middlewares)
            .field("result_backend", &self.result_backend.name())
            .field("codec", &self.codec.name())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl InMemoryBroker {
    pub fn builder() -> InMemoryBrokerBuilder {
        InMemoryBrokerBuilder::default()
    }

    /// Number of messages waiting in the channel (for testing)
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn startup(&self) -> QueueResult<()> {
        self.closed.store(false, Ordering::Release);
        self.result_backend.startup().await?;
        info!(
            broker = self.name(),
            tasks = self.registry.len(),
            middlewares = self.middlewares.len(),
            "Broker started"
        );
        Ok(())
    }

    async fn shutdown(&self) -> QueueResult<()> {
        self.closed.store(true, Ordering::Release);
        self.result_backend.shutdown().await?;
        info!(broker = self.name(), "Broker shut down");
        Ok(())
    }

    async fn kick(&self, message: BrokerMessage) -> QueueResult<()> {
        if self.is_closed() {
            return Err(QueueError::transport("kick", "broker is shut down"));
        }
        debug!(
            task_id = %message.task_id,
            task_name = %message.task_name,
            bytes = message.payload.len(),
            "Enqueueing message"
        );
        self.sender
            .send(message.payload)
            .await
            .map_err(|_| QueueError::transport("kick", "channel closed"))
    }

    async fn listen(&self) -> QueueResult<MessageStream> {
        let receiver = self.receiver.clone();
        let stream = futures::stream::unfold(receiver, |receiver| async move {
            let next = receiver.lock().await.recv().await;
            next.map(|payload| (payload, receiver))
        });
        Ok(stream.boxed())
    }

    fn result_backend(&self) -> Arc<dyn ResultBackend> {
        self.result_backend.clone()
    }

    fn middlewares(&self) -> &MiddlewareChain {
        &self.middlewares
    }

    fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    fn codec(&self) -> &dyn MessageCodec {
        self.codec.as_ref()
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

/// Builder assembling an [`InMemoryBroker`] and its shared collaborators
pub struct InMemoryBrokerBuilder {
    registry: TaskRegistry,
    middlewares: MiddlewareChain,
    result_backend: Option<Arc<dyn ResultBackend>>,
    codec: Option<Arc<dyn MessageCodec>>,
    capacity: usize,
}

impl Default for InMemoryBrokerBuilder {
    fn default() -> Self {
        Self {
            registry: TaskRegistry::default(),
            middlewares: MiddlewareChain::new(),
            result_backend: None,
            codec: None,
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl InMemoryBrokerBuilder {
    pub fn registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Append a middleware to the chain
    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn result_backend(mut self, backend: Arc<dyn ResultBackend>) -> Self {
        self.result_backend = Some(backend);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Channel capacity (minimum 1)
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> Arc<InMemoryBroker> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let Self {
            registry,
            middlewares,
            result_backend,
            codec,
            ..
        } = self;

        Arc::new_cyclic(|weak: &Weak<InMemoryBroker>| {
            let broker: Weak<dyn Broker> = weak.clone();
            middlewares.bind_broker(&broker);

            InMemoryBroker {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
                closed: AtomicBool::new(false),
                registry,
                middlewares,
                result_backend: result_backend
                    .unwrap_or_else(|| Arc::new(InMemoryResultBackend::new())),
                codec: codec.unwrap_or_else(|| Arc::new(JsonCodec)),
            }
        })
    }
}
