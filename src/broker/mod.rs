//! # Brokers
//!
//! Transport-agnostic message source and sink.
//!
//! A broker owns everything executions share: the task registry, the middleware chain,
//! the result backend and the codec. One broker is constructed at startup and passed by
//! `Arc` into every receiver and execution context.
//!
//! ## Contract
//!
//! - `listen()` yields encoded messages lazily and indefinitely. It is restartable only
//!   by calling `listen()` again, never rewindable.
//! - `kick()` enqueues an encoded message, failing with
//!   [`QueueError::Transport`](crate::error::QueueError) when the channel is unavailable.
//! - `id_generator()` returns a fresh unique task id; ordering is not guaranteed.

pub mod in_memory;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::ResultBackend;
use crate::error::QueueResult;
use crate::messaging::MessageCodec;
use crate::middleware::MiddlewareChain;
use crate::registry::TaskRegistry;

pub use in_memory::{InMemoryBroker, InMemoryBrokerBuilder};

/// Stream of encoded inbound messages
pub type MessageStream = BoxStream<'static, Vec<u8>>;

/// Encoded message handed to a transport, with routing metadata kept in the clear
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub task_id: String,
    pub task_name: String,
    pub payload: Vec<u8>,
    pub labels: HashMap<String, String>,
}

/// Message transport shared by producers and receivers
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Prepare the transport and the result backend
    async fn startup(&self) -> QueueResult<()> {
        self.result_backend().startup().await
    }

    /// Release the transport and the result backend
    async fn shutdown(&self) -> QueueResult<()> {
        self.result_backend().shutdown().await
    }

    /// Enqueue an encoded message
    async fn kick(&self, message: BrokerMessage) -> QueueResult<()>;

    /// Start consuming encoded messages
    async fn listen(&self) -> QueueResult<MessageStream>;

    /// Produce a fresh unique task id
    fn id_generator(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    fn result_backend(&self) -> Arc<dyn ResultBackend>;

    fn middlewares(&self) -> &MiddlewareChain;

    fn registry(&self) -> &TaskRegistry;

    fn codec(&self) -> &dyn MessageCodec;

    /// Broker name for logging
    fn name(&self) -> &str;
}
