#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Queue
//!
//! Core of a distributed task queue: producers enqueue named tasks with arguments onto
//! a broker; workers consume them, run the registered callable and persist a result.
//!
//! ## Architecture
//!
//! ```text
//! producer: TaskKicker ─ pre_send ─→ Broker ─→ Receiver (worker)
//!                                                 │
//!                     TaskRegistry + DependencyResolver + MiddlewareChain
//!                                                 │
//!                                  task body (async lane | blocking lane)
//!                                                 │
//!                        ResultBackend ←─ set_result / set_progress
//! ```
//!
//! ## Module Organization
//!
//! - [`messaging`] - Wire envelope and codecs
//! - [`broker`] - Broker contract and in-memory broker
//! - [`backend`] - Result backend contract and in-memory backend
//! - [`registry`] - Task registrations and parameter schemas
//! - [`dependencies`] - Execution context and dependency injection
//! - [`middleware`] - Hook chain and retry policy
//! - [`receiver`] - Execution engine with admission control
//! - [`progress`] - Progress tracker for running tasks
//! - [`kicker`] - Producer side
//! - [`worker`] - Receive loop lifecycle
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use serde_json::{json, Map};
//! use tasker_queue::{
//!     InMemoryBroker, Param, ParamType, Receiver, ReceiverConfig, TaskKicker,
//!     TaskRegistration, TaskRegistry,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = TaskRegistry::builder()
//!     .register(TaskRegistration::new_async(
//!         "add",
//!         vec![Param::required("a", ParamType::Integer), Param::required("b", ParamType::Integer)],
//!         |args| async move { Ok(args.get::<i64>("a")? + args.get::<i64>("b")?) },
//!     ))
//!     .build()?;
//! let broker = InMemoryBroker::builder().registry(registry).build();
//!
//! let handle = TaskKicker::new(broker.clone(), "add")
//!     .kiq(vec![json!(2), json!(3)], Map::new())
//!     .await?;
//!
//! let receiver = Receiver::new(broker.clone(), ReceiverConfig::default());
//! let message = receiver.broker().codec().decode(&next_payload(&broker).await)?;
//! receiver.callback(message).await;
//!
//! let result = handle.wait_result(Duration::from_millis(10), Duration::from_secs(1)).await?;
//! assert_eq!(result.return_value(), Some(&json!(5)));
//! # Ok(())
//! # }
//! # async fn next_payload(broker: &InMemoryBroker) -> Vec<u8> {
//! #     use futures::StreamExt;
//! #     use tasker_queue::Broker;
//! #     broker.listen().await.unwrap().next().await.unwrap()
//! # }
//! ```

pub mod backend;
pub mod broker;
pub mod config;
pub mod dependencies;
pub mod error;
pub mod kicker;
pub mod logging;
pub mod messaging;
pub mod middleware;
pub mod progress;
pub mod receiver;
pub mod registry;
pub mod result;
pub mod state;
pub mod worker;

pub use backend::{InMemoryResultBackend, ResultBackend};
pub use broker::{Broker, BrokerMessage, InMemoryBroker, InMemoryBrokerBuilder, MessageStream};
pub use config::{LoggingConfig, QueueConfig, ReceiverConfig};
pub use dependencies::{
    Context, Dependency, DependencyResolver, DependencyScope, FactoryDependency, Injected, TaskArgs,
    ValueDependency,
};
pub use error::{QueueError, QueueResult};
pub use kicker::{TaskHandle, TaskKicker};
pub use logging::init_structured_logging;
pub use messaging::{JsonCodec, MessageCodec, TaskMessage};
pub use middleware::{Hook, HookSet, Middleware, MiddlewareChain, RetryConfig, RetryMiddleware};
pub use progress::ProgressTracker;
pub use receiver::{Receiver, ReceiverStatsSnapshot};
pub use registry::{Param, ParamSchema, ParamType, TaskRegistration, TaskRegistry};
pub use result::{FailureKind, TaskErrorInfo, TaskFailure, TaskResult};
pub use state::{TaskProgress, TaskState};
pub use worker::{ShutdownHandle, Worker};
