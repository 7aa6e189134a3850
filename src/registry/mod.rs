//! # Task Registry
//!
//! Registration of task callables, their declared parameters and static labels.
//!
//! ## Architecture
//!
//! ```text
//! Task Registry
//! ├── TaskRegistration   (callable + ParamSchema + labels + provider order)
//! ├── ParamSchema        (wire parameters and injected values)
//! └── providers          (named Dependency implementations)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use tasker_queue::registry::{Param, ParamType, TaskRegistration, TaskRegistry};
//!
//! let registry = TaskRegistry::builder()
//!     .register(TaskRegistration::new_async(
//!         "add",
//!         vec![Param::required("a", ParamType::Integer), Param::required("b", ParamType::Integer)],
//!         |args| async move { Ok(args.get::<i64>("a")? + args.get::<i64>("b")?) },
//!     ))
//!     .build()
//!     .expect("valid registry");
//!
//! assert!(registry.contains("add"));
//! ```

pub mod params;
pub mod task_registry;

pub use params::{Injection, Param, ParamSchema, ParamType};
pub use task_registry::{
    AsyncTaskFn, BlockingTaskFn, TaskHandler, TaskRegistration, TaskRegistry, TaskRegistryBuilder,
};
