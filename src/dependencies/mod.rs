//! # Dependencies
//!
//! Execution context and dependency injection for task bodies.
//!
//! A task declares what it needs in its [`ParamSchema`](crate::registry::ParamSchema):
//! wire values, the [`Context`], a [`ProgressTracker`](crate::progress::ProgressTracker)
//! or values from named [`Dependency`] providers. The [`DependencyResolver`] produces
//! the matching [`TaskArgs`] for each invocation.

pub mod context;
pub mod provider;
pub mod resolver;

pub use context::Context;
pub use provider::{Dependency, DependencyScope, FactoryDependency, Injected, ValueDependency};
pub use resolver::{BoundArguments, DependencyResolver, TaskArgs};
