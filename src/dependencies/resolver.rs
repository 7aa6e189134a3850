//! # Dependency Resolver
//!
//! Turns a message's `args`/`kwargs` plus the execution context into the concrete
//! arguments of a task body.
//!
//! Resolution happens in two steps:
//!
//! 1. [`DependencyResolver::bind`] matches wire values against the declared
//!    [`ParamSchema`](crate::registry::ParamSchema): positional values bind to value
//!    parameters in declaration order, keyword values by name, defaults fill the rest.
//!    Arity and name errors always fail; type checks run only when `validate_params`
//!    is enabled.
//! 2. [`DependencyResolver::resolve`] re-binds against the context's message and runs
//!    the task's providers in dependency order, each at most once.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::context::Context;
use super::provider::{downcast, DependencyScope, Injected};
use crate::error::{QueueError, QueueResult};
use crate::messaging::TaskMessage;
use crate::progress::ProgressTracker;
use crate::registry::params::value_kind;
use crate::registry::{Injection, Param, TaskRegistration, TaskRegistry};

/// Wire values bound to parameter names
pub type BoundArguments = HashMap<String, Value>;

#[derive(Debug, Clone, Copy)]
pub struct DependencyResolver {
    validate_params: bool,
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new(true)
    }
}

impl DependencyResolver {
    pub fn new(validate_params: bool) -> Self {
        Self { validate_params }
    }

    pub fn validates_params(&self) -> bool {
        self.validate_params
    }

    /// Bind wire arguments to the task's value parameters
    pub fn bind(&self, task: &TaskRegistration, message: &TaskMessage) -> QueueResult<BoundArguments> {
        let fail = |msg: String| QueueError::resolution(task.name(), msg);
        let schema = task.schema();
        let value_params: Vec<&Param> = schema.value_params().collect();

        if message.args.len() > value_params.len() {
            return Err(fail(format!(
                "takes {} positional arguments but {} were given",
                value_params.len(),
                message.args.len()
            )));
        }

        let mut bound = BoundArguments::new();
        for (param, value) in value_params.iter().zip(&message.args) {
            bound.insert(param.name().to_string(), value.clone());
        }

        for (name, value) in &message.kwargs {
            match schema.get(name) {
                None => return Err(fail(format!("unexpected keyword argument {name}"))),
                Some(Param::Inject { .. }) => {
                    return Err(fail(format!("argument {name} is injected and cannot be sent")))
                }
                Some(Param::Value { .. }) => {
                    if bound.insert(name.clone(), value.clone()).is_some() {
                        return Err(fail(format!("multiple values for argument {name}")));
                    }
                }
            }
        }

        for param in value_params {
            let Param::Value { name, ty, default } = param else {
                continue;
            };
            match bound.get(name) {
                Some(value) => {
                    if self.validate_params && !ty.accepts(value) {
                        return Err(fail(format!(
                            "argument {name} expected {}, got {}",
                            ty.as_str(),
                            value_kind(value)
                        )));
                    }
                }
                None => match default {
                    Some(default) => {
                        bound.insert(name.clone(), default.clone());
                    }
                    None => return Err(fail(format!("missing required argument {name}"))),
                },
            }
        }

        Ok(bound)
    }

    /// Build the task body's arguments for one invocation
    pub async fn resolve(
        &self,
        task: &TaskRegistration,
        registry: &TaskRegistry,
        context: Arc<Context>,
    ) -> QueueResult<TaskArgs> {
        let values = self.bind(task, context.message())?;

        let mut resolved: HashMap<String, Injected> = HashMap::new();
        for name in task.dependency_order() {
            let provider = registry
                .provider(name)
                .ok_or_else(|| QueueError::UnknownDependency {
                    dependency: name.clone(),
                    required_by: task.name().to_string(),
                })?;
            let value = provider
                .resolve(&DependencyScope::new(&context, &resolved))
                .await
                .map_err(|e| {
                    QueueError::resolution(task.name(), format!("dependency {name} failed: {e:#}"))
                })?;
            resolved.insert(name.clone(), value);
        }

        let mut injected = HashMap::new();
        for param in task.schema().params() {
            if let Param::Inject {
                name,
                injection: Injection::Provider(provider),
            } = param
            {
                if let Some(value) = resolved.get(provider) {
                    injected.insert(name.clone(), value.clone());
                }
            }
        }

        debug!(
            task_id = %context.task_id(),
            task_name = %task.name(),
            arguments = values.len(),
            dependencies = resolved.len(),
            "Resolved task arguments"
        );

        Ok(TaskArgs {
            task_name: task.name().to_string(),
            declared: task
                .schema()
                .params()
                .iter()
                .filter_map(|p| match p {
                    Param::Inject { name, injection } => Some((name.clone(), injection.clone())),
                    Param::Value { .. } => None,
                })
                .collect(),
            values,
            injected,
            context,
        })
    }
}

/// Concrete arguments passed to a task body
pub struct TaskArgs {
    task_name: String,
    values: BoundArguments,
    declared: HashMap<String, Injection>,
    injected: HashMap<String, Injected>,
    context: Arc<Context>,
}

impl std::fmt::Debug for TaskArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskArgs")
            .field("task_name", &self.task_name)
            .field("values", &self.values)
            .field("injected", &self.declared.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TaskArgs {
    /// Deserialize a bound wire argument
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> QueueResult<T> {
        let value = self.values.get(name).ok_or_else(|| {
            QueueError::resolution(&self.task_name, format!("no argument named {name}"))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            QueueError::resolution(&self.task_name, format!("argument {name}: {e}"))
        })
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &BoundArguments {
        &self.values
    }

    fn check_declared(&self, name: &str, expected: &Injection) -> QueueResult<()> {
        match self.declared.get(name) {
            Some(injection) if std::mem::discriminant(injection) == std::mem::discriminant(expected) => {
                Ok(())
            }
            _ => Err(QueueError::resolution(
                &self.task_name,
                format!("parameter {name} is not declared as {expected:?}"),
            )),
        }
    }

    /// The execution context, for a parameter declared with [`Param::context`]
    pub fn context(&self, name: &str) -> QueueResult<&Context> {
        self.check_declared(name, &Injection::Context)?;
        Ok(&self.context)
    }

    /// A progress tracker, for a parameter declared with [`Param::progress`]
    pub fn progress(&self, name: &str) -> QueueResult<ProgressTracker> {
        self.check_declared(name, &Injection::Progress)?;
        Ok(self.context.progress())
    }

    /// A provider value, for a parameter declared with [`Param::depends`]
    pub fn dependency<T: Any + Send + Sync>(&self, name: &str) -> QueueResult<Arc<T>> {
        downcast(&self.task_name, name, self.injected.get(name))
    }
}
