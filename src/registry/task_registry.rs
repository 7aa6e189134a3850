//! # Task Registry
//!
//! Maps task names to their callables, declared parameter schemas and static labels.
//! Built once at startup through [`TaskRegistryBuilder`], which validates the whole
//! dependency graph; read-only afterwards and shared by every execution.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use super::params::ParamSchema;
use crate::dependencies::{Dependency, TaskArgs};
use crate::error::{QueueError, QueueResult};

/// Non-blocking task body
pub type AsyncTaskFn =
    Arc<dyn Fn(TaskArgs) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// Blocking task body, run on the bounded blocking pool
pub type BlockingTaskFn = Arc<dyn Fn(TaskArgs) -> anyhow::Result<Value> + Send + Sync>;

/// Execution lane of a task body
#[derive(Clone)]
pub enum TaskHandler {
    Async(AsyncTaskFn),
    Blocking(BlockingTaskFn),
}

impl std::fmt::Debug for TaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Async(_) => f.write_str("TaskHandler::Async"),
            Self::Blocking(_) => f.write_str("TaskHandler::Blocking"),
        }
    }
}

/// A registered task
#[derive(Debug, Clone)]
pub struct TaskRegistration {
    name: String,
    handler: TaskHandler,
    schema: ParamSchema,
    labels: HashMap<String, String>,
    /// Providers this task needs, dependencies before dependents
    dependency_order: Vec<String>,
}

impl TaskRegistration {
    /// Register a non-blocking task body
    ///
    /// ```rust
    /// use tasker_queue::registry::{Param, ParamType, TaskRegistration};
    ///
    /// let add = TaskRegistration::new_async(
    ///     "add",
    ///     vec![Param::required("a", ParamType::Integer), Param::required("b", ParamType::Integer)],
    ///     |args| async move { Ok(args.get::<i64>("a")? + args.get::<i64>("b")?) },
    /// );
    /// assert!(!add.is_blocking());
    /// ```
    pub fn new_async<F, Fut, R>(name: impl Into<String>, schema: impl Into<ParamSchema>, f: F) -> Self
    where
        F: Fn(TaskArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Serialize,
    {
        let handler: AsyncTaskFn = Arc::new(move |args| {
            let fut = f(args);
            async move {
                let value = fut.await?;
                Ok(serde_json::to_value(value)?)
            }
            .boxed()
        });
        Self::with_handler(name, schema, TaskHandler::Async(handler))
    }

    /// Register a blocking task body
    pub fn new_blocking<F, R>(name: impl Into<String>, schema: impl Into<ParamSchema>, f: F) -> Self
    where
        F: Fn(TaskArgs) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Serialize,
    {
        let handler: BlockingTaskFn = Arc::new(move |args| Ok(serde_json::to_value(f(args)?)?));
        Self::with_handler(name, schema, TaskHandler::Blocking(handler))
    }

    fn with_handler(name: impl Into<String>, schema: impl Into<ParamSchema>, handler: TaskHandler) -> Self {
        Self {
            name: name.into(),
            handler,
            schema: schema.into(),
            labels: HashMap::new(),
            dependency_order: Vec::new(),
        }
    }

    /// Attach a static label, merged into every message sent for this task
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &TaskHandler {
        &self.handler
    }

    pub fn schema(&self) -> &ParamSchema {
        &self.schema
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }

    pub fn dependency_order(&self) -> &[String] {
        &self.dependency_order
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.handler, TaskHandler::Blocking(_))
    }
}

/// Immutable task and provider lookup
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<TaskRegistration>>,
    providers: HashMap<String, Arc<dyn Dependency>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<&String> = self.providers.keys().collect();
        providers.sort();
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.task_names())
            .field("providers", &providers)
            .finish()
    }
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    pub fn get(&self, task_name: &str) -> Option<Arc<TaskRegistration>> {
        self.tasks.get(task_name).cloned()
    }

    pub fn contains(&self, task_name: &str) -> bool {
        self.tasks.contains_key(task_name)
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<dyn Dependency>> {
        self.providers.get(name)
    }

    /// Registered task names, sorted
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Collects registrations and validates them into a [`TaskRegistry`]
#[derive(Default)]
pub struct TaskRegistryBuilder {
    tasks: Vec<TaskRegistration>,
    providers: Vec<(String, Arc<dyn Dependency>)>,
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Visiting,
    Done,
}

impl TaskRegistryBuilder {
    pub fn register(mut self, registration: TaskRegistration) -> Self {
        self.tasks.push(registration);
        self
    }

    /// Register a named dependency provider
    pub fn provider(mut self, name: impl Into<String>, provider: Arc<dyn Dependency>) -> Self {
        self.providers.push((name.into(), provider));
        self
    }

    /// Validate and freeze the registry.
    ///
    /// Fails on duplicate task or provider names, duplicate parameter names, references
    /// to unregistered providers and provider cycles.
    pub fn build(self) -> QueueResult<TaskRegistry> {
        let mut providers: HashMap<String, Arc<dyn Dependency>> = HashMap::new();
        for (name, provider) in self.providers {
            if providers.insert(name.clone(), provider).is_some() {
                return Err(QueueError::configuration(
                    "registry",
                    format!("provider {name} registered twice"),
                ));
            }
        }

        let mut tasks = HashMap::new();
        for mut registration in self.tasks {
            if tasks.contains_key(&registration.name) {
                return Err(QueueError::DuplicateTask {
                    task_name: registration.name,
                });
            }
            if let Some(param) = registration.schema.duplicate_name() {
                return Err(QueueError::resolution(
                    &registration.name,
                    format!("parameter {param} declared twice"),
                ));
            }

            let mut marks = HashMap::new();
            let mut order = Vec::new();
            for provider in registration.schema.provider_names() {
                visit(
                    provider,
                    &registration.name,
                    &providers,
                    &mut marks,
                    &mut Vec::new(),
                    &mut order,
                )?;
            }
            debug!(
                task_name = %registration.name,
                dependency_order = ?order,
                blocking = registration.is_blocking(),
                "Registered task"
            );
            registration.dependency_order = order;
            tasks.insert(registration.name.clone(), Arc::new(registration));
        }

        info!(
            tasks = tasks.len(),
            providers = providers.len(),
            "Task registry built"
        );
        Ok(TaskRegistry { tasks, providers })
    }
}

/// Depth-first walk producing dependencies before dependents
fn visit(
    name: &str,
    required_by: &str,
    providers: &HashMap<String, Arc<dyn Dependency>>,
    marks: &mut HashMap<String, Mark>,
    stack: &mut Vec<String>,
    order: &mut Vec<String>,
) -> QueueResult<()> {
    match marks.get(name) {
        Some(Mark::Done) => return Ok(()),
        Some(Mark::Visiting) => {
            let start = stack.iter().position(|n| n == name).unwrap_or(0);
            let mut path: Vec<&str> = stack[start..].iter().map(String::as_str).collect();
            path.push(name);
            return Err(QueueError::DependencyCycle {
                path: path.join(" -> "),
            });
        }
        None => {}
    }

    let provider = providers
        .get(name)
        .ok_or_else(|| QueueError::UnknownDependency {
            dependency: name.to_string(),
            required_by: required_by.to_string(),
        })?;

    marks.insert(name.to_string(), Mark::Visiting);
    stack.push(name.to_string());
    for nested in provider.depends_on() {
        visit(&nested, name, providers, marks, stack, order)?;
    }
    stack.pop();
    marks.insert(name.to_string(), Mark::Done);
    order.push(name.to_string());
    Ok(())
}
