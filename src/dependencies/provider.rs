//! Dependency providers: named factories for values injected into task parameters.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use super::context::Context;
use crate::error::{QueueError, QueueResult};

/// Type-erased injected value
pub type Injected = Arc<dyn Any + Send + Sync>;

/// A named provider registered on the [`TaskRegistry`](crate::registry::TaskRegistry)
///
/// Providers may depend on other providers by name. The registry rejects unknown names
/// and cycles when it is built; at invocation time each provider runs at most once,
/// after everything it depends on.
#[async_trait]
pub trait Dependency: Send + Sync + 'static {
    /// Names of the providers this one needs
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Produce the value for one invocation
    async fn resolve(&self, scope: &DependencyScope<'_>) -> anyhow::Result<Injected>;
}

/// What a provider can see while resolving: the execution context and the values of
/// providers resolved before it
pub struct DependencyScope<'a> {
    context: &'a Arc<Context>,
    resolved: &'a HashMap<String, Injected>,
}

impl<'a> DependencyScope<'a> {
    pub(crate) fn new(context: &'a Arc<Context>, resolved: &'a HashMap<String, Injected>) -> Self {
        Self { context, resolved }
    }

    pub fn context(&self) -> &Context {
        self.context
    }

    /// Value of an already-resolved provider
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> QueueResult<Arc<T>> {
        downcast(self.context.message().task_name.as_str(), name, self.resolved.get(name))
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(
    task_name: &str,
    name: &str,
    value: Option<&Injected>,
) -> QueueResult<Arc<T>> {
    let value = value.ok_or_else(|| {
        QueueError::resolution(task_name, format!("dependency {name} is not resolved"))
    })?;
    value.clone().downcast::<T>().map_err(|_| {
        QueueError::resolution(
            task_name,
            format!(
                "dependency {name} is not a {}",
                std::any::type_name::<T>()
            ),
        )
    })
}

/// Provider handing out one shared value to every invocation
pub struct ValueDependency<T> {
    value: Arc<T>,
}

impl<T: Send + Sync + 'static> ValueDependency<T> {
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Share a value the caller keeps a handle to
    pub fn from_arc(value: Arc<T>) -> Self {
        Self { value }
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> Dependency for ValueDependency<T> {
    async fn resolve(&self, _scope: &DependencyScope<'_>) -> anyhow::Result<Injected> {
        Ok(self.value.clone())
    }
}

/// Provider building a fresh value per invocation from the scope
pub struct FactoryDependency<F> {
    depends_on: Vec<String>,
    factory: F,
}

impl<F> FactoryDependency<F> {
    pub fn new<I, S, T>(depends_on: I, factory: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&DependencyScope<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        Self {
            depends_on: depends_on.into_iter().map(Into::into).collect(),
            factory,
        }
    }
}

#[async_trait]
impl<F, T> Dependency for FactoryDependency<F>
where
    F: Fn(&DependencyScope<'_>) -> anyhow::Result<T> + Send + Sync + 'static,
    T: Send + Sync + 'static,
{
    fn depends_on(&self) -> Vec<String> {
        self.depends_on.clone()
    }

    async fn resolve(&self, scope: &DependencyScope<'_>) -> anyhow::Result<Injected> {
        let value = (self.factory)(scope)?;
        Ok(Arc::new(value))
    }
}
