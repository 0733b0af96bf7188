//! Registry of leaf operations ("activities").
//!
//! The interpreter checks activity steps against the registry before a run
//! starts; the in-process executor resolves and invokes the registered
//! callable. Activities are stored type-erased behind [`ActivityDyn`], the
//! same blanket-impl pattern as [`super::durable::BoxDurableExecutor`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::durable::ActivityError;

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

/// A callable leaf operation. Input and output are opaque JSON.
pub trait Activity: Send + Sync {
    fn invoke(&self, input: Value) -> impl Future<Output = Result<Value, ActivityError>> + Send;
}

/// Object-safe version of [`Activity`].
pub trait ActivityDyn: Send + Sync {
    fn invoke_boxed(
        &self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + '_>>;
}

impl<T: Activity> ActivityDyn for T {
    fn invoke_boxed(
        &self,
        input: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + '_>> {
        Box::pin(self.invoke(input))
    }
}

/// Adapts an async closure into an [`Activity`].
pub struct FnActivity<F> {
    f: F,
}

impl<F> FnActivity<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Activity for FnActivity<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActivityError>> + Send,
{
    fn invoke(&self, input: Value) -> impl Future<Output = Result<Value, ActivityError>> + Send {
        (self.f)(input)
    }
}

// ---------------------------------------------------------------------------
// StepRegistry
// ---------------------------------------------------------------------------

/// Maps operation names to activities.
#[derive(Clone, Default)]
pub struct StepRegistry {
    activities: HashMap<String, Arc<dyn ActivityDyn>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `activity` under `name`, replacing any previous registration.
    pub fn register<A: Activity + 'static>(
        &mut self,
        name: impl Into<String>,
        activity: A,
    ) -> &mut Self {
        let name = name.into();
        if self
            .activities
            .insert(name.clone(), Arc::new(activity))
            .is_some()
        {
            tracing::warn!(operation = name.as_str(), "replacing registered activity");
        }
        self
    }

    /// Register an async closure under `name`.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
    {
        self.register(name, FnActivity::new(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActivityDyn>> {
        self.activities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.activities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Invoke the activity registered as `name` once.
    pub async fn invoke(&self, name: &str, input: Value) -> Result<Value, ActivityError> {
        let activity = self
            .get(name)
            .ok_or_else(|| ActivityError::UnknownOperation(name.to_string()))?;
        activity.invoke_boxed(input).await
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("activities", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
