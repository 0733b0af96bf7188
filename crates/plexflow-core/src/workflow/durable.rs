//! Contract with the durable-execution substrate.
//!
//! The engines never retry, back off or persist anything themselves; every
//! leaf operation and every nested workflow goes through a `DurableExecutor`.
//! Uses RPITIT for the async methods. `BoxDurableExecutor` provides the
//! type-erased, cheaply clonable form the engines hold at runtime:
//! 1. `DurableExecutorDyn` is the object-safe mirror with boxed futures
//! 2. a blanket impl covers every `T: DurableExecutor`
//! 3. `BoxDurableExecutor` wraps `Arc<dyn DurableExecutorDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ActivityError
// ---------------------------------------------------------------------------

/// Failure reported by an activity or by the executor running it.
///
/// Errors returned across the `DurableExecutor` boundary are terminal for the
/// calling step: the executor has already applied its own retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActivityError {
    /// Transient failure; executors may retry it.
    #[error("activity failed: {0}")]
    Failed(String),

    /// Permanent failure; never retried.
    #[error("activity failed permanently: {0}")]
    Fatal(String),

    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),

    #[error("child workflow '{workflow_name}' failed: {error}")]
    ChildWorkflowFailed { workflow_name: String, error: String },

    #[error("child workflow depth {depth} exceeds maximum {max}")]
    DepthExceeded { depth: u32, max: u32 },
}

impl ActivityError {
    /// Whether an executor may run the call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActivityError::Failed(_) | ActivityError::Timeout { .. })
    }
}

// ---------------------------------------------------------------------------
// DurableExecutor
// ---------------------------------------------------------------------------

/// Executes leaf operations and nested workflows reliably.
///
/// Implementations own retry/backoff, timeouts and crash-safe resumption.
/// The in-process implementation lives in plexflow-infra.
pub trait DurableExecutor: Send + Sync {
    /// Run the operation registered as `name` with `input`, bounded by `timeout`.
    fn execute_activity(
        &self,
        name: &str,
        input: Value,
        timeout: Duration,
    ) -> impl Future<Output = Result<Value, ActivityError>> + Send;

    /// Run the workflow `workflow_name` as a child instance `instance_id`.
    ///
    /// `instance_id` is unique per invocation so repeated runs of the same
    /// blueprint never collide.
    fn execute_child_workflow(
        &self,
        workflow_name: &str,
        input: Value,
        instance_id: &str,
    ) -> impl Future<Output = Result<Value, ActivityError>> + Send;
}

/// Object-safe version of [`DurableExecutor`] with boxed futures.
pub trait DurableExecutorDyn: Send + Sync {
    fn execute_activity_boxed<'a>(
        &'a self,
        name: &'a str,
        input: Value,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + 'a>>;

    fn execute_child_workflow_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
        input: Value,
        instance_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + 'a>>;
}

impl<T: DurableExecutor> DurableExecutorDyn for T {
    fn execute_activity_boxed<'a>(
        &'a self,
        name: &'a str,
        input: Value,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + 'a>> {
        Box::pin(self.execute_activity(name, input, timeout))
    }

    fn execute_child_workflow_boxed<'a>(
        &'a self,
        workflow_name: &'a str,
        input: Value,
        instance_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + 'a>> {
        Box::pin(self.execute_child_workflow(workflow_name, input, instance_id))
    }
}

/// Type-erased executor shared by the engines and their spawned tasks.
///
/// Cloning shares the same underlying executor.
#[derive(Clone)]
pub struct BoxDurableExecutor {
    inner: Arc<dyn DurableExecutorDyn>,
}

impl BoxDurableExecutor {
    pub fn new<T: DurableExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    /// Wrap an executor that is already shared elsewhere.
    pub fn from_arc<T: DurableExecutor + 'static>(executor: Arc<T>) -> Self {
        Self { inner: executor }
    }

    pub async fn execute_activity(
        &self,
        name: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, ActivityError> {
        self.inner.execute_activity_boxed(name, input, timeout).await
    }

    pub async fn execute_child_workflow(
        &self,
        workflow_name: &str,
        input: Value,
        instance_id: &str,
    ) -> Result<Value, ActivityError> {
        self.inner
            .execute_child_workflow_boxed(workflow_name, input, instance_id)
            .await
    }
}

impl std::fmt::Debug for BoxDurableExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDurableExecutor").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
