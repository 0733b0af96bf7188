//! In-process durable executor.
//!
//! `InProcessExecutor` implements `DurableExecutor` without an external
//! substrate: activities are invoked from the shared `StepRegistry` under a
//! per-attempt timeout and retried per `RetryPolicy`; child workflows are
//! looked up in a `BlueprintCatalog` and run by a nested interpreter whose
//! initial context is the child step's params.

use std::sync::Arc;
use std::time::Duration;

use plexflow_core::workflow::durable::{ActivityError, DurableExecutor};
use plexflow_core::workflow::interpreter::BlueprintInterpreter;
use plexflow_core::workflow::registry::StepRegistry;
use plexflow_core::workflow::resolver::DependencyResolver;
use plexflow_core::workflow::retry::RetryHandler;
use plexflow_types::config::EngineConfig;
use serde_json::{Map, Value};

use super::catalog::BlueprintCatalog;

/// Local `DurableExecutor` with retry, timeouts and a blueprint catalog.
///
/// Clones share the registry and catalog. No state is kept between calls.
#[derive(Debug, Clone)]
pub struct InProcessExecutor {
    registry: Arc<StepRegistry>,
    catalog: Arc<BlueprintCatalog>,
    config: EngineConfig,
    /// Nesting level of the workflow this executor serves (0 = top level).
    depth: u32,
}

impl InProcessExecutor {
    pub fn new(registry: Arc<StepRegistry>, catalog: BlueprintCatalog) -> Self {
        Self {
            registry,
            catalog: Arc::new(catalog),
            config: EngineConfig::default(),
            depth: 0,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// An interpreter wired to this executor, registry and configuration.
    pub fn interpreter(&self) -> BlueprintInterpreter {
        BlueprintInterpreter::new(Arc::clone(&self.registry), self.clone())
            .with_config(self.config.clone())
    }

    /// A dependency resolver wired to this executor and configuration.
    pub fn resolver(&self) -> DependencyResolver {
        DependencyResolver::new(self.clone()).with_config(self.config.clone())
    }

    pub fn catalog(&self) -> &BlueprintCatalog {
        &self.catalog
    }

    fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }
}

impl DurableExecutor for InProcessExecutor {
    async fn execute_activity(
        &self,
        name: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, ActivityError> {
        let activity = self
            .registry
            .get(name)
            .ok_or_else(|| ActivityError::UnknownOperation(name.to_string()))?;
        let policy = &self.config.retry;

        let mut attempt: u32 = 1;
        loop {
            let call = activity.invoke_boxed(input.clone());
            let outcome = match tokio::time::timeout(timeout, call).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => Err(ActivityError::Timeout { timeout }),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            operation = name,
                            attempt,
                            "activity succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) if RetryHandler::should_retry(policy, attempt, &err) => {
                    let delay = RetryHandler::backoff_delay(policy, attempt);
                    tracing::warn!(
                        operation = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "activity failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn execute_child_workflow(
        &self,
        workflow_name: &str,
        input: Value,
        instance_id: &str,
    ) -> Result<Value, ActivityError> {
        let nested = self.nested();
        if nested.depth > self.config.max_child_depth {
            return Err(ActivityError::DepthExceeded {
                depth: nested.depth,
                max: self.config.max_child_depth,
            });
        }

        let blueprint = self
            .catalog
            .get(workflow_name)
            .ok_or_else(|| ActivityError::UnknownWorkflow(workflow_name.to_string()))?;

        let initial = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };

        tracing::debug!(
            workflow = workflow_name,
            instance_id,
            depth = nested.depth,
            "running child workflow in-process"
        );
        let result = nested.interpreter().execute(blueprint, initial).await;
        if !result.is_completed() {
            return Err(ActivityError::ChildWorkflowFailed {
                workflow_name: workflow_name.to_string(),
                error: result.error.unwrap_or_else(|| "child workflow failed".to_string()),
            });
        }

        // The child's output is the result of each of its top-level steps
        let output: Map<String, Value> = blueprint
            .steps
            .iter()
            .filter_map(|step| {
                result
                    .context
                    .get(&step.id)
                    .map(|value| (step.id.clone(), value.clone()))
            })
            .collect();
        Ok(Value::Object(output))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use plexflow_core::workflow::registry::Activity;
    use plexflow_types::config::RetryPolicy;
    use plexflow_types::workflow::{ExecutionStatus, PipelineStep, WorkflowBlueprint, WorkflowStep};
    use serde_json::json;

    /// Fails with `error` for the first `failures` calls, then returns the call count.
    struct Flaky {
        calls: Arc<AtomicU32>,
        failures: u32,
        error: ActivityError,
    }

    impl Activity for Flaky {
        async fn invoke(&self, _input: Value) -> Result<Value, ActivityError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                Err(self.error.clone())
            } else {
                Ok(json!(n))
            }
        }
    }

    fn fast_retry(max_attempts: u32) -> EngineConfig {
        EngineConfig {
            retry: RetryPolicy {
                max_attempts,
                initial_backoff_ms: 1,
                backoff_multiplier: 2.0,
                max_backoff_ms: 5,
            },
            ..EngineConfig::default()
        }
    }

    fn flaky_registry(failures: u32, error: ActivityError) -> (Arc<StepRegistry>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = StepRegistry::new();
        registry.register(
            "flaky",
            Flaky {
                calls: Arc::clone(&calls),
                failures,
                error,
            },
        );
        (Arc::new(registry), calls)
    }

    fn base_registry() -> Arc<StepRegistry> {
        let mut registry = StepRegistry::new();
        registry
            .register_fn("double", |input: Value| async move {
                let n = input["n"].as_i64().unwrap_or_default();
                Ok(json!(n * 2))
            })
            .register_fn("fail", |_| async {
                Err(ActivityError::Fatal("broken".to_string()))
            })
            .register_fn("load", |_| async { Ok(json!("loaded")) })
            .register_fn("sleepy", |_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(Value::Null)
            });
        Arc::new(registry)
    }

    // -----------------------------------------------------------------------
    // Activities
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn retries_transient_failures() {
        let (registry, calls) = flaky_registry(2, ActivityError::Failed("blip".into()));
        let executor =
            InProcessExecutor::new(registry, BlueprintCatalog::new()).with_config(fast_retry(3));

        let out = executor
            .execute_activity("flaky", Value::Null, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, json!(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let (registry, calls) = flaky_registry(10, ActivityError::Failed("down".into()));
        let executor =
            InProcessExecutor::new(registry, BlueprintCatalog::new()).with_config(fast_retry(3));

        let err = executor
            .execute_activity("flaky", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, ActivityError::Failed("down".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let (registry, calls) = flaky_registry(10, ActivityError::Fatal("bad input".into()));
        let executor =
            InProcessExecutor::new(registry, BlueprintCatalog::new()).with_config(fast_retry(5));

        let err = executor
            .execute_activity("flaky", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ActivityError::Fatal(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn each_attempt_is_bounded_by_timeout() {
        let executor = InProcessExecutor::new(base_registry(), BlueprintCatalog::new())
            .with_config(fast_retry(1));
        let err = executor
            .execute_activity("sleepy", Value::Null, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActivityError::Timeout {
                timeout: Duration::from_millis(20)
            }
        );
    }

    #[tokio::test]
    async fn unknown_operation_is_reported() {
        let executor = InProcessExecutor::new(base_registry(), BlueprintCatalog::new());
        let err = executor
            .execute_activity("nope", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, ActivityError::UnknownOperation("nope".into()));
    }

    // -----------------------------------------------------------------------
    // Child workflows
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn runs_child_blueprint_from_catalog() {
        let child = WorkflowBlueprint::new(
            "doubler",
            vec![WorkflowStep::activity("doubled", "double", Map::new())],
        );
        let executor =
            InProcessExecutor::new(base_registry(), BlueprintCatalog::new().with(child));
        let parent = WorkflowBlueprint::new(
            "parent",
            vec![WorkflowStep::child_workflow(
                "nested",
                "doubler",
                json!({"n": 21}).as_object().cloned().unwrap(),
            )],
        );

        let result = executor.interpreter().execute(&parent, Map::new()).await;
        assert!(result.is_completed(), "error: {:?}", result.error);
        assert_eq!(result.get("nested"), Some(&json!({"doubled": 42})));
    }

    #[tokio::test]
    async fn child_step_ids_are_independent_of_parent() {
        let loader = WorkflowBlueprint::new(
            "loader",
            vec![WorkflowStep::activity("load", "load", Map::new())],
        );
        let executor =
            InProcessExecutor::new(base_registry(), BlueprintCatalog::new().with(loader));
        let parent = WorkflowBlueprint::new(
            "parent",
            vec![
                WorkflowStep::activity("load", "load", Map::new()),
                WorkflowStep::child_workflow("nested", "loader", Map::new()),
            ],
        );

        let result = executor.interpreter().execute(&parent, Map::new()).await;
        assert!(result.is_completed(), "error: {:?}", result.error);
        assert_eq!(result.get("load"), Some(&json!("loaded")));
        assert_eq!(result.get("nested"), Some(&json!({"load": "loaded"})));
    }

    #[tokio::test]
    async fn activity_timeout_fails_enclosing_parallel() {
        let executor = InProcessExecutor::new(base_registry(), BlueprintCatalog::new())
            .with_config(fast_retry(1));
        let blueprint = WorkflowBlueprint::new(
            "fan",
            vec![WorkflowStep::parallel(
                "fan",
                vec![
                    WorkflowStep::activity("quick", "load", Map::new()),
                    WorkflowStep::activity("stalled", "sleepy", Map::new()).with_timeout_secs(0),
                ],
            )],
        );

        let result = executor.interpreter().execute(&blueprint, Map::new()).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.step_id, "stalled");
        assert!(failure.error.contains("timed out"), "got: {}", failure.error);
        assert!(result.get("quick").is_none());
        assert!(result.get("fan").is_none());
    }

    #[tokio::test]
    async fn child_failure_is_wrapped() {
        let child = WorkflowBlueprint::new(
            "broken",
            vec![WorkflowStep::activity("boom", "fail", Map::new())],
        );
        let executor = InProcessExecutor::new(base_registry(), BlueprintCatalog::new().with(child));

        let err = executor
            .execute_child_workflow("broken", json!({}), "c-1")
            .await
            .unwrap_err();
        match err {
            ActivityError::ChildWorkflowFailed {
                workflow_name,
                error,
            } => {
                assert_eq!(workflow_name, "broken");
                assert!(error.contains("broken"));
            }
            other => panic!("expected ChildWorkflowFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_child_workflow() {
        let executor = InProcessExecutor::new(base_registry(), BlueprintCatalog::new());
        let err = executor
            .execute_child_workflow("ghost", Value::Null, "c-1")
            .await
            .unwrap_err();
        assert_eq!(err, ActivityError::UnknownWorkflow("ghost".into()));
    }

    #[tokio::test]
    async fn recursion_stops_at_max_depth() {
        let recursive = WorkflowBlueprint::new(
            "recursive",
            vec![WorkflowStep::child_workflow("again", "recursive", Map::new())],
        );
        let config = EngineConfig {
            max_child_depth: 2,
            ..EngineConfig::default()
        };
        let catalog = BlueprintCatalog::new().with(recursive.clone());
        let executor = InProcessExecutor::new(base_registry(), catalog).with_config(config);

        let result = executor.interpreter().execute(&recursive, Map::new()).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        let error = result.error.unwrap();
        assert!(error.contains("depth 3 exceeds maximum 2"), "got: {error}");
    }

    #[tokio::test]
    async fn repeated_instances_run_again() {
        let (registry, calls) = flaky_registry(0, ActivityError::Failed("unused".into()));
        let child = WorkflowBlueprint::new(
            "counter",
            vec![WorkflowStep::activity("count", "flaky", Map::new())],
        );
        let executor = InProcessExecutor::new(registry, BlueprintCatalog::new().with(child));
        let parent = WorkflowBlueprint::new(
            "parent",
            vec![WorkflowStep::child_workflow("nested", "counter", Map::new())],
        );

        for _ in 0..3 {
            let result = executor.interpreter().execute(&parent, Map::new()).await;
            assert!(result.is_completed());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn resolver_runs_through_executor() {
        let executor = InProcessExecutor::new(base_registry(), BlueprintCatalog::new());
        let steps = vec![
            PipelineStep::new("seed", "double")
                .with_params(json!({"n": 2}).as_object().cloned().unwrap()),
            PipelineStep::new("again", "double")
                .depends_on(["seed"])
                .with_params(json!({"n": 5}).as_object().cloned().unwrap()),
        ];

        let result = executor.resolver().execute(&steps, None).await;
        assert!(result.is_completed());
        assert_eq!(result.get("seed"), Some(&json!(4)));
        assert_eq!(result.get("again"), Some(&json!(10)));
        assert_eq!(result.rounds, 2);
    }
}
