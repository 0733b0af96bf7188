//! Blueprint interpreter: walks a `WorkflowStep` tree and executes it.
//!
//! Each step is dispatched on its kind. Leaf work (activities and child
//! workflows) goes through the durable executor; composite kinds only decide
//! ordering and how results land in the `ExecutionContext`.
//!
//! # Execution rules
//!
//! - Top-level steps, branch steps and loop bodies run strictly in order.
//! - `Parallel` children run concurrently on copies of the context taken at
//!   fan-out time, inside a `tokio::task::JoinSet`. Results are reassembled by
//!   declaration index; branch writes are merged only if every child succeeds.
//! - `Loop` iterations run on a scoped copy of the context that is discarded
//!   after each iteration.
//! - The first failing step aborts its enclosing constructs; nothing is
//!   retried here.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use plexflow_types::config::EngineConfig;
use plexflow_types::workflow::{
    Branch, ExecutionLog, ExecutionResult, ExecutionStatus, LogEntry, StepBody, StepKind,
    WorkflowBlueprint, WorkflowStep,
};
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use super::context::ExecutionContext;
use super::definition::{parse_blueprint_value, validate_blueprint, BlueprintError};
use super::durable::{ActivityError, BoxDurableExecutor, DurableExecutor};
use super::error::ExecutionError;
use super::registry::StepRegistry;

/// Log entry of one started step plus its outcome.
struct StepRun {
    entry: LogEntry,
    result: Result<Value, ExecutionError>,
}

// ---------------------------------------------------------------------------
// BlueprintInterpreter
// ---------------------------------------------------------------------------

/// Executes `WorkflowBlueprint`s against a registry and a durable executor.
///
/// Holds no per-run state: clones share the registry and executor, and any
/// number of runs may proceed concurrently.
#[derive(Debug, Clone)]
pub struct BlueprintInterpreter {
    registry: Arc<StepRegistry>,
    executor: BoxDurableExecutor,
    config: EngineConfig,
}

impl BlueprintInterpreter {
    pub fn new<E: DurableExecutor + 'static>(registry: Arc<StepRegistry>, executor: E) -> Self {
        Self::from_boxed(registry, BoxDurableExecutor::new(executor))
    }

    /// Build from an executor that is already type-erased.
    pub fn from_boxed(registry: Arc<StepRegistry>, executor: BoxDurableExecutor) -> Self {
        Self {
            registry,
            executor,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check a blueprint against the registry and the initial context keys.
    pub fn validate(
        &self,
        blueprint: &WorkflowBlueprint,
        initial: &Map<String, Value>,
    ) -> Result<(), BlueprintError> {
        validate_blueprint(blueprint, &self.registry, initial.keys().map(String::as_str))
    }

    /// Run `blueprint` to completion or first failure.
    ///
    /// Validation failures produce a `Failed` result with an empty log.
    pub async fn execute(
        &self,
        blueprint: &WorkflowBlueprint,
        initial: Map<String, Value>,
    ) -> ExecutionResult {
        let span = tracing::info_span!("blueprint_run", workflow = blueprint.name.as_str());
        self.execute_inner(blueprint, initial).instrument(span).await
    }

    /// Parse an untyped JSON blueprint and run it.
    ///
    /// Parse failures (unknown step kinds included) become a `Failed` result.
    pub async fn execute_value(
        &self,
        blueprint: Value,
        initial: Map<String, Value>,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        match parse_blueprint_value(blueprint) {
            Ok(blueprint) => self.execute(&blueprint, initial).await,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting unparseable blueprint");
                // The offending step never decoded, so there is no kind to report
                failed_result(
                    ExecutionContext::from_initial(initial),
                    ExecutionLog::new(),
                    ExecutionError::from(err),
                    |_| None,
                    started_at,
                )
            }
        }
    }

    async fn execute_inner(
        &self,
        blueprint: &WorkflowBlueprint,
        initial: Map<String, Value>,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        tracing::info!(steps = blueprint.steps.len(), "starting blueprint run");

        if let Err(err) = self.validate(blueprint, &initial) {
            tracing::warn!(error = %err, "blueprint failed validation");
            return failed_result(
                ExecutionContext::from_initial(initial),
                ExecutionLog::new(),
                ExecutionError::from(err),
                |id| find_kind(&blueprint.steps, id),
                started_at,
            );
        }

        let mut ctx = ExecutionContext::from_initial(initial);
        let mut entries = Vec::with_capacity(blueprint.steps.len());
        let outcome = self
            .run_sequence(&blueprint.steps, &mut ctx, &mut entries, None)
            .await;
        let log = ExecutionLog { entries };

        match outcome {
            Ok(_) => {
                tracing::info!(steps = log.len(), "blueprint run completed");
                ExecutionResult {
                    status: ExecutionStatus::Completed,
                    context: ctx.into_inner(),
                    log,
                    failure: None,
                    error: None,
                    unresolved: Vec::new(),
                    rounds: 0,
                    started_at,
                    finished_at: Utc::now(),
                }
            }
            Err(err) => {
                tracing::info!(error = %err, "blueprint run failed");
                failed_result(ctx, log, err, |id| find_kind(&blueprint.steps, id), started_at)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Execute one step and record its result at `ctx[step.id]`.
    fn execute_step<'a>(
        &'a self,
        step: &'a WorkflowStep,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, StepRun> {
        Box::pin(async move {
            let mut entry = LogEntry::new(step.id.as_str(), step.kind());
            tracing::debug!(step_id = step.id.as_str(), kind = %step.kind(), "step started");

            let result = match &step.body {
                StepBody::Activity { operation, params } => {
                    self.run_activity(step, operation, params, ctx).await
                }
                StepBody::Parallel { children } => {
                    self.run_parallel(step, children, ctx, &mut entry).await
                }
                StepBody::Conditional {
                    field,
                    value,
                    true_steps,
                    false_steps,
                } => {
                    self.run_conditional(field, value, true_steps, false_steps, ctx, &mut entry)
                        .await
                }
                StepBody::Loop { count, body } => {
                    self.run_loop(*count, body, ctx, &mut entry).await
                }
                StepBody::ChildWorkflow {
                    workflow_name,
                    params,
                } => self.run_child_workflow(step, workflow_name, params).await,
            };

            let result = result.and_then(|value| {
                ctx.insert(step.id.as_str(), value.clone())?;
                Ok(value)
            });

            match &result {
                Ok(_) => tracing::debug!(step_id = step.id.as_str(), "step completed"),
                Err(err) => {
                    tracing::debug!(step_id = step.id.as_str(), error = %err, "step failed")
                }
            }

            StepRun { entry, result }
        })
    }

    /// Run `steps` in order, appending their log entries to `entries`.
    async fn run_sequence(
        &self,
        steps: &[WorkflowStep],
        ctx: &mut ExecutionContext,
        entries: &mut Vec<LogEntry>,
        iteration: Option<u32>,
    ) -> Result<Vec<Value>, ExecutionError> {
        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            let StepRun { mut entry, result } = self.execute_step(step, ctx).await;
            entry.iteration = iteration;
            entries.push(entry);
            results.push(result?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Step kinds
    // -----------------------------------------------------------------------

    async fn run_activity(
        &self,
        step: &WorkflowStep,
        operation: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        if !self.registry.contains(operation) {
            return Err(ExecutionError::UnknownOperation {
                step_id: step.id.clone(),
                operation: operation.to_string(),
            });
        }

        let input = ctx.input_with(params);
        self.executor
            .execute_activity(operation, input, self.step_timeout(step))
            .await
            .map_err(|source| ExecutionError::ActivityExecution {
                step_id: step.id.clone(),
                kind: StepKind::Activity,
                source,
            })
    }

    async fn run_parallel(
        &self,
        step: &WorkflowStep,
        children: &[WorkflowStep],
        ctx: &mut ExecutionContext,
        entry: &mut LogEntry,
    ) -> Result<Value, ExecutionError> {
        let mut join_set = JoinSet::new();
        for (index, child) in children.iter().enumerate() {
            let interpreter = self.clone();
            let child = child.clone();
            let mut branch_ctx = ctx.clone();
            join_set.spawn(async move {
                let run = interpreter.execute_step(&child, &mut branch_ctx).await;
                (index, run, branch_ctx)
            });
        }

        let mut entries: Vec<Option<LogEntry>> = vec![None; children.len()];
        let mut values: Vec<Option<Value>> = vec![None; children.len()];
        let mut branches: Vec<Option<ExecutionContext>> = vec![None; children.len()];
        let mut failure = None;

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, run, branch_ctx)) => {
                    entries[index] = Some(run.entry);
                    match run.result {
                        Ok(value) => {
                            values[index] = Some(value);
                            branches[index] = Some(branch_ctx);
                        }
                        Err(err) => {
                            failure = Some(err);
                            break;
                        }
                    }
                }
                Err(join_err) => {
                    failure = Some(ExecutionError::Join {
                        step_id: step.id.clone(),
                        message: join_err.to_string(),
                    });
                    break;
                }
            }
        }

        // Every child was started; unfinished ones keep a bare entry
        entry.children = entries
            .into_iter()
            .zip(children)
            .map(|(slot, child)| {
                slot.unwrap_or_else(|| LogEntry::new(child.id.as_str(), child.kind()))
            })
            .collect();

        if let Some(err) = failure {
            let in_flight = join_set.len();
            join_set.detach_all();
            tracing::debug!(
                step_id = step.id.as_str(),
                in_flight,
                "parallel step failed, detaching remaining branches"
            );
            return Err(err);
        }

        for branch in branches.into_iter().flatten() {
            ctx.absorb(branch);
        }
        Ok(Value::Array(values.into_iter().flatten().collect()))
    }

    async fn run_conditional(
        &self,
        field: &str,
        expected: &Value,
        true_steps: &[WorkflowStep],
        false_steps: &[WorkflowStep],
        ctx: &mut ExecutionContext,
        entry: &mut LogEntry,
    ) -> Result<Value, ExecutionError> {
        let actual = ctx.get(field).cloned().unwrap_or(Value::Null);
        let (branch, steps) = if actual == *expected {
            (Branch::True, true_steps)
        } else {
            (Branch::False, false_steps)
        };
        let branch = if steps.is_empty() { Branch::None } else { branch };
        entry.branch = Some(branch);
        tracing::debug!(
            step_id = entry.step_id.as_str(),
            field,
            branch = branch.as_str(),
            "conditional evaluated"
        );

        let results = self.run_sequence(steps, ctx, &mut entry.children, None).await?;
        Ok(json!({ "branch": branch.as_str(), "results": results }))
    }

    async fn run_loop(
        &self,
        count: u32,
        body: &[WorkflowStep],
        ctx: &mut ExecutionContext,
        entry: &mut LogEntry,
    ) -> Result<Value, ExecutionError> {
        // `count` comes from the blueprint, so the list grows as iterations finish
        let mut results = Vec::new();
        for iteration in 0..count {
            let mut scope = ctx.clone();
            let values = self
                .run_sequence(body, &mut scope, &mut entry.children, Some(iteration))
                .await?;
            results.extend(values);
        }
        Ok(Value::Array(results))
    }

    async fn run_child_workflow(
        &self,
        step: &WorkflowStep,
        workflow_name: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, ExecutionError> {
        let instance_id = format!("{}-{}", step.id, Uuid::now_v7().simple());
        // Only the declared params cross into the child; its step ids are its own
        let input = Value::Object(params.clone());
        let timeout = self.step_timeout(step);
        tracing::debug!(
            step_id = step.id.as_str(),
            workflow = workflow_name,
            instance_id = instance_id.as_str(),
            "starting child workflow"
        );

        let call = self
            .executor
            .execute_child_workflow(workflow_name, input, &instance_id);
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ActivityError::Timeout { timeout }),
        };
        result.map_err(|source| ExecutionError::ActivityExecution {
            step_id: step.id.clone(),
            kind: StepKind::ChildWorkflow,
            source,
        })
    }

    fn step_timeout(&self, step: &WorkflowStep) -> Duration {
        Duration::from_secs(
            step.timeout_secs
                .unwrap_or(self.config.default_step_timeout_secs),
        )
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Kind of the step with `id`, anywhere in the tree.
fn find_kind(steps: &[WorkflowStep], id: &str) -> Option<StepKind> {
    steps.iter().find_map(|step| step_kind_of(step, id))
}

fn step_kind_of(step: &WorkflowStep, id: &str) -> Option<StepKind> {
    if step.id == id {
        return Some(step.kind());
    }
    step.children()
        .into_iter()
        .find_map(|child| step_kind_of(child, id))
}

fn failed_result(
    ctx: ExecutionContext,
    log: ExecutionLog,
    err: ExecutionError,
    kind_of: impl Fn(&str) -> Option<StepKind>,
    started_at: chrono::DateTime<Utc>,
) -> ExecutionResult {
    let failure = err
        .step_id()
        .and_then(|id| kind_of(id))
        .and_then(|kind| err.to_failure(kind));
    ExecutionResult {
        status: ExecutionStatus::Failed,
        context: ctx.into_inner(),
        log,
        failure,
        error: Some(err.to_string()),
        unresolved: Vec::new(),
        rounds: 0,
        started_at,
        finished_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
