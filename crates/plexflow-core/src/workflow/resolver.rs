//! Dependency resolver: round-by-round execution of a flat pipeline.
//!
//! Each round scans the remaining steps in declaration order and runs every
//! step whose `depends_on` ids have all completed. A step's input is the map
//! of its dependencies' results (keyed by dependency id) overlaid with its own
//! params. Rounds stop when every step completed, a step failed, no step can
//! become ready, or the round cap was reached.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use plexflow_types::config::EngineConfig;
use plexflow_types::workflow::{
    ExecutionLog, ExecutionResult, ExecutionStatus, LogEntry, PipelineStep, StepKind,
};
use serde_json::{Map, Value};
use tracing::Instrument;

use super::context::{overlay, ExecutionContext};
use super::dag::diagnose;
use super::definition::validate_pipeline_ids;
use super::durable::{BoxDurableExecutor, DurableExecutor};
use super::error::ExecutionError;

// ---------------------------------------------------------------------------
// DependencyResolver
// ---------------------------------------------------------------------------

/// Executes pipelines of `PipelineStep`s through a durable executor.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    executor: BoxDurableExecutor,
    config: EngineConfig,
}

impl DependencyResolver {
    pub fn new<E: DurableExecutor + 'static>(executor: E) -> Self {
        Self::from_boxed(BoxDurableExecutor::new(executor))
    }

    pub fn from_boxed(executor: BoxDurableExecutor) -> Self {
        Self {
            executor,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `steps` until all completed or no further progress is possible.
    ///
    /// `max_rounds` defaults to `resolver.max_rounds_factor * steps.len()`.
    pub async fn execute(
        &self,
        steps: &[PipelineStep],
        max_rounds: Option<usize>,
    ) -> ExecutionResult {
        let span = tracing::info_span!("pipeline_run", steps = steps.len());
        self.execute_inner(steps, max_rounds).instrument(span).await
    }

    async fn execute_inner(
        &self,
        steps: &[PipelineStep],
        max_rounds: Option<usize>,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let max_rounds =
            max_rounds.unwrap_or_else(|| self.config.resolver.max_rounds_for(steps.len()));
        tracing::info!(max_rounds, "starting pipeline run");

        if let Err(err) = validate_pipeline_ids(steps) {
            tracing::warn!(error = %err, "pipeline failed validation");
            let err = ExecutionError::from(err);
            return ExecutionResult {
                status: ExecutionStatus::Failed,
                context: Default::default(),
                log: ExecutionLog::new(),
                failure: err.to_failure(StepKind::Activity),
                error: Some(err.to_string()),
                unresolved: steps.iter().map(|s| s.id.clone()).collect(),
                rounds: 0,
                started_at,
                finished_at: Utc::now(),
            };
        }

        let known: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();
        let mut completed: HashSet<&str> = HashSet::with_capacity(steps.len());
        let mut results = ExecutionContext::new();
        let mut remaining: Vec<&PipelineStep> = steps.iter().collect();
        let mut log = ExecutionLog::new();
        let mut rounds: u32 = 0;
        let mut error: Option<ExecutionError> = None;

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&PipelineStep>, Vec<&PipelineStep>) = remaining
                .iter()
                .copied()
                .partition(|step| {
                    step.depends_on
                        .iter()
                        .all(|dep| completed.contains(dep.as_str()))
                });

            if ready.is_empty() || rounds as usize >= max_rounds {
                let diagnosis = diagnose(&remaining, &known);
                tracing::warn!(
                    rounds,
                    unresolved = remaining.len(),
                    cycles = diagnosis.cycles.len(),
                    "pipeline cannot make progress"
                );
                error = Some(ExecutionError::UnresolvedDependency {
                    unresolved: remaining.iter().map(|s| s.id.clone()).collect(),
                    missing: diagnosis.missing,
                    cycles: diagnosis.cycles,
                });
                break;
            }

            rounds += 1;
            tracing::debug!(round = rounds, ready = ready.len(), "starting round");
            let outcomes = self.run_round(&ready, &results).await;

            // Commit in declaration order regardless of finish order
            for (step, outcome) in ready.into_iter().zip(outcomes) {
                let mut entry = LogEntry::new(step.id.as_str(), StepKind::Activity);
                entry.round = Some(rounds);
                log.push(entry);

                match outcome {
                    Ok(value) => {
                        if let Err(err) = results.insert(step.id.as_str(), value) {
                            error.get_or_insert(err.into());
                            continue;
                        }
                        completed.insert(step.id.as_str());
                    }
                    Err(err) => {
                        error.get_or_insert(err);
                    }
                }
            }

            remaining = blocked;
            if error.is_some() {
                break;
            }
        }

        let unresolved: Vec<String> = remaining.iter().map(|s| s.id.clone()).collect();
        let status = match &error {
            None => ExecutionStatus::Completed,
            Some(ExecutionError::UnresolvedDependency { .. }) if !completed.is_empty() => {
                ExecutionStatus::PartiallyCompleted
            }
            Some(_) => ExecutionStatus::Failed,
        };
        tracing::info!(rounds, status = ?status, "pipeline run finished");

        ExecutionResult {
            status,
            context: results.into_inner(),
            log,
            failure: error
                .as_ref()
                .and_then(|err| err.to_failure(StepKind::Activity)),
            error: error.map(|err| err.to_string()),
            unresolved,
            rounds,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Run the ready steps of one round; outcomes line up with `ready`.
    async fn run_round(
        &self,
        ready: &[&PipelineStep],
        results: &ExecutionContext,
    ) -> Vec<Result<Value, ExecutionError>> {
        if self.config.resolver.concurrent_rounds {
            join_all(ready.iter().map(|step| self.run_step(step, results))).await
        } else {
            let mut outcomes = Vec::with_capacity(ready.len());
            for step in ready {
                outcomes.push(self.run_step(step, results).await);
            }
            outcomes
        }
    }

    async fn run_step(
        &self,
        step: &PipelineStep,
        results: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        tracing::debug!(
            step_id = step.id.as_str(),
            action = step.action.as_str(),
            "running step"
        );
        let input = dependency_input(step, results);
        let timeout = Duration::from_secs(
            step.timeout_secs
                .unwrap_or(self.config.default_step_timeout_secs),
        );
        self.executor
            .execute_activity(&step.action, input, timeout)
            .await
            .map_err(|source| ExecutionError::ActivityExecution {
                step_id: step.id.clone(),
                kind: StepKind::Activity,
                source,
            })
    }
}

/// Dependency results keyed by dependency id, overlaid with the step's params.
fn dependency_input(step: &PipelineStep, results: &ExecutionContext) -> Value {
    let mut base = Map::new();
    for dep in &step.depends_on {
        if let Some(value) = results.get(dep) {
            base.insert(dep.clone(), value.clone());
        }
    }
    overlay(base, &step.params)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::durable::ActivityError;
    use crate::workflow::test_support::{called, input_of, timeout_of, ScriptedExecutor};
    use serde_json::json;

    fn step(id: &str, deps: &[&str]) -> PipelineStep {
        PipelineStep::new(id, id).depends_on(deps.iter().copied())
    }

    fn diamond() -> Vec<PipelineStep> {
        vec![
            step("s1", &[]),
            step("s2", &["s1"]),
            step("s3", &["s1"]),
            step("s4", &["s2", "s3"]),
        ]
    }

    fn rounds_of(result: &ExecutionResult) -> Vec<(String, u32)> {
        result
            .log
            .entries
            .iter()
            .map(|e| (e.step_id.clone(), e.round.unwrap()))
            .collect()
    }

    #[tokio::test]
    async fn test_diamond_resolves_in_three_rounds() {
        let resolver = DependencyResolver::new(ScriptedExecutor::default());
        let result = resolver.execute(&diamond(), None).await;

        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.rounds, 3);
        assert_eq!(
            rounds_of(&result),
            vec![
                ("s1".to_string(), 1),
                ("s2".to_string(), 2),
                ("s3".to_string(), 2),
                ("s4".to_string(), 3),
            ]
        );
        assert!(result.unresolved.is_empty());
        assert_eq!(result.context.len(), 4);
    }

    #[tokio::test]
    async fn test_step_timeout_falls_back_to_configured_default() {
        let executor = ScriptedExecutor::default();
        let timeouts = executor.timeouts();
        let resolver = DependencyResolver::new(executor).with_config(EngineConfig {
            default_step_timeout_secs: 42,
            ..EngineConfig::default()
        });
        let steps = vec![
            step("s1", &[]),
            step("s2", &["s1"]).with_timeout_secs(5),
        ];

        let result = resolver.execute(&steps, None).await;
        assert!(result.is_completed());
        assert_eq!(timeout_of(&timeouts, "s1"), Duration::from_secs(42));
        assert_eq!(timeout_of(&timeouts, "s2"), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_input_is_union_of_dependency_results() {
        let executor = ScriptedExecutor::default()
            .output("s1", json!({"rows": 10}))
            .output("s2", json!("left"))
            .output("s3", json!("right"));
        let calls = executor.calls();
        let resolver = DependencyResolver::new(executor);

        let mut steps = diamond();
        steps[3] = PipelineStep::new("s4", "echo")
            .depends_on(["s2", "s3"])
            .with_params(
                json!({"mode": "merge", "s3": "overridden"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            );

        let result = resolver.execute(&steps, None).await;
        assert!(result.is_completed());
        assert_eq!(input_of(&calls, "s2"), json!({"s1": {"rows": 10}}));
        // Only direct dependencies, params win on clashes
        assert_eq!(
            result.get("s4"),
            Some(&json!({"s2": "left", "s3": "overridden", "mode": "merge"}))
        );
    }

    #[tokio::test]
    async fn test_commit_order_follows_declaration_not_latency() {
        let executor = ScriptedExecutor::default().delay("s2", 40).delay("s3", 0);
        let resolver = DependencyResolver::new(executor);
        let result = resolver.execute(&diamond(), None).await;
        assert_eq!(result.log.step_ids(), vec!["s1", "s2", "s3", "s4"]);
    }

    #[tokio::test]
    async fn test_ready_steps_run_concurrently() {
        let executor = ScriptedExecutor::default().delay("a", 100).delay("b", 100);
        let resolver = DependencyResolver::new(executor);
        let steps = vec![step("a", &[]), step("b", &[])];

        let started = std::time::Instant::now();
        let result = resolver.execute(&steps, None).await;
        assert!(result.is_completed());
        assert_eq!(result.rounds, 1);
        assert!(started.elapsed() < Duration::from_millis(190));
    }

    #[tokio::test]
    async fn test_sequential_rounds_when_configured() {
        let executor = ScriptedExecutor::default().delay("a", 30);
        let calls = executor.calls();
        let mut config = EngineConfig::default();
        config.resolver.concurrent_rounds = false;
        let resolver = DependencyResolver::new(executor).with_config(config);

        let steps = vec![step("a", &[]), step("b", &[])];
        let result = resolver.execute(&steps, None).await;
        assert!(result.is_completed());
        assert_eq!(called(&calls), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cycle_terminates_with_unresolved_steps() {
        let executor = ScriptedExecutor::default();
        let calls = executor.calls();
        let resolver = DependencyResolver::new(executor);
        let steps = vec![step("root", &[]), step("A", &["B", "root"]), step("B", &["A"])];

        let result = resolver.execute(&steps, None).await;
        assert_eq!(result.status, ExecutionStatus::PartiallyCompleted);
        assert_eq!(result.unresolved, vec!["A", "B"]);
        assert_eq!(called(&calls), vec!["root"]);
        assert_eq!(result.rounds, 1);
        let error = result.error.unwrap();
        assert!(error.contains("unresolved dependencies"));
        assert!(error.contains("cycles: [[\"A\", \"B\"]]"), "got: {error}");
        assert!(result.failure.is_none());
    }

    #[tokio::test]
    async fn test_pure_cycle_is_failed() {
        let resolver = DependencyResolver::new(ScriptedExecutor::default());
        let steps = vec![step("A", &["B"]), step("B", &["A"])];

        let result = resolver.execute(&steps, None).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.unresolved, vec!["A", "B"]);
        assert_eq!(result.rounds, 0);
        assert!(result.log.is_empty());
    }

    #[tokio::test]
    async fn test_missing_dependency_is_diagnosed() {
        let resolver = DependencyResolver::new(ScriptedExecutor::default());
        let steps = vec![step("load", &[]), step("report", &["load", "ghost"])];

        let result = resolver.execute(&steps, None).await;
        assert_eq!(result.status, ExecutionStatus::PartiallyCompleted);
        assert_eq!(result.unresolved, vec!["report"]);
        let error = result.error.unwrap();
        assert!(error.contains("(\"report\", \"ghost\")"), "got: {error}");
    }

    #[tokio::test]
    async fn test_round_cap_is_enforced() {
        let resolver = DependencyResolver::new(ScriptedExecutor::default());
        let steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];

        let result = resolver.execute(&steps, Some(2)).await;
        assert_eq!(result.status, ExecutionStatus::PartiallyCompleted);
        assert_eq!(result.rounds, 2);
        assert_eq!(result.unresolved, vec!["c"]);
        assert!(result.get("b").is_some());
    }

    #[tokio::test]
    async fn test_step_failure_aborts_run() {
        let executor =
            ScriptedExecutor::default().fail("s2", ActivityError::Fatal("disk full".to_string()));
        let calls = executor.calls();
        let resolver = DependencyResolver::new(executor);

        let result = resolver.execute(&diamond(), None).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.step_id, "s2");
        assert!(failure.error.contains("disk full"));
        // s3 ran in the same round and keeps its result
        assert!(result.get("s3").is_some());
        assert_eq!(result.unresolved, vec!["s4"]);
        assert!(!called(&calls).contains(&"s4".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected_before_execution() {
        let executor = ScriptedExecutor::default();
        let calls = executor.calls();
        let resolver = DependencyResolver::new(executor);

        let result = resolver
            .execute(&[step("a", &[]), step("a", &[])], None)
            .await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(called(&calls).is_empty());
        assert!(result.error.unwrap().contains("duplicate step id 'a'"));
    }

    #[tokio::test]
    async fn test_empty_pipeline_completes() {
        let resolver = DependencyResolver::new(ScriptedExecutor::default());
        let result = resolver.execute(&[], None).await;
        assert!(result.is_completed());
        assert_eq!(result.rounds, 0);
    }

    #[tokio::test]
    async fn test_rerun_is_byte_identical() {
        let mut rendered = Vec::new();
        for (slow, fast) in [("s2", "s3"), ("s3", "s2")] {
            let executor = ScriptedExecutor::default().delay(slow, 30).delay(fast, 0);
            let result = DependencyResolver::new(executor).execute(&diamond(), None).await;
            rendered.push((
                serde_json::to_string(&result.log).unwrap(),
                serde_json::to_string(&result.context).unwrap(),
            ));
        }
        assert_eq!(rendered[0], rendered[1]);
    }
}
