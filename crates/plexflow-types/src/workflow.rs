//! Workflow domain types for plexflow.
//!
//! Two shapes of workflow are described here:
//! - the blueprint tree (`WorkflowBlueprint` / `WorkflowStep`), walked by the
//!   interpreter, and
//! - the flat dependency pipeline (`PipelineStep`), scheduled by the resolver.
//!
//! Both engines report through the same `ExecutionResult` / `ExecutionLog`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Blueprint (tree form)
// ---------------------------------------------------------------------------

/// Declarative tree of steps describing one workflow.
///
/// Top-level steps run sequentially in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBlueprint", into = "RawBlueprint")]
pub struct WorkflowBlueprint {
    /// Workflow name (also the key used by nested-workflow catalogs).
    pub name: String,
    /// Optional longer description.
    pub description: Option<String>,
    /// Ordered top-level steps.
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowBlueprint {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps,
        }
    }

    /// Every step id in the tree, depth-first in declaration order.
    pub fn step_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        for step in &self.steps {
            step.collect_ids(&mut ids);
        }
        ids
    }
}

/// A single node of the blueprint tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct WorkflowStep {
    /// Unique within one blueprint; key of this step's result in the context.
    pub id: String,
    /// Per-call timeout for activity and child-workflow steps.
    pub timeout_secs: Option<u64>,
    /// Kind-specific payload.
    pub body: StepBody,
}

impl WorkflowStep {
    /// Leaf step invoking `operation` with `params`.
    pub fn activity(
        id: impl Into<String>,
        operation: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self::with_body(
            id,
            StepBody::Activity {
                operation: operation.into(),
                params,
            },
        )
    }

    pub fn parallel(id: impl Into<String>, children: Vec<WorkflowStep>) -> Self {
        Self::with_body(id, StepBody::Parallel { children })
    }

    pub fn conditional(
        id: impl Into<String>,
        field: impl Into<String>,
        value: Value,
        true_steps: Vec<WorkflowStep>,
        false_steps: Vec<WorkflowStep>,
    ) -> Self {
        Self::with_body(
            id,
            StepBody::Conditional {
                field: field.into(),
                value,
                true_steps,
                false_steps,
            },
        )
    }

    pub fn repeat(id: impl Into<String>, count: u32, body: Vec<WorkflowStep>) -> Self {
        Self::with_body(id, StepBody::Loop { count, body })
    }

    pub fn child_workflow(
        id: impl Into<String>,
        workflow_name: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        Self::with_body(
            id,
            StepBody::ChildWorkflow {
                workflow_name: workflow_name.into(),
                params,
            },
        )
    }

    pub fn with_body(id: impl Into<String>, body: StepBody) -> Self {
        Self {
            id: id.into(),
            timeout_secs: None,
            body,
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// The payload-free kind of this step.
    pub fn kind(&self) -> StepKind {
        self.body.kind()
    }

    /// Direct children of this step across all of its child lists.
    pub fn children(&self) -> Vec<&WorkflowStep> {
        match &self.body {
            StepBody::Activity { .. } | StepBody::ChildWorkflow { .. } => Vec::new(),
            StepBody::Parallel { children } => children.iter().collect(),
            StepBody::Conditional {
                true_steps,
                false_steps,
                ..
            } => true_steps.iter().chain(false_steps.iter()).collect(),
            StepBody::Loop { body, .. } => body.iter().collect(),
        }
    }

    fn collect_ids<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.push(self.id.as_str());
        for child in self.children() {
            child.collect_ids(out);
        }
    }
}

/// Kind-specific payload of a step. Closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum StepBody {
    /// Invoke a registered operation through the durable executor.
    Activity {
        operation: String,
        params: Map<String, Value>,
    },
    /// Fan out over `children` concurrently and join.
    Parallel { children: Vec<WorkflowStep> },
    /// Run `true_steps` when `context[field] == value`, else `false_steps`.
    Conditional {
        field: String,
        value: Value,
        true_steps: Vec<WorkflowStep>,
        false_steps: Vec<WorkflowStep>,
    },
    /// Run `body` sequentially `count` times.
    Loop { count: u32, body: Vec<WorkflowStep> },
    /// Invoke another workflow by name.
    ChildWorkflow {
        workflow_name: String,
        params: Map<String, Value>,
    },
}

impl StepBody {
    pub fn kind(&self) -> StepKind {
        match self {
            StepBody::Activity { .. } => StepKind::Activity,
            StepBody::Parallel { .. } => StepKind::Parallel,
            StepBody::Conditional { .. } => StepKind::Conditional,
            StepBody::Loop { .. } => StepKind::Loop,
            StepBody::ChildWorkflow { .. } => StepKind::ChildWorkflow,
        }
    }
}

/// The kind of a step, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Activity,
    Parallel,
    Conditional,
    Loop,
    ChildWorkflow,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Activity => "activity",
            StepKind::Parallel => "parallel",
            StepKind::Conditional => "conditional",
            StepKind::Loop => "loop",
            StepKind::ChildWorkflow => "child_workflow",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepKind {
    type Err = String;

    /// Accepts `child_workflow`, `child-workflow` and `ChildWorkflow` alike.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "activity" => Ok(StepKind::Activity),
            "parallel" => Ok(StepKind::Parallel),
            "conditional" => Ok(StepKind::Conditional),
            "loop" => Ok(StepKind::Loop),
            "childworkflow" => Ok(StepKind::ChildWorkflow),
            _ => Err(s.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// Errors converting the flat wire form into the typed tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepDecodeError {
    #[error("step '{step_id}' has unknown kind '{kind}'")]
    UnknownStepKind { step_id: String, kind: String },

    #[error("step '{step_id}' is missing required field '{field}'")]
    MissingField { step_id: String, field: &'static str },
}

/// Flat serialized shape of a blueprint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawBlueprint {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub steps: Vec<RawStep>,
}

/// Flat serialized shape of one step.
///
/// `kind` stays a string here so an unrecognized value can be reported with
/// the offending step id instead of a generic deserializer message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStep {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Operation name for activities; defaults to `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<RawStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_steps: Option<Vec<RawStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_steps: Option<Vec<RawStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_steps: Option<Vec<RawStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_workflow_name: Option<String>,
}

fn decode_steps(raw: Option<Vec<RawStep>>) -> Result<Vec<WorkflowStep>, StepDecodeError> {
    raw.unwrap_or_default()
        .into_iter()
        .map(WorkflowStep::try_from)
        .collect()
}

fn encode_steps(steps: Vec<WorkflowStep>) -> Option<Vec<RawStep>> {
    if steps.is_empty() {
        None
    } else {
        Some(steps.into_iter().map(RawStep::from).collect())
    }
}

impl TryFrom<RawStep> for WorkflowStep {
    type Error = StepDecodeError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let kind = raw
            .kind
            .parse::<StepKind>()
            .map_err(|kind| StepDecodeError::UnknownStepKind {
                step_id: raw.id.clone(),
                kind,
            })?;
        let missing = |field: &'static str| StepDecodeError::MissingField {
            step_id: raw.id.clone(),
            field,
        };

        let body = match kind {
            StepKind::Activity => StepBody::Activity {
                operation: raw.operation.clone().unwrap_or_else(|| raw.id.clone()),
                params: raw.params,
            },
            StepKind::Parallel => StepBody::Parallel {
                children: decode_steps(raw.children)?,
            },
            StepKind::Conditional => StepBody::Conditional {
                field: raw
                    .condition_field
                    .clone()
                    .ok_or_else(|| missing("condition_field"))?,
                value: raw.condition_value.unwrap_or(Value::Null),
                true_steps: decode_steps(raw.true_steps)?,
                false_steps: decode_steps(raw.false_steps)?,
            },
            StepKind::Loop => StepBody::Loop {
                count: raw.loop_count.ok_or_else(|| missing("loop_count"))?,
                body: decode_steps(raw.loop_steps)?,
            },
            StepKind::ChildWorkflow => StepBody::ChildWorkflow {
                workflow_name: raw
                    .child_workflow_name
                    .clone()
                    .ok_or_else(|| missing("child_workflow_name"))?,
                params: raw.params,
            },
        };

        Ok(WorkflowStep {
            id: raw.id,
            timeout_secs: raw.timeout_secs,
            body,
        })
    }
}

impl From<WorkflowStep> for RawStep {
    fn from(step: WorkflowStep) -> Self {
        let mut raw = RawStep {
            kind: step.kind().as_str().to_string(),
            timeout_secs: step.timeout_secs,
            ..RawStep::default()
        };
        match step.body {
            StepBody::Activity { operation, params } => {
                if operation != step.id {
                    raw.operation = Some(operation);
                }
                raw.params = params;
            }
            StepBody::Parallel { children } => {
                raw.children = Some(children.into_iter().map(RawStep::from).collect());
            }
            StepBody::Conditional {
                field,
                value,
                true_steps,
                false_steps,
            } => {
                raw.condition_field = Some(field);
                raw.condition_value = Some(value);
                raw.true_steps = encode_steps(true_steps);
                raw.false_steps = encode_steps(false_steps);
            }
            StepBody::Loop { count, body } => {
                raw.loop_count = Some(count);
                raw.loop_steps = Some(body.into_iter().map(RawStep::from).collect());
            }
            StepBody::ChildWorkflow {
                workflow_name,
                params,
            } => {
                raw.child_workflow_name = Some(workflow_name);
                raw.params = params;
            }
        }
        raw.id = step.id;
        raw
    }
}

impl TryFrom<RawBlueprint> for WorkflowBlueprint {
    type Error = StepDecodeError;

    fn try_from(raw: RawBlueprint) -> Result<Self, Self::Error> {
        Ok(WorkflowBlueprint {
            name: raw.name,
            description: raw.description,
            steps: decode_steps(Some(raw.steps))?,
        })
    }
}

impl From<WorkflowBlueprint> for RawBlueprint {
    fn from(blueprint: WorkflowBlueprint) -> Self {
        RawBlueprint {
            name: blueprint.name,
            description: blueprint.description,
            steps: blueprint.steps.into_iter().map(RawStep::from).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline (flat dependency form)
// ---------------------------------------------------------------------------

/// A step of a dependency-driven pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub id: String,
    /// Operation name passed to the durable executor.
    pub action: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    /// Ids that must complete before this step is ready.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl PipelineStep {
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            params: Map::new(),
            depends_on: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ---------------------------------------------------------------------------
// Execution log
// ---------------------------------------------------------------------------

/// Which side of a conditional ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    True,
    False,
    /// The taken side had no steps.
    None,
}

impl Branch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::True => "true",
            Branch::False => "false",
            Branch::None => "none",
        }
    }
}

/// One started step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub step_id: String,
    pub kind: StepKind,
    /// Conditional steps: the branch that was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    /// Loop body entries: zero-based iteration index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// Resolver entries: one-based round number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    /// Entries of nested steps, in start order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<LogEntry>,
}

impl LogEntry {
    pub fn new(step_id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            step_id: step_id.into(),
            kind,
            branch: None,
            iteration: None,
            round: None,
            children: Vec::new(),
        }
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<&'a LogEntry>) {
        out.push(self);
        for child in &self.children {
            child.flatten_into(out);
        }
    }
}

/// Ordered trace of started steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionLog {
    pub entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-level step ids in start order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.step_id.as_str()).collect()
    }

    /// Depth-first view of every entry, nested ones included.
    pub fn flatten(&self) -> Vec<&LogEntry> {
        let mut out = Vec::new();
        for entry in &self.entries {
            entry.flatten_into(&mut out);
        }
        out
    }

    /// First entry (at any depth) for `step_id`.
    pub fn find(&self, step_id: &str) -> Option<&LogEntry> {
        self.flatten().into_iter().find(|e| e.step_id == step_id)
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// Final status of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    /// Resolver only: some steps ran, others never became ready.
    PartiallyCompleted,
}

/// The step that made a run fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_id: String,
    pub kind: StepKind,
    pub error: String,
}

/// Outcome of a blueprint or pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Final context: step id -> result.
    pub context: BTreeMap<String, Value>,
    pub log: ExecutionLog,
    /// Failing step, when one step is to blame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,
    /// Human-readable error for any non-completed run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Resolver: ids that never ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    /// Resolver: number of rounds that executed at least one step.
    #[serde(default)]
    pub rounds: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn is_completed(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Result recorded for `step_id`.
    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.context.get(step_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
