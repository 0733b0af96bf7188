//! Blueprint and pipeline parsing, validation, and filesystem operations.
//!
//! Converts JSON/YAML text into the typed `WorkflowBlueprint` tree and checks
//! the structural constraints that must hold before a run starts (unique step
//! ids, registered operations).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use plexflow_types::workflow::{
    PipelineStep, RawBlueprint, StepBody, StepDecodeError, WorkflowBlueprint, WorkflowStep,
};
use serde_json::Value;
use thiserror::Error;

use super::registry::StepRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a blueprint or pipeline.
#[derive(Debug, Error)]
pub enum BlueprintError {
    /// JSON/YAML syntax or shape failure.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("step '{step_id}' has unknown kind '{kind}'")]
    UnknownStepKind { step_id: String, kind: String },

    #[error("step '{step_id}' is missing required field '{field}'")]
    MissingField { step_id: String, field: &'static str },

    /// Two steps share an id, or a step id shadows an initial context key.
    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("step '{step_id}' uses unregistered operation '{operation}'")]
    UnknownOperation { step_id: String, operation: String },

    /// Any other structural violation.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StepDecodeError> for BlueprintError {
    fn from(err: StepDecodeError) -> Self {
        match err {
            StepDecodeError::UnknownStepKind { step_id, kind } => {
                BlueprintError::UnknownStepKind { step_id, kind }
            }
            StepDecodeError::MissingField { step_id, field } => {
                BlueprintError::MissingField { step_id, field }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON blueprint.
///
/// Goes through the flat wire form first so unknown kinds and missing fields
/// come back as structured errors naming the step.
pub fn parse_blueprint_json(text: &str) -> Result<WorkflowBlueprint, BlueprintError> {
    let raw: RawBlueprint =
        serde_json::from_str(text).map_err(|e| BlueprintError::Parse(e.to_string()))?;
    Ok(WorkflowBlueprint::try_from(raw)?)
}

/// Parse an already-decoded JSON value as a blueprint.
pub fn parse_blueprint_value(value: Value) -> Result<WorkflowBlueprint, BlueprintError> {
    let raw: RawBlueprint =
        serde_json::from_value(value).map_err(|e| BlueprintError::Parse(e.to_string()))?;
    Ok(WorkflowBlueprint::try_from(raw)?)
}

/// Parse a YAML blueprint.
pub fn parse_blueprint_yaml(yaml: &str) -> Result<WorkflowBlueprint, BlueprintError> {
    let raw: RawBlueprint =
        serde_yaml_ng::from_str(yaml).map_err(|e| BlueprintError::Parse(e.to_string()))?;
    Ok(WorkflowBlueprint::try_from(raw)?)
}

/// Serialize a blueprint to YAML in its flat wire form.
pub fn serialize_blueprint_yaml(blueprint: &WorkflowBlueprint) -> Result<String, BlueprintError> {
    serde_yaml_ng::to_string(blueprint).map_err(|e| BlueprintError::Parse(e.to_string()))
}

/// Parse a JSON array of pipeline steps.
pub fn parse_pipeline_json(text: &str) -> Result<Vec<PipelineStep>, BlueprintError> {
    serde_json::from_str(text).map_err(|e| BlueprintError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a blueprint before execution.
///
/// Checks:
/// - Name and every step id are non-empty
/// - Step ids are unique across the whole tree, loop bodies included
/// - No step id collides with a key of the initial context (`reserved`)
/// - Every activity operation is registered
pub fn validate_blueprint<'a>(
    blueprint: &WorkflowBlueprint,
    registry: &StepRegistry,
    reserved: impl IntoIterator<Item = &'a str>,
) -> Result<(), BlueprintError> {
    if blueprint.name.trim().is_empty() {
        return Err(BlueprintError::Validation(
            "blueprint name must not be empty".to_string(),
        ));
    }

    let reserved: HashSet<&str> = reserved.into_iter().collect();
    let mut seen = HashSet::new();
    for id in blueprint.step_ids() {
        if id.is_empty() {
            return Err(BlueprintError::Validation(
                "step id must not be empty".to_string(),
            ));
        }
        if reserved.contains(id) || !seen.insert(id) {
            return Err(BlueprintError::DuplicateStepId(id.to_string()));
        }
    }

    for step in &blueprint.steps {
        check_operations(step, registry)?;
    }

    Ok(())
}

fn check_operations(step: &WorkflowStep, registry: &StepRegistry) -> Result<(), BlueprintError> {
    if let StepBody::Activity { operation, .. } = &step.body {
        if !registry.contains(operation) {
            return Err(BlueprintError::UnknownOperation {
                step_id: step.id.clone(),
                operation: operation.clone(),
            });
        }
    }
    for child in step.children() {
        check_operations(child, registry)?;
    }
    Ok(())
}

/// Reject pipelines with repeated step ids.
pub fn validate_pipeline_ids(steps: &[PipelineStep]) -> Result<(), BlueprintError> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.id.is_empty() {
            return Err(BlueprintError::Validation(
                "step id must not be empty".to_string(),
            ));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(BlueprintError::DuplicateStepId(step.id.clone()));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a blueprint file; `.json` is parsed as JSON, anything else as YAML.
pub fn load_blueprint_file(path: &Path) -> Result<WorkflowBlueprint, BlueprintError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => parse_blueprint_json(&content),
        _ => parse_blueprint_yaml(&content),
    }
}

/// Save a blueprint as YAML, creating parent directories as needed.
pub fn save_blueprint_file(
    path: &Path,
    blueprint: &WorkflowBlueprint,
) -> Result<(), BlueprintError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_blueprint_yaml(blueprint)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover every blueprint file (`.yaml`, `.yml`, `.json`) under `base_dir`.
///
/// Files that fail to parse are skipped with a warning.
pub fn discover_blueprints(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowBlueprint)>, BlueprintError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowBlueprint)>,
) -> Result<(), BlueprintError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
            continue;
        }
        let is_blueprint = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml" | "json")
        );
        if !is_blueprint {
            continue;
        }
        match load_blueprint_file(&path) {
            Ok(blueprint) => results.push((path, blueprint)),
            Err(err) => {
                tracing::warn!(?path, error = %err, "skipping unparseable blueprint file");
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
