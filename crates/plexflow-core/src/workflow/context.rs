//! Per-run execution context.
//!
//! `ExecutionContext` is the append-only map of step id -> result that flows
//! through one run. Keys are kept in a `BTreeMap` so snapshots and the final
//! context serialize identically across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised by context writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// A result for this id was already recorded.
    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("invalid context payload: {0}")]
    InvalidPayload(String),
}

/// Append-only map of step results for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    entries: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a context with the caller's initial data.
    pub fn from_initial(initial: Map<String, Value>) -> Self {
        Self {
            entries: initial.into_iter().collect(),
        }
    }

    /// Record the result of `step_id`. Existing keys are never overwritten.
    pub fn insert(&mut self, step_id: impl Into<String>, value: Value) -> Result<(), ContextError> {
        let step_id = step_id.into();
        if self.entries.contains_key(&step_id) {
            return Err(ContextError::DuplicateStepId(step_id));
        }
        self.entries.insert(step_id, value);
        Ok(())
    }

    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.entries.get(step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.entries.contains_key(step_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Read-only copy of every recorded result as a JSON object.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Activity input: the snapshot overlaid with `params` (params win).
    pub fn input_with(&self, params: &Map<String, Value>) -> Value {
        overlay(self.snapshot(), params)
    }

    /// Copy into `self` every key of `other` that `self` lacks.
    ///
    /// Used to merge a fan-out branch back after the join; keys both sides
    /// share were present before the branch was forked. Returns the added keys.
    pub fn absorb(&mut self, other: ExecutionContext) -> Vec<String> {
        let mut added = Vec::new();
        for (key, value) in other.entries {
            if !self.entries.contains_key(&key) {
                added.push(key.clone());
                self.entries.insert(key, value);
            }
        }
        added
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.entries
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.snapshot())
    }

    pub fn from_json(value: Value) -> Result<Self, ContextError> {
        match value {
            Value::Object(map) => Ok(Self::from_initial(map)),
            other => Err(ContextError::InvalidPayload(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

/// `base` with every entry of `params` written over it.
pub fn overlay(mut base: Map<String, Value>, params: &Map<String, Value>) -> Value {
    for (key, value) in params {
        base.insert(key.clone(), value.clone());
    }
    Value::Object(base)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
