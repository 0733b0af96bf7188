//! Named blueprints available to child-workflow steps.

use std::collections::HashMap;
use std::path::Path;

use plexflow_core::workflow::definition::{discover_blueprints, BlueprintError};
use plexflow_types::workflow::WorkflowBlueprint;

/// Blueprints keyed by their `name`.
#[derive(Debug, Clone, Default)]
pub struct BlueprintCatalog {
    blueprints: HashMap<String, WorkflowBlueprint>,
}

impl BlueprintCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every blueprint file under `dir` (see `discover_blueprints`).
    ///
    /// When two files declare the same name, the one whose path sorts last wins.
    pub fn from_dir(dir: &Path) -> Result<Self, BlueprintError> {
        let mut catalog = Self::new();
        for (path, blueprint) in discover_blueprints(dir)? {
            tracing::debug!(?path, workflow = blueprint.name.as_str(), "loaded blueprint");
            catalog.insert(blueprint);
        }
        Ok(catalog)
    }

    /// Add a blueprint, returning the one it replaced.
    pub fn insert(&mut self, blueprint: WorkflowBlueprint) -> Option<WorkflowBlueprint> {
        let replaced = self.blueprints.insert(blueprint.name.clone(), blueprint);
        if let Some(old) = &replaced {
            tracing::warn!(workflow = old.name.as_str(), "replacing blueprint in catalog");
        }
        replaced
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, blueprint: WorkflowBlueprint) -> Self {
        self.insert(blueprint);
        self
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowBlueprint> {
        self.blueprints.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.blueprints.contains_key(name)
    }

    /// Catalog names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.blueprints.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }
}
