//! Engine configuration types for plexflow.
//!
//! `EngineConfig` represents the `plexflow.toml` file that tunes timeouts,
//! resolver round limits and the retry policy of the in-process executor.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to activity and child-workflow calls without their own.
    #[serde(default = "default_step_timeout_secs")]
    pub default_step_timeout_secs: u64,

    /// Maximum nesting depth for child workflows run in-process.
    #[serde(default = "default_max_child_depth")]
    pub max_child_depth: u32,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_child_depth() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: default_step_timeout_secs(),
            max_child_depth: default_max_child_depth(),
            resolver: ResolverConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Dependency resolver tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Round cap is `max_rounds_factor * len(steps)` unless given per call.
    #[serde(default = "default_max_rounds_factor")]
    pub max_rounds_factor: usize,

    /// Run the steps that become ready in the same round concurrently.
    #[serde(default = "default_concurrent_rounds")]
    pub concurrent_rounds: bool,
}

fn default_max_rounds_factor() -> usize {
    2
}

fn default_concurrent_rounds() -> bool {
    true
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_rounds_factor: default_max_rounds_factor(),
            concurrent_rounds: default_concurrent_rounds(),
        }
    }
}

impl ResolverConfig {
    /// Round cap for a pipeline of `step_count` steps (never below 1).
    pub fn max_rounds_for(&self, step_count: usize) -> usize {
        self.max_rounds_factor.saturating_mul(step_count).max(1)
    }
}

/// Retry policy applied by the durable executor, never by the engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
        }
    }
}
