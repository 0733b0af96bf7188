//! Shared domain types for plexflow.
//!
//! Blueprint and pipeline definitions, execution logs and results, and engine
//! configuration. No runtime dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod workflow;
