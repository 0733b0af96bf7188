//! Infrastructure layer for plexflow.
//!
//! Contains the in-process implementation of the `DurableExecutor` contract
//! defined in `plexflow-core` and the TOML configuration loader.

pub mod config;
pub mod workflow;
