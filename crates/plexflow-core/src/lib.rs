//! Execution engines for plexflow.
//!
//! Depends only on `plexflow-types`; the durable-execution substrate is
//! reached through the `DurableExecutor` trait, implemented in
//! `plexflow-infra`.

pub mod workflow;
