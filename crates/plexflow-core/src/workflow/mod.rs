//! Workflow engines: blueprint interpretation and dependency resolution.
//!
//! - `context` -- append-only per-run map of step results
//! - `registry` -- named leaf operations (activities)
//! - `durable` -- contract with the durable-execution substrate
//! - `definition` -- JSON/YAML parsing, validation, filesystem load/save
//! - `dag` -- round planning and cycle diagnostics for pipelines
//! - `retry` -- retry decisions and backoff for executors
//! - `error` -- engine-level error type
//! - `interpreter` -- recursive blueprint walker
//! - `resolver` -- round-by-round pipeline executor

pub mod context;
pub mod dag;
pub mod definition;
pub mod durable;
pub mod error;
pub mod interpreter;
pub mod registry;
pub mod resolver;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_support;

pub use context::ExecutionContext;
pub use durable::{ActivityError, BoxDurableExecutor, DurableExecutor};
pub use error::ExecutionError;
pub use interpreter::BlueprintInterpreter;
pub use registry::{Activity, StepRegistry};
pub use resolver::DependencyResolver;
