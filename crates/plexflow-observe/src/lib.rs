//! Observability setup for plexflow: structured logging and optional
//! OpenTelemetry trace export for blueprint and pipeline runs.

pub mod tracing_setup;
