//! Local durable execution: the in-process executor and its blueprint catalog.

pub mod catalog;
pub mod in_process;

pub use catalog::BlueprintCatalog;
pub use in_process::InProcessExecutor;
