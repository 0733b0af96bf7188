//! Scripted executor shared by the engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use super::durable::{ActivityError, DurableExecutor};
use super::registry::StepRegistry;

/// Every call the executor received: operation (or `child:<name>`) and input.
pub(crate) type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Timeout each activity call arrived with, in call order.
pub(crate) type TimeoutLog = Arc<Mutex<Vec<(String, Duration)>>>;

/// Executor stub with per-operation latency, output and failure scripts.
///
/// Unscripted activities return `"<name>-done"`; `echo` returns its input.
/// Child workflows: `missing` is unknown, `slow` sleeps 200ms, anything else
/// returns `{"child": name}`.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    delays_ms: HashMap<String, u64>,
    outputs: HashMap<String, Value>,
    failures: HashMap<String, ActivityError>,
    calls: CallLog,
    timeouts: TimeoutLog,
}

impl ScriptedExecutor {
    pub(crate) fn delay(mut self, name: &str, ms: u64) -> Self {
        self.delays_ms.insert(name.to_string(), ms);
        self
    }

    pub(crate) fn output(mut self, name: &str, value: Value) -> Self {
        self.outputs.insert(name.to_string(), value);
        self
    }

    pub(crate) fn fail(mut self, name: &str, err: ActivityError) -> Self {
        self.failures.insert(name.to_string(), err);
        self
    }

    pub(crate) fn calls(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    pub(crate) fn timeouts(&self) -> TimeoutLog {
        Arc::clone(&self.timeouts)
    }
}

impl DurableExecutor for ScriptedExecutor {
    async fn execute_activity(
        &self,
        name: &str,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, ActivityError> {
        self.timeouts
            .lock()
            .unwrap()
            .push((name.to_string(), timeout));
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), input.clone()));
        if let Some(ms) = self.delays_ms.get(name) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if let Some(err) = self.failures.get(name) {
            return Err(err.clone());
        }
        if name == "echo" {
            return Ok(input);
        }
        Ok(self
            .outputs
            .get(name)
            .cloned()
            .unwrap_or_else(|| json!(format!("{name}-done"))))
    }

    async fn execute_child_workflow(
        &self,
        workflow_name: &str,
        input: Value,
        instance_id: &str,
    ) -> Result<Value, ActivityError> {
        self.calls.lock().unwrap().push((
            format!("child:{workflow_name}"),
            json!({ "input": input, "instance_id": instance_id }),
        ));
        match workflow_name {
            "missing" => Err(ActivityError::UnknownWorkflow(workflow_name.to_string())),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(Value::Null)
            }
            _ => Ok(json!({ "child": workflow_name })),
        }
    }
}

/// Registry with a no-op activity for each name.
pub(crate) fn registry(names: &[&str]) -> Arc<StepRegistry> {
    let mut registry = StepRegistry::new();
    for name in names {
        registry.register_fn(*name, |_| async { Ok(Value::Null) });
    }
    Arc::new(registry)
}

/// Names of the calls received, in call order.
pub(crate) fn called(calls: &CallLog) -> Vec<String> {
    calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
}

/// Input of the first call to `name`.
pub(crate) fn input_of(calls: &CallLog, name: &str) -> Value {
    calls
        .lock()
        .unwrap()
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, input)| input.clone())
        .unwrap()
}

/// Timeout of the first call to `name`.
pub(crate) fn timeout_of(timeouts: &TimeoutLog, name: &str) -> Duration {
    timeouts
        .lock()
        .unwrap()
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, timeout)| *timeout)
        .unwrap()
}
