//! Executor - run a validated plan step by step against the capability registry.
//!
//! Failures never abort the batch: an unknown capability or a capability error
//! becomes a failed ExecutionResult and execution moves on. Once cancellation
//! is observed no new step starts; the remaining steps are recorded as failed,
//! so the result count always equals the step count.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::domain::{ExecutionResult, Plan};
use crate::tools::CapabilityRegistry;

pub const CANCELLED_ERROR: &str = "cancelled before start";

pub struct Executor {
    registry: Arc<CapabilityRegistry>,
}

impl Executor {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Execute every step in plan order
    pub async fn execute(&self, plan: &Plan, cancel: &CancellationToken) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(plan.len());

        for step in &plan.steps {
            if cancel.is_cancelled() {
                results.push(ExecutionResult::failure(
                    step.step_number,
                    &step.capability,
                    CANCELLED_ERROR,
                    0,
                ));
                continue;
            }

            let started = Instant::now();
            let outcome = self.registry.invoke(&step.capability, &step.arguments).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(value) => {
                    debug!(
                        "Executor: step {} ({}) ok in {}ms",
                        step.step_number, step.capability, duration_ms
                    );
                    ExecutionResult::success(step.step_number, &step.capability, value, duration_ms)
                }
                Err(e) => {
                    warn!("Executor: step {} ({}) failed: {}", step.step_number, step.capability, e);
                    ExecutionResult::failure(step.step_number, &step.capability, e.to_string(), duration_ms)
                }
            };
            results.push(result);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Step;
    use crate::tools::{Capability, CapabilityError};
    use async_trait::async_trait;
    use serde_json::{Map, Value, json};
    use tempfile::TempDir;

    /// Cancels the shared token when invoked
    struct CancelOnInvoke(CancellationToken);

    #[async_trait]
    impl Capability for CancelOnInvoke {
        fn name(&self) -> &str {
            "stop"
        }
        fn description(&self) -> &str {
            "cancels the run"
        }
        fn argument_schema(&self) -> Value {
            json!({})
        }
        async fn invoke(&self, _args: &Map<String, Value>) -> Result<Value, CapabilityError> {
            self.0.cancel();
            Ok(json!("stopped"))
        }
    }

    fn step(n: u32, capability: &str, args: Value) -> Step {
        Step::new(n, capability, args.as_object().cloned().unwrap_or_default(), "step")
    }

    fn registry(dir: &TempDir) -> Arc<CapabilityRegistry> {
        Arc::new(CapabilityRegistry::with_builtins(dir.path(), 10_000))
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let dir = TempDir::new().unwrap();
        let plan = Plan::new(
            vec![
                step(1, "calculator", json!({"expression": "23*7+11"})),
                step(2, "write_file", json!({"path": "result.txt", "content": "172"})),
            ],
            "compute and save",
        );
        let results = Executor::new(registry(&dir)).execute(&plan, &CancellationToken::new()).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[0].value, Some(json!(172)));
        assert_eq!(std::fs::read_to_string(dir.path().join("result.txt")).unwrap(), "172");
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_batch() {
        let dir = TempDir::new().unwrap();
        let plan = Plan::new(
            vec![
                step(1, "teleport", json!({})),
                step(2, "calculator", json!({"expression": "1/0"})),
                step(3, "read_file", json!({"path": "../outside"})),
                step(4, "echo", json!({"text": "still here"})),
            ],
            "mixed",
        );
        let results = Executor::new(registry(&dir)).execute(&plan, &CancellationToken::new()).await;
        assert_eq!(results.len(), plan.len());
        assert_eq!(results[0].error.as_deref(), Some("capability not found: teleport"));
        assert!(!results[1].success);
        assert!(!results[2].success);
        assert!(results[3].success);
        assert_eq!(
            results.iter().map(|r| r.step_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
    }

    #[tokio::test]
    async fn test_no_step_starts_after_cancellation() {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let registry = CapabilityRegistry::with_builtins(dir.path(), 10_000)
            .with(Arc::new(CancelOnInvoke(cancel.clone())))
            .unwrap();
        let plan = Plan::new(
            vec![
                step(1, "stop", json!({})),
                step(2, "write_file", json!({"path": "never.txt", "content": "x"})),
            ],
            "stop early",
        );

        let results = Executor::new(Arc::new(registry)).execute(&plan, &cancel).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert_eq!(results[1].error.as_deref(), Some(CANCELLED_ERROR));
        assert!(!dir.path().join("never.txt").exists());
    }
}
