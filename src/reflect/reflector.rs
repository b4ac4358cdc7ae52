//! Reflector - turn a cycle's results into a continue/finish decision
//!
//! Order of work for one cycle:
//! 1. ask the model for a reflection payload and parse it strictly
//! 2. checkpoint every step of the cycle in one atomic batch
//! 3. fold the cycle into the run history
//! 4. apply the parse-failure threshold, termination criteria, the model's
//!    own preference and finally the human checkpoint gate

use std::sync::Arc;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::{CheckpointStore, cycle_batch};
use crate::domain::{
    CycleRecord, ExecutionResult, Plan, ReflectionDecision, ReflectionPayload, ReflectionRecord, Run, RunStatus,
};
use crate::error::{PlanloopError, Result};
use crate::llm::LanguageModel;
use crate::prompt::{PromptRenderer, ReflectContext};
use crate::validation::extract_json_object;

use super::human::{GateDecision, HumanGate};
use super::termination::TerminationEngine;

/// What the controller should do after a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleDecision {
    Continue,
    Finish { status: RunStatus, reason: String },
}

/// Reflection failure policy and human checkpoint cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReflectorPolicy {
    /// Cumulative parse failures that force FINISHED_ERROR
    pub failure_threshold: u32,
    /// Parse failure messages kept on the run
    pub failure_history_limit: usize,
    /// Ask the operator every N cycles; None disables the gate
    pub checkpoint_interval: Option<u32>,
}

impl Default for ReflectorPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_history_limit: 10,
            checkpoint_interval: Some(5),
        }
    }
}

pub struct Reflector {
    model: Arc<dyn LanguageModel>,
    renderer: Arc<PromptRenderer>,
    store: Arc<dyn CheckpointStore>,
    termination: TerminationEngine,
    gate: Arc<dyn HumanGate>,
    policy: ReflectorPolicy,
}

impl Reflector {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        renderer: Arc<PromptRenderer>,
        store: Arc<dyn CheckpointStore>,
        termination: TerminationEngine,
        gate: Arc<dyn HumanGate>,
        policy: ReflectorPolicy,
    ) -> Self {
        Self {
            model,
            renderer,
            store,
            termination,
            gate,
            policy,
        }
    }

    pub fn termination(&self) -> &TerminationEngine {
        &self.termination
    }

    /// Reflect on one executed cycle, checkpoint it and decide what comes next.
    ///
    /// Errors are persistence or rendering failures; the run state is left
    /// untouched when the checkpoint cannot be written.
    pub async fn reflect(
        &self,
        run: &mut Run,
        plan: Plan,
        results: Vec<ExecutionResult>,
        repairs: u32,
        cancel: &CancellationToken,
    ) -> Result<CycleDecision> {
        let cycle = run.cycle + 1;
        let prompt = self
            .renderer
            .reflect(&ReflectContext::new(&run.goal, cycle, &plan, &results, repairs))?;

        let parsed = match self.model.generate(&prompt, "").await {
            Ok(text) => parse_reflection(&text),
            Err(e) => Err(format!("model call failed: {}", e)),
        };

        // Count the failure on a scratch copy so a failed checkpoint leaves the run as it was
        let mut failures = run.reflection_failures;
        let record = match parsed {
            Ok(payload) => ReflectionRecord::parsed(cycle, payload, failures),
            Err(message) => {
                failures += 1;
                warn!("Reflector: cycle {} reflection unusable ({}): {}", cycle, failures, message);
                ReflectionRecord::parse_failed(cycle, message, failures)
            }
        };

        let cycle_record = CycleRecord {
            cycle,
            plan,
            results,
            reflection: Some(record.clone()),
        };
        let rows = cycle_batch(&cycle_record, run.next_seq);
        self.store
            .append_batch(&run.id, &rows)
            .map_err(|e| match e {
                PlanloopError::Persistence(_) => e,
                other => PlanloopError::Persistence(other.to_string()),
            })?;
        debug!("Reflector: checkpointed {} step(s) of cycle {} for {}", rows.len(), cycle, run.id);

        run.next_seq += rows.len() as u64;
        run.cycle = cycle;
        if let Some(message) = &record.parse_error {
            run.record_reflection_failure(message.clone(), self.policy.failure_history_limit);
        }
        run.history.push(cycle_record);

        Ok(self.decide(run, &record, cancel).await)
    }

    async fn decide(&self, run: &Run, record: &ReflectionRecord, cancel: &CancellationToken) -> CycleDecision {
        if let Some(error) = &record.parse_error
            && run.reflection_failures >= self.policy.failure_threshold
        {
            return CycleDecision::Finish {
                status: RunStatus::FinishedError,
                reason: format!(
                    "reflection failed {} time(s), threshold {}: {}",
                    run.reflection_failures, self.policy.failure_threshold, error
                ),
            };
        }

        let payload = (!record.is_parse_failure()).then_some(&record.payload);
        let reasons = self.termination.evaluate(run, payload);
        if let Some(reason) = reasons.first() {
            info!("Reflector: run {} terminating at cycle {}: {}", run.id, run.cycle, reason);
            return CycleDecision::Finish {
                status: reason.status(),
                reason: reason.to_string(),
            };
        }

        if record.payload.decision == ReflectionDecision::Finish {
            // Explicitly unsatisfied goals end as errors; an omitted flag counts as success
            return if record.payload.goal_satisfied == Some(false) {
                CycleDecision::Finish {
                    status: RunStatus::FinishedError,
                    reason: "model finished without satisfying the goal".to_string(),
                }
            } else {
                CycleDecision::Finish {
                    status: RunStatus::FinishedGoal,
                    reason: "model requested finish".to_string(),
                }
            };
        }

        if let Some(interval) = self.policy.checkpoint_interval
            && interval > 0
            && run.cycle % interval == 0
        {
            info!("Reflector: human checkpoint at cycle {} for {}", run.cycle, run.id);
            if self.gate.confirm(run, cancel).await == GateDecision::Abort {
                return CycleDecision::Finish {
                    status: RunStatus::AbortedByOperator,
                    reason: format!("operator declined to continue after cycle {}", run.cycle),
                };
            }
        }

        CycleDecision::Continue
    }
}

/// Strictly parse a reflection response
pub fn parse_reflection(text: &str) -> std::result::Result<ReflectionPayload, String> {
    let json = extract_json_object(text).ok_or_else(|| "response does not contain a JSON object".to_string())?;
    serde_json::from_str(json).map_err(|e| format!("invalid reflection payload: {}", e))
}
