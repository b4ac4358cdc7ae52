//! Loop controller - INIT -> PLAN -> EXECUTE -> REFLECT -> {PLAN | FINISH}
//!
//! The controller owns the run: it assigns the identifier, claims the run for
//! writing, restores checkpointed state on resume, drives cycles until a
//! terminal status is reached and hands the outcome to long-term memory.
//! Cancellation is honoured at every phase boundary.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::checkpoint::{CheckpointStore, WriterClaim};
use crate::domain::{Run, RunStatus};
use crate::error::{PlanloopError, Result};
use crate::id::{generate_run_id, is_valid_run_id};
use crate::llm::LanguageModel;
use crate::memory::{LongTermMemory, NullMemory};
use crate::prompt::{PlanContext, PromptRenderer, RepairContext};
use crate::reflect::{AutoApprove, CycleDecision, HumanGate, Reflector, ReflectorPolicy, TerminationEngine};
use crate::tools::{CapabilityInfo, CapabilityRegistry};
use crate::validation::{PlanError, PlanValidator, RepairLoop, RepairOutcome};

use super::executor::Executor;

/// Loop limits and policies for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub time_limit: Duration,
    /// Total plan generations per cycle, including the first
    pub max_plan_attempts: u32,
    pub reflection_failure_threshold: u32,
    pub reflection_history_limit: usize,
    pub human_checkpoint_interval: u32,
    pub human_checkpoint_enabled: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            time_limit: Duration::from_secs(10 * 60),
            max_plan_attempts: 3,
            reflection_failure_threshold: 3,
            reflection_history_limit: 10,
            human_checkpoint_interval: 5,
            human_checkpoint_enabled: true,
        }
    }
}

impl LoopSettings {
    fn reflector_policy(&self) -> ReflectorPolicy {
        ReflectorPolicy {
            failure_threshold: self.reflection_failure_threshold,
            failure_history_limit: self.reflection_history_limit,
            checkpoint_interval: self.human_checkpoint_enabled.then_some(self.human_checkpoint_interval),
        }
    }
}

/// Orchestrates runs. Collaborators are injected at construction and shared read-only.
pub struct LoopController {
    model: Arc<dyn LanguageModel>,
    registry: Arc<CapabilityRegistry>,
    store: Arc<dyn CheckpointStore>,
    memory: Arc<dyn LongTermMemory>,
    gate: Arc<dyn HumanGate>,
    renderer: Arc<PromptRenderer>,
    settings: LoopSettings,
    cancel: CancellationToken,
}

impl LoopController {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        registry: Arc<CapabilityRegistry>,
        store: Arc<dyn CheckpointStore>,
        settings: LoopSettings,
    ) -> Result<Self> {
        Ok(Self {
            model,
            registry,
            store,
            memory: Arc::new(NullMemory),
            gate: Arc::new(AutoApprove),
            renderer: Arc::new(PromptRenderer::new()?),
            settings,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_memory(mut self, memory: Arc<dyn LongTermMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn HumanGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_renderer(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    /// Token that aborts runs driven by this controller
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a fresh run for `goal` under a newly generated identifier
    pub async fn start(&self, goal: &str) -> Result<Run> {
        self.start_with_id(&generate_run_id(), goal).await
    }

    /// Start `goal` under `run_id`, resuming if that run already exists
    pub async fn start_with_id(&self, run_id: &str, goal: &str) -> Result<Run> {
        if !is_valid_run_id(run_id) {
            return Err(PlanloopError::InvalidState(format!("invalid run id '{}'", run_id)));
        }
        if self.store.load_run(run_id)?.is_some() {
            return self.resume(run_id).await;
        }
        let claim = WriterClaim::acquire(self.store.clone(), run_id)?;
        let run = Run::new(run_id, goal);
        self.drive(run, claim).await
    }

    /// Resume a recorded run at the next cycle boundary.
    ///
    /// Runs that ended with FINISHED_GOAL or FINISHED_LIMIT are returned as they are.
    pub async fn resume(&self, run_id: &str) -> Result<Run> {
        if !is_valid_run_id(run_id) {
            return Err(PlanloopError::InvalidState(format!("invalid run id '{}'", run_id)));
        }
        let claim = WriterClaim::acquire(self.store.clone(), run_id)?;
        let summary = self
            .store
            .load_run(run_id)?
            .ok_or_else(|| PlanloopError::RunNotFound(run_id.to_string()))?;

        let mut run = Run::from_summary(&summary);
        if let Some(state) = self.store.load_latest(run_id)? {
            run.cycle = state.cycle;
            run.next_seq = state.next_seq;
            run.reflection_failures = state.reflection_failures;
            run.history = state.history;
            // Repair counts are not checkpointed; only this session's repairs accumulate
            let errors: Vec<String> = run
                .history
                .iter()
                .filter_map(|c| c.reflection.as_ref().and_then(|r| r.parse_error.clone()))
                .collect();
            let skip = errors.len().saturating_sub(self.settings.reflection_history_limit.max(1));
            run.failure_log = errors.into_iter().skip(skip).collect();
        } else {
            run.cycle = 0;
            run.next_seq = self.store.load_rows(run_id)?.last().map(|r| r.seq + 1).unwrap_or(1);
        }

        if matches!(summary.status, RunStatus::FinishedGoal | RunStatus::FinishedLimit) {
            tracing::info!(run_id = %run_id, status = %summary.status, "Run already finished");
            return Ok(run);
        }

        tracing::info!(run_id = %run_id, cycle = run.cycle, "Resuming run");
        run.status = RunStatus::Running;
        run.last_error = None;
        self.drive(run, claim).await
    }

    async fn drive(&self, run: Run, claim: WriterClaim) -> Result<Run> {
        let span = tracing::info_span!("run", run_id = %run.id);
        let result = self.drive_inner(run).instrument(span).await;
        drop(claim);
        result
    }

    async fn drive_inner(&self, mut run: Run) -> Result<Run> {
        // INIT
        run.status = RunStatus::Running;
        self.persist(&run)?;
        tracing::info!(goal = %run.goal, cycle = run.cycle, model = self.model.model(), "Run started");

        let capabilities = self.registry.describe();
        let validator = PlanValidator::from_registry(&self.registry);
        let executor = Executor::new(self.registry.clone());
        let termination = TerminationEngine::standard(self.settings.max_iterations, self.settings.time_limit);
        let reflector = Reflector::new(
            self.model.clone(),
            self.renderer.clone(),
            self.store.clone(),
            termination,
            self.gate.clone(),
            self.settings.reflector_policy(),
        );

        let context = match self.memory.retrieve(&run.goal).await {
            Ok(context) => context,
            Err(e) => {
                warn!("LoopController: memory retrieval failed: {}", e);
                String::new()
            }
        };

        loop {
            if self.abort_if_cancelled(&mut run) {
                break;
            }
            if let Some(reason) = reflector.termination().first(&run, None) {
                tracing::info!(cycle = run.cycle, reason = %reason, "Termination before cycle");
                run.finish(reason.status(), None);
                break;
            }

            // PLAN
            let cycle = run.cycle + 1;
            tracing::info!(cycle, "Planning");
            let outcome = match self.plan(&run, &validator, &capabilities, &context).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(cycle, error = %e, "Planning failed");
                    let err: PlanloopError = e.into();
                    run.finish(RunStatus::FinishedError, Some(err.to_string()));
                    break;
                }
            };
            run.repair_attempts += outcome.repairs();
            if self.abort_if_cancelled(&mut run) {
                break;
            }

            // EXECUTE
            tracing::info!(cycle, steps = outcome.plan.len(), "Executing");
            let results = executor.execute(&outcome.plan, &self.cancel).await;
            if self.abort_if_cancelled(&mut run) {
                break;
            }

            // REFLECT
            let failed = results.iter().filter(|r| !r.success).count();
            tracing::info!(cycle, failed, "Reflecting");
            let repairs = outcome.repairs();
            let decision = match reflector
                .reflect(&mut run, outcome.plan, results, repairs, &self.cancel)
                .await
            {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(cycle, error = %e, "Reflection failed");
                    run.finish(RunStatus::FinishedError, Some(e.to_string()));
                    break;
                }
            };

            if let CycleDecision::Finish { status, reason } = decision {
                tracing::info!(cycle, status = %status, reason = %reason, "Run finishing");
                let error = (status == RunStatus::FinishedError || status == RunStatus::AbortedByOperator)
                    .then_some(reason);
                run.finish(status, error);
                break;
            }

            if let Err(e) = self.persist(&run) {
                run.finish(RunStatus::FinishedError, Some(e.to_string()));
                break;
            }
        }

        // FINISH
        self.persist(&run)?;
        let summary = run
            .last_reflection()
            .and_then(|r| r.payload.summary.clone())
            .unwrap_or_else(|| format!("run ended with status {}", run.status));
        if let Err(e) = self.memory.store(&run.goal, run.last_plan(), &summary).await {
            warn!("LoopController: failed to store run in long-term memory: {}", e);
        }
        match self.model.usage() {
            Some(usage) => tracing::info!(
                status = %run.status,
                cycles = run.cycle,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "Run finished"
            ),
            None => tracing::info!(status = %run.status, cycles = run.cycle, "Run finished"),
        }
        Ok(run)
    }

    async fn plan(
        &self,
        run: &Run,
        validator: &PlanValidator,
        capabilities: &[CapabilityInfo],
        context: &str,
    ) -> std::result::Result<RepairOutcome, PlanError> {
        let prompt = self
            .renderer
            .plan(&PlanContext::for_run(run, capabilities, self.settings.max_iterations))
            .map_err(|e| PlanError::Prompt(e.to_string()))?;

        let repair_prompt = |raw: &str, violations: &[String]| {
            self.renderer
                .repair(&RepairContext::new(&run.goal, raw, violations, capabilities))
                .map_err(|e| PlanError::Prompt(e.to_string()))
        };

        RepairLoop::new(validator, self.settings.max_plan_attempts)
            .run(self.model.as_ref(), &prompt, context, repair_prompt)
            .await
    }

    fn abort_if_cancelled(&self, run: &mut Run) -> bool {
        if self.cancel.is_cancelled() {
            tracing::warn!(cycle = run.cycle, "Cancellation observed");
            run.finish(
                RunStatus::AbortedByOperator,
                Some("cancelled by operator".to_string()),
            );
            return true;
        }
        false
    }

    fn persist(&self, run: &Run) -> Result<()> {
        self.store.save_run(&run.summary()).map_err(|e| match e {
            PlanloopError::Persistence(_) => e,
            other => PlanloopError::Persistence(other.to_string()),
        })
    }
}
