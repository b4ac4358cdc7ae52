//! Checkpoint store - durable, append-only step log per run
//!
//! Every executed step is written as one row keyed by (run_id, seq), where
//! `seq` is a run-wide sequence number. The rows written for one cycle form a
//! batch; the last row of a batch carries the cycle's reflection. Replaying
//! the complete batches reconstructs the state needed to resume at the next
//! cycle boundary.

mod memory;
mod sqlite;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use std::sync::Arc;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::domain::{CycleRecord, ExecutionResult, Plan, ReflectionRecord, RunSummary, Step};
use crate::error::{PlanloopError, Result};

/// Serialized body of one checkpoint row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointPayload {
    /// Cycle this step ran in (1-based)
    pub cycle: u32,
    /// Sequence number of the first row of this cycle's batch
    pub batch: u64,
    /// Number of rows in this cycle's batch
    pub batch_size: u32,
    /// Rationale of the plan the step belongs to
    pub rationale: String,
    /// SHA-256 digest of the accepted plan
    pub plan_digest: String,
    pub step: Step,
    pub result: ExecutionResult,
    /// Set on the last row of a batch only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reflection: Option<ReflectionRecord>,
}

/// One durable checkpoint row
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub run_id: String,
    pub seq: u64,
    pub timestamp: i64,
    pub payload: CheckpointPayload,
}

/// State reconstructed from the complete batches of a run
#[derive(Debug, Clone, PartialEq)]
pub struct ResumableState {
    pub run_id: String,
    /// Last fully checkpointed cycle
    pub cycle: u32,
    pub history: Vec<CycleRecord>,
    /// Next free sequence number
    pub next_seq: u64,
    /// Reflection parse failures as of the last checkpointed cycle
    pub reflection_failures: u32,
}

impl ResumableState {
    pub fn last_plan(&self) -> Option<&Plan> {
        self.history.last().map(|c| &c.plan)
    }

    /// Every recorded result, in execution order
    pub fn results(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.history.iter().flat_map(|c| c.results.iter())
    }
}

/// Build the checkpoint rows for one completed cycle, starting at `first_seq`
pub fn cycle_batch(record: &CycleRecord, first_seq: u64) -> Vec<(u64, CheckpointPayload)> {
    let digest = record.plan.digest();
    let batch_size = record.plan.steps.len() as u32;
    let last = record.plan.steps.len().saturating_sub(1);

    record
        .plan
        .steps
        .iter()
        .zip(record.results.iter())
        .enumerate()
        .map(|(i, (step, result))| {
            (
                first_seq + i as u64,
                CheckpointPayload {
                    cycle: record.cycle,
                    batch: first_seq,
                    batch_size,
                    rationale: record.plan.rationale.clone(),
                    plan_digest: digest.clone(),
                    step: step.clone(),
                    result: result.clone(),
                    reflection: if i == last { record.reflection.clone() } else { None },
                },
            )
        })
        .collect()
}

/// Reconstruct resumable state from rows ordered by seq.
///
/// A batch is accepted only when it is complete, belongs to the next cycle
/// and its steps hash to the recorded plan digest. Rejected batches are
/// skipped, so a cycle re-run after an interrupted write replaces the broken
/// batch. `next_seq` always points past every stored row. Returns None when
/// no batch is complete.
pub fn replay(run_id: &str, rows: &[Checkpoint]) -> Option<ResumableState> {
    let mut history: Vec<CycleRecord> = Vec::new();
    let mut reflection_failures = 0u32;
    let mut index = 0usize;

    while index < rows.len() {
        match accept_batch(&rows[index..], history.last().map(|c| c.cycle + 1)) {
            Some(record) => {
                index += record.plan.steps.len();
                if let Some(reflection) = &record.reflection {
                    reflection_failures = reflection.failure_count;
                }
                history.push(record);
            }
            None => {
                warn!("replay: skipping rejected batch at seq {} for run {}", rows[index].seq, run_id);
                index += 1;
                while index < rows.len() && rows[index].seq != rows[index].payload.batch {
                    index += 1;
                }
            }
        }
    }

    let next_seq = rows.last().map(|r| r.seq + 1).unwrap_or(1);
    let cycle = history.last()?.cycle;
    Some(ResumableState {
        run_id: run_id.to_string(),
        cycle,
        history,
        next_seq,
        reflection_failures,
    })
}

/// The batch starting at `rows[0]`, if it is complete and consistent
fn accept_batch(rows: &[Checkpoint], expected_cycle: Option<u32>) -> Option<CycleRecord> {
    let head = &rows.first()?.payload;
    let size = head.batch_size as usize;
    if size == 0 || size > rows.len() || rows[0].seq != head.batch {
        return None;
    }
    if expected_cycle.is_some_and(|cycle| cycle != head.cycle) {
        return None;
    }

    let batch = &rows[..size];
    let consistent = batch.iter().enumerate().all(|(i, row)| {
        row.seq == head.batch + i as u64
            && row.payload.batch == head.batch
            && row.payload.cycle == head.cycle
            && row.payload.plan_digest == head.plan_digest
    });
    let reflection = batch.last()?.payload.reflection.clone()?;
    let plan = Plan::new(batch.iter().map(|r| r.payload.step.clone()).collect(), head.rationale.clone());
    if !consistent || plan.digest() != head.plan_digest {
        return None;
    }

    Some(CycleRecord {
        cycle: head.cycle,
        plan,
        results: batch.iter().map(|r| r.payload.result.clone()).collect(),
        reflection: Some(reflection),
    })
}

/// Durable record of runs and their executed steps.
///
/// Readers may run concurrently with a writer. A run has at most one writer
/// at a time, enforced through [`WriterClaim`].
pub trait CheckpointStore: Send + Sync {
    /// Append a single row. Existing rows are never overwritten.
    fn append(&self, run_id: &str, seq: u64, payload: &CheckpointPayload) -> Result<()>;

    /// Append rows atomically, in the given (ascending seq) order
    fn append_batch(&self, run_id: &str, rows: &[(u64, CheckpointPayload)]) -> Result<()>;

    /// All rows for a run ordered by seq
    fn load_rows(&self, run_id: &str) -> Result<Vec<Checkpoint>>;

    /// Most recent consistent state, or None when nothing resumable exists
    fn load_latest(&self, run_id: &str) -> Result<Option<ResumableState>> {
        let rows = self.load_rows(run_id)?;
        Ok(replay(run_id, &rows))
    }

    /// Insert or update run metadata
    fn save_run(&self, summary: &RunSummary) -> Result<()>;

    fn load_run(&self, run_id: &str) -> Result<Option<RunSummary>>;

    /// All runs, most recently updated first
    fn list_runs(&self) -> Result<Vec<RunSummary>>;

    /// Register as the writer for a run; fails if another writer holds it
    fn claim_writer(&self, run_id: &str) -> Result<()>;

    fn release_writer(&self, run_id: &str);
}

/// Writer claim released on drop
pub struct WriterClaim {
    store: Arc<dyn CheckpointStore>,
    run_id: String,
}

impl WriterClaim {
    pub fn acquire(store: Arc<dyn CheckpointStore>, run_id: &str) -> Result<Self> {
        store.claim_writer(run_id)?;
        Ok(Self {
            store,
            run_id: run_id.to_string(),
        })
    }
}

impl Drop for WriterClaim {
    fn drop(&mut self) {
        self.store.release_writer(&self.run_id);
    }
}

pub(crate) fn writer_conflict(run_id: &str) -> PlanloopError {
    PlanloopError::InvalidState(format!("run {} already has an active writer", run_id))
}

pub(crate) fn poisoned() -> PlanloopError {
    PlanloopError::Persistence("checkpoint store lock poisoned".to_string())
}
