//! In-memory checkpoint store, used with `--no-checkpoint` and in tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use crate::domain::RunSummary;
use crate::error::{PlanloopError, Result};
use crate::id::now_ms;

use super::{Checkpoint, CheckpointPayload, CheckpointStore, poisoned, writer_conflict};

#[derive(Debug, Default)]
struct Inner {
    rows: HashMap<String, BTreeMap<u64, Checkpoint>>,
    runs: HashMap<String, RunSummary>,
    writers: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<Inner>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all runs
    pub fn row_count(&self) -> usize {
        self.inner
            .lock()
            .map(|i| i.rows.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn append(&self, run_id: &str, seq: u64, payload: &CheckpointPayload) -> Result<()> {
        self.append_batch(run_id, &[(seq, payload.clone())])
    }

    fn append_batch(&self, run_id: &str, rows: &[(u64, CheckpointPayload)]) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        let log = inner.rows.entry(run_id.to_string()).or_default();

        // Check every key first so a failed batch leaves nothing behind
        if let Some((seq, _)) = rows.iter().find(|(seq, _)| log.contains_key(seq)) {
            return Err(PlanloopError::Persistence(format!(
                "checkpoint ({}, {}) already exists",
                run_id, seq
            )));
        }

        let timestamp = now_ms();
        for (seq, payload) in rows {
            log.insert(
                *seq,
                Checkpoint {
                    run_id: run_id.to_string(),
                    seq: *seq,
                    timestamp,
                    payload: payload.clone(),
                },
            );
        }
        Ok(())
    }

    fn load_rows(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        Ok(inner
            .rows
            .get(run_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default())
    }

    fn save_run(&self, summary: &RunSummary) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner.runs.insert(summary.id.clone(), summary.clone());
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Option<RunSummary>> {
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        Ok(inner.runs.get(run_id).cloned())
    }

    fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let inner = self.inner.lock().map_err(|_| poisoned())?;
        let mut runs: Vec<RunSummary> = inner.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(runs)
    }

    fn claim_writer(&self, run_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        if !inner.writers.insert(run_id.to_string()) {
            return Err(writer_conflict(run_id));
        }
        Ok(())
    }

    fn release_writer(&self, run_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.writers.remove(run_id);
        }
    }
}
