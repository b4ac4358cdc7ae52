//! SQLite-backed checkpoint store.
//!
//! The database holds two tables:
//! - **checkpoints**: one row per executed step, primary key (run_id, seq), never updated
//! - **runs**: one row per run with goal, status and progress, upserted by the controller
//!
//! The connection runs in WAL journal mode with a busy timeout so readers of
//! other runs proceed while a writer is active.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::domain::{RunStatus, RunSummary};
use crate::error::{PlanloopError, Result};
use crate::id::now_ms;

use super::{Checkpoint, CheckpointPayload, CheckpointStore, poisoned, writer_conflict};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteCheckpointStore {
    path: PathBuf,
    db: Mutex<Connection>,
    writers: Mutex<HashSet<String>>,
}

impl SqliteCheckpointStore {
    /// Open or create the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Connection::open(&path)?;
        Self::configure(&db)?;
        Self::init_schema(&db)?;
        debug!("SqliteCheckpointStore: opened {}", path.display());

        Ok(Self {
            path,
            db: Mutex::new(db),
            writers: Mutex::new(HashSet::new()),
        })
    }

    /// Private in-memory database, for tests
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::configure(&db)?;
        Self::init_schema(&db)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            db: Mutex::new(db),
            writers: Mutex::new(HashSet::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure(db: &Connection) -> Result<()> {
        db.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        db.pragma_update(None, "synchronous", "NORMAL")?;
        debug!("SqliteCheckpointStore: journal_mode={}", mode);
        Ok(())
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                run_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                cycle INTEGER NOT NULL,
                step_number INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (run_id, seq)
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_cycle ON checkpoints(run_id, cycle);

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                goal TEXT NOT NULL,
                status TEXT NOT NULL,
                cycle INTEGER NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
            CREATE INDEX IF NOT EXISTS idx_runs_updated ON runs(updated_at);
            "#,
        )?;
        Ok(())
    }

    fn row_to_summary(row: &Row<'_>) -> rusqlite::Result<RunSummary> {
        let status: String = row.get(2)?;
        let elapsed_ms: i64 = row.get(4)?;
        Ok(RunSummary {
            id: row.get(0)?,
            goal: row.get(1)?,
            status: RunStatus::parse(&status).unwrap_or(RunStatus::FinishedError),
            cycle: row.get(3)?,
            elapsed_ms: elapsed_ms.max(0) as u64,
            last_error: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

fn persistence(context: &str, err: impl std::fmt::Display) -> PlanloopError {
    PlanloopError::Persistence(format!("{}: {}", context, err))
}

impl CheckpointStore for SqliteCheckpointStore {
    fn append(&self, run_id: &str, seq: u64, payload: &CheckpointPayload) -> Result<()> {
        self.append_batch(run_id, &[(seq, payload.clone())])
    }

    fn append_batch(&self, run_id: &str, rows: &[(u64, CheckpointPayload)]) -> Result<()> {
        let mut db = self.db.lock().map_err(|_| poisoned())?;
        let tx = db.transaction().map_err(|e| persistence("begin transaction", e))?;
        let created_at = now_ms();

        for (seq, payload) in rows {
            let json = serde_json::to_string(payload)?;
            tx.execute(
                r#"
                INSERT INTO checkpoints (run_id, seq, cycle, step_number, payload, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    run_id,
                    *seq as i64,
                    payload.cycle,
                    payload.step.step_number,
                    json,
                    created_at
                ],
            )
            .map_err(|e| persistence(&format!("insert checkpoint ({}, {})", run_id, seq), e))?;
        }

        tx.commit().map_err(|e| persistence("commit checkpoints", e))?;
        debug!("SqliteCheckpointStore: appended {} row(s) for {}", rows.len(), run_id);
        Ok(())
    }

    fn load_rows(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        let db = self.db.lock().map_err(|_| poisoned())?;
        let mut stmt = db.prepare(
            "SELECT seq, created_at, payload FROM checkpoints WHERE run_id = ?1 ORDER BY seq ASC",
        )?;
        let raw = stmt
            .query_map(params![run_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(seq, timestamp, json)| {
                Ok(Checkpoint {
                    run_id: run_id.to_string(),
                    seq: seq as u64,
                    timestamp,
                    payload: serde_json::from_str(&json)?,
                })
            })
            .collect()
    }

    fn save_run(&self, summary: &RunSummary) -> Result<()> {
        let db = self.db.lock().map_err(|_| poisoned())?;
        db.execute(
            r#"
            INSERT INTO runs (id, goal, status, cycle, elapsed_ms, last_error, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                cycle = excluded.cycle,
                elapsed_ms = excluded.elapsed_ms,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
            params![
                summary.id,
                summary.goal,
                summary.status.as_str(),
                summary.cycle,
                summary.elapsed_ms as i64,
                summary.last_error,
                summary.created_at,
                summary.updated_at,
            ],
        )
        .map_err(|e| persistence(&format!("save run {}", summary.id), e))?;
        Ok(())
    }

    fn load_run(&self, run_id: &str) -> Result<Option<RunSummary>> {
        let db = self.db.lock().map_err(|_| poisoned())?;
        let summary = db
            .query_row(
                "SELECT id, goal, status, cycle, elapsed_ms, last_error, created_at, updated_at FROM runs WHERE id = ?1",
                params![run_id],
                Self::row_to_summary,
            )
            .optional()?;
        Ok(summary)
    }

    fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let db = self.db.lock().map_err(|_| poisoned())?;
        let mut stmt = db.prepare(
            "SELECT id, goal, status, cycle, elapsed_ms, last_error, created_at, updated_at FROM runs ORDER BY updated_at DESC, id ASC",
        )?;
        let runs = stmt
            .query_map([], Self::row_to_summary)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(runs)
    }

    fn claim_writer(&self, run_id: &str) -> Result<()> {
        let mut writers = self.writers.lock().map_err(|_| poisoned())?;
        if !writers.insert(run_id.to_string()) {
            return Err(writer_conflict(run_id));
        }
        Ok(())
    }

    fn release_writer(&self, run_id: &str) {
        if let Ok(mut writers) = self.writers.lock() {
            writers.remove(run_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::test_support::cycle_record;
    use crate::checkpoint::{WriterClaim, cycle_batch};
    use crate::domain::Run;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_temp_store() -> (TempDir, SqliteCheckpointStore) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::open(temp_dir.path().join("state").join("checkpoints.db")).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let (temp_dir, store) = create_temp_store();
        assert!(temp_dir.path().join("state").is_dir());
        assert!(store.path().ends_with("checkpoints.db"));
    }

    #[test]
    fn test_append_and_load_rows() {
        let (_temp, store) = create_temp_store();
        let record = cycle_record(1, 3);
        store.append_batch("run-a", &cycle_batch(&record, 1)).unwrap();

        let rows = store.load_rows("run-a").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(rows[2].payload.reflection, record.reflection);
        assert!(store.load_rows("run-b").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_key_fails_whole_batch() {
        let (_temp, store) = create_temp_store();
        let record = cycle_record(1, 2);
        let rows = cycle_batch(&record, 1);
        store.append("run-a", rows[1].0, &rows[1].1).unwrap();

        let err = store.append_batch("run-a", &rows).unwrap_err();
        assert!(matches!(err, PlanloopError::Persistence(_)));
        assert_eq!(store.load_rows("run-a").unwrap().len(), 1);
    }

    #[test]
    fn test_load_latest_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("checkpoints.db");
        let records = vec![cycle_record(1, 2), cycle_record(2, 1)];
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.append_batch("run-a", &cycle_batch(&records[0], 1)).unwrap();
            store.append_batch("run-a", &cycle_batch(&records[1], 3)).unwrap();
        }

        let store = SqliteCheckpointStore::open(&path).unwrap();
        let state = store.load_latest("run-a").unwrap().unwrap();
        assert_eq!(state.cycle, 2);
        assert_eq!(state.next_seq, 4);
        assert_eq!(state.history, records);
        assert_eq!(store.load_latest("run-a").unwrap(), Some(state));
    }

    #[test]
    fn test_runs_upsert_and_list() {
        let (_temp, store) = create_temp_store();
        let mut run = Run::new("run-a", "compute things");
        store.save_run(&run.summary()).unwrap();

        run.cycle = 2;
        run.finish(RunStatus::FinishedError, Some("boom".to_string()));
        store.save_run(&run.summary()).unwrap();

        let loaded = store.load_run("run-a").unwrap().unwrap();
        assert_eq!(loaded.goal, "compute things");
        assert_eq!(loaded.cycle, 2);
        assert_eq!(loaded.status, RunStatus::FinishedError);
        assert_eq!(loaded.last_error.as_deref(), Some("boom"));

        store.save_run(&Run::new("run-b", "other").summary()).unwrap();
        assert_eq!(store.list_runs().unwrap().len(), 2);
        assert!(store.load_run("missing").unwrap().is_none());
    }

    #[test]
    fn test_runs_are_isolated() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store.append_batch("a", &cycle_batch(&cycle_record(1, 1), 1)).unwrap();
        store.append_batch("b", &cycle_batch(&cycle_record(1, 2), 1)).unwrap();
        assert_eq!(store.load_rows("a").unwrap().len(), 1);
        assert_eq!(store.load_rows("b").unwrap().len(), 2);
    }

    #[test]
    fn test_writer_claims() {
        let store: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::open_in_memory().unwrap());
        let claim = WriterClaim::acquire(store.clone(), "run-a").unwrap();
        let err = WriterClaim::acquire(store.clone(), "run-a").err().unwrap();
        assert!(matches!(err, PlanloopError::InvalidState(_)));
        drop(claim);
        assert!(WriterClaim::acquire(store, "run-a").is_ok());
    }
}
