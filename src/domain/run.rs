//! Run record and status
//!
//! A Run is one invocation of the loop for a single goal. It is owned by the
//! loop controller and carries the cycle counter, elapsed-time accounting and
//! the history used as context for later cycles.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::ExecutionResult;
use super::plan::Plan;
use super::reflection::ReflectionRecord;

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Actively cycling
    Running,
    /// Reflection marked the goal satisfied
    FinishedGoal,
    /// Iteration or time limit reached
    FinishedLimit,
    /// Plan repair exhausted, persistence failure, or reflection failure threshold
    FinishedError,
    /// Operator declined a human checkpoint or cancelled the run
    AbortedByOperator,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::FinishedGoal => "finished_goal",
            RunStatus::FinishedLimit => "finished_limit",
            RunStatus::FinishedError => "finished_error",
            RunStatus::AbortedByOperator => "aborted_by_operator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "finished_goal" => Some(RunStatus::FinishedGoal),
            "finished_limit" => Some(RunStatus::FinishedLimit),
            "finished_error" => Some(RunStatus::FinishedError),
            "aborted_by_operator" => Some(RunStatus::AbortedByOperator),
            _ => None,
        }
    }

    /// Process exit code for a run that ended in this status
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::FinishedGoal | RunStatus::FinishedLimit => 0,
            _ => 1,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything recorded for one completed cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: u32,
    pub plan: Plan,
    pub results: Vec<ExecutionResult>,
    pub reflection: Option<ReflectionRecord>,
}

impl CycleRecord {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

/// Persisted run metadata, as shown by `inspect` and `runs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub goal: String,
    pub status: RunStatus,
    pub cycle: u32,
    pub elapsed_ms: u64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_error: Option<String>,
}

/// One invocation of the loop for a single goal
#[derive(Debug, Clone)]
pub struct Run {
    //=== Identity ===
    pub id: String,
    pub goal: String,
    pub created_at: DateTime<Utc>,

    //=== Runtime State ===
    /// Number of completed cycles
    pub cycle: u32,
    pub status: RunStatus,
    pub last_error: Option<String>,
    /// Total plan repair attempts across all cycles
    pub repair_attempts: u32,
    /// Total reflection parse failures across all cycles
    pub reflection_failures: u32,
    /// Bounded history of reflection parse failure messages
    pub failure_log: VecDeque<String>,
    pub history: Vec<CycleRecord>,
    /// Next checkpoint sequence number
    pub next_seq: u64,

    //=== Timing ===
    prior_elapsed: Duration,
    session_start: Instant,
}

impl Run {
    /// Start a fresh run
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            created_at: Utc::now(),
            cycle: 0,
            status: RunStatus::Running,
            last_error: None,
            repair_attempts: 0,
            reflection_failures: 0,
            failure_log: VecDeque::new(),
            history: Vec::new(),
            next_seq: 1,
            prior_elapsed: Duration::ZERO,
            session_start: Instant::now(),
        }
    }

    /// Rebuild a run from its persisted summary; elapsed time continues from the stored value
    pub fn from_summary(summary: &RunSummary) -> Self {
        let mut run = Self::new(summary.id.clone(), summary.goal.clone());
        run.created_at = Utc
            .timestamp_millis_opt(summary.created_at)
            .single()
            .unwrap_or_else(Utc::now);
        run.cycle = summary.cycle;
        run.status = summary.status;
        run.last_error = summary.last_error.clone();
        run.prior_elapsed = Duration::from_millis(summary.elapsed_ms);
        run
    }

    /// Pretend this much time already elapsed before the current session
    pub fn with_prior_elapsed(mut self, elapsed: Duration) -> Self {
        self.prior_elapsed = elapsed;
        self
    }

    /// Cumulative wall-clock time across all sessions of this run
    pub fn elapsed(&self) -> Duration {
        self.prior_elapsed + self.session_start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Append a reflection parse failure, keeping at most `limit` messages
    pub fn record_reflection_failure(&mut self, message: impl Into<String>, limit: usize) -> u32 {
        self.reflection_failures += 1;
        self.failure_log.push_back(message.into());
        while self.failure_log.len() > limit.max(1) {
            self.failure_log.pop_front();
        }
        self.reflection_failures
    }

    pub fn last_reflection(&self) -> Option<&ReflectionRecord> {
        self.history.iter().rev().find_map(|c| c.reflection.as_ref())
    }

    pub fn last_plan(&self) -> Option<&Plan> {
        self.history.last().map(|c| &c.plan)
    }

    /// Move to a terminal status
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        self.status = status;
        if error.is_some() {
            self.last_error = error;
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            goal: self.goal.clone(),
            status: self.status,
            cycle: self.cycle,
            elapsed_ms: self.elapsed_ms(),
            created_at: self.created_at.timestamp_millis(),
            updated_at: crate::id::now_ms(),
            last_error: self.last_error.clone(),
        }
    }
}
