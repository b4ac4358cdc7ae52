//! Termination criteria
//!
//! Each criterion is an independent check over the run state and, after
//! reflection, the parsed reflection payload. The engine evaluates all of
//! them; the first reason in registration order decides the terminal status.

use std::time::Duration;

use crate::domain::{ReflectionPayload, Run, RunStatus};

/// Why a run must stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    GoalSatisfied,
    IterationLimit { cycle: u32, max: u32 },
    TimeLimit { elapsed: Duration, limit: Duration },
}

impl TerminationReason {
    pub fn status(&self) -> RunStatus {
        match self {
            TerminationReason::GoalSatisfied => RunStatus::FinishedGoal,
            TerminationReason::IterationLimit { .. } | TerminationReason::TimeLimit { .. } => RunStatus::FinishedLimit,
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::GoalSatisfied => write!(f, "goal satisfied"),
            TerminationReason::IterationLimit { cycle, max } => {
                write!(f, "iteration limit reached ({}/{})", cycle, max)
            }
            TerminationReason::TimeLimit { elapsed, limit } => write!(
                f,
                "time limit reached ({}s elapsed, limit {}s)",
                elapsed.as_secs(),
                limit.as_secs()
            ),
        }
    }
}

/// A predicate that can force the loop to stop
pub trait TerminationCriterion: Send + Sync {
    fn name(&self) -> &str;

    /// `reflection` is None when checked before a cycle starts
    fn check(&self, run: &Run, reflection: Option<&ReflectionPayload>) -> Option<TerminationReason>;
}

/// Stops once the completed cycle count reaches `max`
#[derive(Debug, Clone, Copy)]
pub struct IterationLimit {
    pub max: u32,
}

impl TerminationCriterion for IterationLimit {
    fn name(&self) -> &str {
        "iteration_limit"
    }

    fn check(&self, run: &Run, _reflection: Option<&ReflectionPayload>) -> Option<TerminationReason> {
        (run.cycle >= self.max).then_some(TerminationReason::IterationLimit {
            cycle: run.cycle,
            max: self.max,
        })
    }
}

/// Stops once cumulative wall-clock time reaches `limit`
#[derive(Debug, Clone, Copy)]
pub struct TimeLimit {
    pub limit: Duration,
}

impl TimeLimit {
    pub fn minutes(minutes: u64) -> Self {
        Self {
            limit: Duration::from_secs(minutes * 60),
        }
    }
}

impl TerminationCriterion for TimeLimit {
    fn name(&self) -> &str {
        "time_limit"
    }

    fn check(&self, run: &Run, _reflection: Option<&ReflectionPayload>) -> Option<TerminationReason> {
        let elapsed = run.elapsed();
        (elapsed >= self.limit).then_some(TerminationReason::TimeLimit {
            elapsed,
            limit: self.limit,
        })
    }
}

/// Stops when the reflection explicitly marks the goal complete
#[derive(Debug, Clone, Copy, Default)]
pub struct GoalSatisfied;

impl TerminationCriterion for GoalSatisfied {
    fn name(&self) -> &str {
        "goal_satisfied"
    }

    fn check(&self, _run: &Run, reflection: Option<&ReflectionPayload>) -> Option<TerminationReason> {
        reflection
            .filter(|p| p.goal_satisfied())
            .map(|_| TerminationReason::GoalSatisfied)
    }
}

#[derive(Default)]
pub struct TerminationEngine {
    criteria: Vec<Box<dyn TerminationCriterion>>,
}

impl TerminationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Goal, iteration and time criteria, in that precedence
    pub fn standard(max_iterations: u32, time_limit: Duration) -> Self {
        Self::new()
            .with(GoalSatisfied)
            .with(IterationLimit { max: max_iterations })
            .with(TimeLimit { limit: time_limit })
    }

    pub fn with(mut self, criterion: impl TerminationCriterion + 'static) -> Self {
        self.criteria.push(Box::new(criterion));
        self
    }

    /// Evaluate every criterion and return all reasons that fired
    pub fn evaluate(&self, run: &Run, reflection: Option<&ReflectionPayload>) -> Vec<TerminationReason> {
        self.criteria
            .iter()
            .filter_map(|c| c.check(run, reflection))
            .collect()
    }

    /// The reason that decides the terminal status, if any fired
    pub fn first(&self, run: &Run, reflection: Option<&ReflectionPayload>) -> Option<TerminationReason> {
        self.evaluate(run, reflection).into_iter().next()
    }

    pub fn names(&self) -> Vec<&str> {
        self.criteria.iter().map(|c| c.name()).collect()
    }
}
