//! Domain types for Planloop
//!
//! This module contains the core records the loop passes between phases:
//! - Run: one invocation of the loop for a single goal
//! - Plan / Step: the structured multi-step plan produced each cycle
//! - ExecutionResult: per-step outcome captured by the executor
//! - ReflectionRecord: per-cycle continue/finish assessment

pub mod outcome;
pub mod plan;
pub mod reflection;
pub mod run;

pub use outcome::ExecutionResult;
pub use plan::{Plan, Step};
pub use reflection::{ReflectionDecision, ReflectionPayload, ReflectionRecord};
pub use run::{CycleRecord, Run, RunStatus, RunSummary};
