//! Planloop - an autonomous plan/execute/reflect task loop
//!
//! A run takes a goal and cycles through planning, execution and reflection
//! until the goal is satisfied, a limit is reached, or an operator stops it.
//! Every executed step is checkpointed so an interrupted run can resume at the
//! last complete cycle.

pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod error;
pub mod id;
pub mod llm;
pub mod memory;
pub mod prompt;
pub mod reflect;
pub mod runner;
pub mod tools;
pub mod validation;

pub use error::{PlanloopError, Result};
