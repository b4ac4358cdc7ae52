//! Loop runner module - drives the Plan -> Execute -> Reflect cycle.
//!
//! This module provides:
//! - LoopController, the per-run state machine
//! - Executor, sequential step dispatch against the capability registry

mod controller;
mod executor;

pub use controller::{LoopController, LoopSettings};
pub use executor::{CANCELLED_ERROR, Executor};
