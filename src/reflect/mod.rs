//! Reflection, termination criteria and the human checkpoint gate

mod human;
mod reflector;
mod termination;

pub use human::{AutoApprove, ConsoleGate, GateDecision, HumanGate};
pub use reflector::{CycleDecision, Reflector, ReflectorPolicy, parse_reflection};
pub use termination::{
    GoalSatisfied, IterationLimit, TerminationCriterion, TerminationEngine, TerminationReason, TimeLimit,
};
