//! Plan validation and repair
//!
//! - `extract` locates the JSON object in free-form model output
//! - `PlanValidator` checks it against the plan contract
//! - `RepairLoop` drives bounded regeneration on repairable failures

mod extract;
mod plan_validator;
mod repair;

pub use extract::extract_json_object;
pub use plan_validator::PlanValidator;
pub use repair::{RepairLoop, RepairOutcome};

use crate::error::PlanloopError;
use crate::llm::LlmError;

/// Plan validation outcome other than an accepted plan
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// The candidate can be fixed by the model; carries every violation
    #[error("plan violates contract: {}", violations.join("; "))]
    Repairable { violations: Vec<String>, raw: String },

    /// Repair attempts exhausted, or no plan could ever validate
    #[error("plan rejected after {attempts} attempt(s): {}", violations.join("; "))]
    Fatal { attempts: u32, violations: Vec<String> },

    /// The model call itself failed
    #[error("model call failed: {0}")]
    Model(#[from] LlmError),

    /// A repair prompt could not be rendered
    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

impl From<PlanError> for PlanloopError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::Repairable { violations, .. } => PlanloopError::FatalPlan {
                attempts: 1,
                detail: violations.join("; "),
            },
            PlanError::Fatal { attempts, violations } => PlanloopError::FatalPlan {
                attempts,
                detail: violations.join("; "),
            },
            PlanError::Model(e) => PlanloopError::Llm(e.to_string()),
            PlanError::Prompt(msg) => PlanloopError::InvalidState(msg),
        }
    }
}
