//! Bounded plan repair loop
//!
//! Wraps the model call: generate, validate, and on a repairable failure
//! regenerate from a repair prompt naming the violations. The attempt counter
//! counts every generation including the first.

use log::{debug, warn};

use crate::domain::Plan;
use crate::llm::LanguageModel;

use super::PlanError;
use super::plan_validator::PlanValidator;

/// An accepted plan and the number of generations it took
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub plan: Plan,
    pub attempts: u32,
}

impl RepairOutcome {
    /// Generations beyond the first
    pub fn repairs(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

pub struct RepairLoop<'a> {
    validator: &'a PlanValidator,
    max_attempts: u32,
}

impl<'a> RepairLoop<'a> {
    /// `max_attempts` is clamped to at least one generation
    pub fn new(validator: &'a PlanValidator, max_attempts: u32) -> Self {
        Self {
            validator,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Generate a plan, repairing until it validates or attempts run out.
    ///
    /// `repair_prompt` builds the follow-up prompt from the rejected text and
    /// its violations.
    pub async fn run<F>(
        &self,
        model: &dyn LanguageModel,
        prompt: &str,
        context: &str,
        repair_prompt: F,
    ) -> Result<RepairOutcome, PlanError>
    where
        F: Fn(&str, &[String]) -> Result<String, PlanError>,
    {
        let mut attempts = 0u32;
        let mut current = prompt.to_string();

        loop {
            attempts += 1;
            debug!("RepairLoop: generation attempt {}/{}", attempts, self.max_attempts);
            let text = model.generate(&current, context).await?;

            match self.validator.validate(&text) {
                Ok(plan) => {
                    debug!("RepairLoop: plan accepted with {} step(s) after {} attempt(s)", plan.len(), attempts);
                    return Ok(RepairOutcome { plan, attempts });
                }
                Err(PlanError::Repairable { violations, raw }) => {
                    warn!(
                        "RepairLoop: attempt {} rejected with {} violation(s): {}",
                        attempts,
                        violations.len(),
                        violations.join("; ")
                    );
                    if attempts >= self.max_attempts {
                        return Err(PlanError::Fatal { attempts, violations });
                    }
                    current = repair_prompt(&raw, &violations)?;
                }
                Err(PlanError::Fatal { violations, .. }) => {
                    return Err(PlanError::Fatal { attempts, violations });
                }
                Err(other) => return Err(other),
            }
        }
    }
}
