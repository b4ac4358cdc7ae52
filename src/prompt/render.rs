//! Prompt Renderer - render plan, repair and reflection prompts with Handlebars
//!
//! Templates are registered by name at construction. A template directory may
//! override any of them with a `<name>.hbs` file.

use std::path::Path;

use handlebars::Handlebars;
use log::debug;
use serde::Serialize;

use crate::domain::{CycleRecord, ExecutionResult, Plan, Run};
use crate::error::{PlanloopError, Result};
use crate::tools::CapabilityInfo;

use super::templates;

/// Characters of each step result shown in prompts
const PREVIEW_CHARS: usize = 200;

/// Previous cycles included in the planning prompt
const HISTORY_WINDOW: usize = 3;

pub const PLAN_TEMPLATE: &str = "plan";
pub const REPAIR_TEMPLATE: &str = "repair";
pub const REFLECT_TEMPLATE: &str = "reflect";

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityView {
    pub name: String,
    pub description: String,
    pub schema: String,
}

impl From<&CapabilityInfo> for CapabilityView {
    fn from(info: &CapabilityInfo) -> Self {
        Self {
            name: info.name.clone(),
            description: info.description.clone(),
            schema: serde_json::to_string_pretty(&info.schema).unwrap_or_else(|_| info.schema.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultView {
    pub step_number: u32,
    pub capability: String,
    pub success: bool,
    pub preview: String,
}

impl From<&ExecutionResult> for ResultView {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            step_number: result.step_number,
            capability: result.capability.clone(),
            success: result.success,
            preview: result.preview(PREVIEW_CHARS),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleView {
    pub cycle: u32,
    pub rationale: String,
    pub results: Vec<ResultView>,
    pub summary: Option<String>,
}

impl From<&CycleRecord> for CycleView {
    fn from(record: &CycleRecord) -> Self {
        Self {
            cycle: record.cycle,
            rationale: record.plan.rationale.clone(),
            results: record.results.iter().map(ResultView::from).collect(),
            summary: record
                .reflection
                .as_ref()
                .and_then(|r| r.payload.summary.clone()),
        }
    }
}

/// Data for the planning prompt
#[derive(Debug, Clone, Serialize)]
pub struct PlanContext {
    pub goal: String,
    pub cycle: u32,
    pub max_iterations: u32,
    pub capabilities: Vec<CapabilityView>,
    pub history: Vec<CycleView>,
}

impl PlanContext {
    /// Context for planning the run's next cycle
    pub fn for_run(run: &Run, capabilities: &[CapabilityInfo], max_iterations: u32) -> Self {
        let skip = run.history.len().saturating_sub(HISTORY_WINDOW);
        Self {
            goal: run.goal.clone(),
            cycle: run.cycle + 1,
            max_iterations,
            capabilities: capabilities.iter().map(CapabilityView::from).collect(),
            history: run.history.iter().skip(skip).map(CycleView::from).collect(),
        }
    }
}

/// Data for the repair prompt
#[derive(Debug, Clone, Serialize)]
pub struct RepairContext {
    pub goal: String,
    pub raw: String,
    pub violations: Vec<String>,
    pub capabilities: Vec<CapabilityView>,
}

impl RepairContext {
    pub fn new(goal: &str, raw: &str, violations: &[String], capabilities: &[CapabilityInfo]) -> Self {
        Self {
            goal: goal.to_string(),
            raw: raw.to_string(),
            violations: violations.to_vec(),
            capabilities: capabilities.iter().map(CapabilityView::from).collect(),
        }
    }
}

/// Data for the reflection prompt
#[derive(Debug, Clone, Serialize)]
pub struct ReflectContext {
    pub goal: String,
    pub cycle: u32,
    pub rationale: String,
    pub results: Vec<ResultView>,
    pub succeeded: usize,
    pub failed: usize,
    pub repairs: u32,
}

impl ReflectContext {
    pub fn new(goal: &str, cycle: u32, plan: &Plan, results: &[ExecutionResult], repairs: u32) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            goal: goal.to_string(),
            cycle,
            rationale: plan.rationale.clone(),
            results: results.iter().map(ResultView::from).collect(),
            succeeded,
            failed: results.len() - succeeded,
            repairs,
        }
    }
}

/// Renders prompt templates using Handlebars templating
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl PromptRenderer {
    /// Renderer with the built-in templates registered
    pub fn new() -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are plain text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        let mut renderer = Self { handlebars };
        renderer.register_template(PLAN_TEMPLATE, templates::PLAN)?;
        renderer.register_template(REPAIR_TEMPLATE, templates::REPAIR)?;
        renderer.register_template(REFLECT_TEMPLATE, templates::REFLECT)?;
        Ok(renderer)
    }

    /// Replace built-in templates with `<name>.hbs` files found in `dir`
    pub fn with_overrides(mut self, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        for name in [PLAN_TEMPLATE, REPAIR_TEMPLATE, REFLECT_TEMPLATE] {
            let path = dir.join(format!("{}.hbs", name));
            if path.is_file() {
                let template = std::fs::read_to_string(&path)?;
                self.register_template(name, &template)?;
                debug!("PromptRenderer: overriding '{}' from {}", name, path.display());
            }
        }
        Ok(self)
    }

    /// Register a named template for later use
    pub fn register_template(&mut self, name: &str, template: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, template)
            .map_err(|e| PlanloopError::Config(format!("Failed to register template '{}': {}", name, e)))
    }

    /// Render a registered template with any serializable context
    pub fn render<T: Serialize>(&self, name: &str, context: &T) -> Result<String> {
        self.handlebars
            .render(name, context)
            .map_err(|e| PlanloopError::InvalidState(format!("Failed to render template '{}': {}", name, e)))
    }

    pub fn plan(&self, context: &PlanContext) -> Result<String> {
        self.render(PLAN_TEMPLATE, context)
    }

    pub fn repair(&self, context: &RepairContext) -> Result<String> {
        self.render(REPAIR_TEMPLATE, context)
    }

    pub fn reflect(&self, context: &ReflectContext) -> Result<String> {
        self.render(REFLECT_TEMPLATE, context)
    }

    /// Check if a named template is registered
    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.get_template(name).is_some()
    }
}
