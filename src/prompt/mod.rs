//! Prompt System - Handlebars templates for planning, repair and reflection

mod render;
mod templates;

pub use render::{
    CapabilityView, CycleView, PLAN_TEMPLATE, PlanContext, PromptRenderer, REFLECT_TEMPLATE, REPAIR_TEMPLATE,
    ReflectContext, RepairContext, ResultView,
};
