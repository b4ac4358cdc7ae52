//! Per-step execution outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of executing one plan step. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Step number this result belongs to
    pub step_number: u32,

    /// Capability that was (or would have been) invoked
    pub capability: String,

    /// Whether the capability reported success
    pub success: bool,

    /// Returned value on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Error detail on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Wall-clock duration of the invocation
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(step_number: u32, capability: impl Into<String>, value: Value, duration_ms: u64) -> Self {
        Self {
            step_number,
            capability: capability.into(),
            success: true,
            value: Some(value),
            error: None,
            duration_ms,
        }
    }

    /// Create a failed result
    pub fn failure(
        step_number: u32,
        capability: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            step_number,
            capability: capability.into(),
            success: false,
            value: None,
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// Short one-line rendering of the value or error
    pub fn preview(&self, max_chars: usize) -> String {
        let text = match (&self.value, &self.error) {
            (Some(Value::String(s)), _) => s.clone(),
            (Some(v), _) => v.to_string(),
            (None, Some(e)) => e.clone(),
            (None, None) => String::new(),
        };
        if text.chars().count() > max_chars {
            let truncated: String = text.chars().take(max_chars).collect();
            format!("{}...", truncated)
        } else {
            text
        }
    }
}
