//! Reflection payload and per-cycle reflection record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The model's own continue/finish preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReflectionDecision {
    Continue,
    Finish,
}

/// Strict shape of the model's reflection response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReflectionPayload {
    pub decision: ReflectionDecision,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_satisfied: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ReflectionPayload {
    /// Payload used when the model's response could not be parsed
    pub fn fallback_continue() -> Self {
        Self {
            decision: ReflectionDecision::Continue,
            goal_satisfied: None,
            summary: None,
        }
    }

    /// True only when the model explicitly marked the goal complete
    pub fn goal_satisfied(&self) -> bool {
        self.goal_satisfied.unwrap_or(false)
    }
}

/// Per-cycle reflection summary, appended to run history and never deleted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionRecord {
    /// Cycle this record belongs to (1-based)
    pub cycle: u32,

    /// Parsed payload, or the continue fallback if parsing failed
    pub payload: ReflectionPayload,

    /// Parse error for this cycle, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,

    /// Running count of reflection parse failures in this run
    pub failure_count: u32,

    pub timestamp: DateTime<Utc>,
}

impl ReflectionRecord {
    /// Record for a successfully parsed reflection
    pub fn parsed(cycle: u32, payload: ReflectionPayload, failure_count: u32) -> Self {
        Self {
            cycle,
            payload,
            parse_error: None,
            failure_count,
            timestamp: Utc::now(),
        }
    }

    /// Record for a reflection whose response failed to parse
    pub fn parse_failed(cycle: u32, error: impl Into<String>, failure_count: u32) -> Self {
        Self {
            cycle,
            payload: ReflectionPayload::fallback_continue(),
            parse_error: Some(error.into()),
            failure_count,
            timestamp: Utc::now(),
        }
    }

    pub fn is_parse_failure(&self) -> bool {
        self.parse_error.is_some()
    }
}
