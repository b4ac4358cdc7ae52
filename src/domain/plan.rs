//! Plan and Step records
//!
//! A Plan is accepted once per cycle by the plan validator and is never
//! mutated afterwards. Field names here are the wire contract the model
//! must produce.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// An accepted, validated plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    /// Ordered, non-empty list of steps
    pub steps: Vec<Step>,

    /// Free-text rationale for the plan as a whole
    pub rationale: String,
}

/// One planned action against a named capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Unique positive step number within the plan
    pub step_number: u32,

    /// Name of the capability to invoke
    pub capability: String,

    /// Capability-specific argument bundle
    pub arguments: Map<String, Value>,

    /// Human-readable description of the step
    pub description: String,

    /// Identifiers of supporting evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<u32>>,
}

impl Step {
    /// Create a step with no citations
    pub fn new(
        step_number: u32,
        capability: impl Into<String>,
        arguments: Map<String, Value>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            step_number,
            capability: capability.into(),
            arguments,
            description: description.into(),
            citations: None,
        }
    }

    /// Attach citation identifiers
    pub fn with_citations(mut self, citations: Vec<u32>) -> Self {
        self.citations = Some(citations);
        self
    }
}

impl Plan {
    /// Create a plan from steps and a rationale
    pub fn new(steps: Vec<Step>, rationale: impl Into<String>) -> Self {
        Self {
            steps,
            rationale: rationale.into(),
        }
    }

    /// Number of steps in the plan
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if the plan has no steps (never true for an accepted plan)
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Capability names in plan order
    pub fn capability_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.capability.as_str()).collect()
    }

    /// Serialize to the plan text contract
    pub fn to_json(&self) -> String {
        // Plan only holds JSON-representable data, serialization cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// SHA-256 hex digest of the canonical JSON form
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}
