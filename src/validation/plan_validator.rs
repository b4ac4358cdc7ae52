//! Structural plan validation
//!
//! Walks the candidate JSON and collects every violated constraint, so a
//! repair prompt can list them all at once rather than one per round trip.

use std::collections::{BTreeSet, HashSet};

use serde_json::{Map, Value};

use crate::domain::Plan;
use crate::tools::CapabilityRegistry;

use super::PlanError;
use super::extract::extract_json_object;

const PLAN_FIELDS: &[&str] = &["steps", "rationale"];
const STEP_FIELDS: &[&str] = &["step_number", "capability", "arguments", "description", "citations"];

/// Validates candidate plan text against the plan contract
#[derive(Debug, Clone)]
pub struct PlanValidator {
    capabilities: BTreeSet<String>,
}

impl PlanValidator {
    /// Validator accepting exactly the given capability names
    pub fn new<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    /// Snapshot the names of a registry
    pub fn from_registry(registry: &CapabilityRegistry) -> Self {
        Self::new(registry.names())
    }

    /// Validate candidate text.
    ///
    /// Returns `Repairable` with the full list of violations when the text can
    /// be fixed by the model, and `Fatal` when no plan could ever pass (an
    /// empty capability registry).
    pub fn validate(&self, candidate: &str) -> Result<Plan, PlanError> {
        if self.capabilities.is_empty() {
            return Err(PlanError::Fatal {
                attempts: 0,
                violations: vec!["no capabilities are registered".to_string()],
            });
        }

        let repairable = |violations: Vec<String>| PlanError::Repairable {
            violations,
            raw: candidate.to_string(),
        };

        let Some(json) = extract_json_object(candidate) else {
            return Err(repairable(vec!["response does not contain a JSON object".to_string()]));
        };

        let value: Value = serde_json::from_str(json)
            .map_err(|e| repairable(vec![format!("invalid JSON: {}", e)]))?;

        let violations = self.check(&value);
        if !violations.is_empty() {
            return Err(repairable(violations));
        }

        serde_json::from_value(value).map_err(|e| repairable(vec![format!("plan does not match contract: {}", e)]))
    }

    /// Collect every violation in `value`
    fn check(&self, value: &Value) -> Vec<String> {
        let mut violations = Vec::new();
        let Some(obj) = value.as_object() else {
            violations.push("plan must be a JSON object".to_string());
            return violations;
        };

        unknown_fields(obj, PLAN_FIELDS, "plan", &mut violations);

        match obj.get("rationale") {
            Some(Value::String(_)) => {}
            Some(_) => violations.push("'rationale' must be a string".to_string()),
            None => violations.push("missing required field 'rationale'".to_string()),
        }

        match obj.get("steps") {
            Some(Value::Array(steps)) if steps.is_empty() => {
                violations.push("plan must contain at least one step".to_string());
            }
            Some(Value::Array(steps)) => {
                let mut seen = HashSet::new();
                for (index, step) in steps.iter().enumerate() {
                    self.check_step(index, step, &mut seen, &mut violations);
                }
            }
            Some(_) => violations.push("'steps' must be an array".to_string()),
            None => violations.push("missing required field 'steps'".to_string()),
        }

        violations
    }

    fn check_step(&self, index: usize, step: &Value, seen: &mut HashSet<u64>, violations: &mut Vec<String>) {
        let label = format!("step[{}]", index);
        let Some(obj) = step.as_object() else {
            violations.push(format!("{} must be an object", label));
            return;
        };

        unknown_fields(obj, STEP_FIELDS, &label, violations);

        match obj.get("step_number") {
            Some(n) => match n.as_u64() {
                Some(n) if n > 0 && n <= u32::MAX as u64 => {
                    if !seen.insert(n) {
                        violations.push(format!("{}: duplicate step_number {}", label, n));
                    }
                }
                _ => violations.push(format!("{}: step_number must be a positive integer, got {}", label, n)),
            },
            None => violations.push(format!("{}: missing required field 'step_number'", label)),
        }

        match obj.get("capability") {
            Some(Value::String(name)) if self.capabilities.contains(name) => {}
            Some(Value::String(name)) => violations.push(format!(
                "{}: unknown capability '{}' (available: {})",
                label,
                name,
                self.capabilities.iter().cloned().collect::<Vec<_>>().join(", ")
            )),
            Some(_) => violations.push(format!("{}: capability must be a string", label)),
            None => violations.push(format!("{}: missing required field 'capability'", label)),
        }

        match obj.get("arguments") {
            Some(Value::Object(_)) => {}
            Some(_) => violations.push(format!("{}: arguments must be an object", label)),
            None => violations.push(format!("{}: missing required field 'arguments'", label)),
        }

        match obj.get("description") {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) => violations.push(format!("{}: description must not be empty", label)),
            Some(_) => violations.push(format!("{}: description must be a string", label)),
            None => violations.push(format!("{}: missing required field 'description'", label)),
        }

        match obj.get("citations") {
            None | Some(Value::Null) => {}
            Some(Value::Array(ids)) => {
                for id in ids {
                    if !matches!(id.as_u64(), Some(n) if n > 0 && n <= u32::MAX as u64) {
                        violations.push(format!("{}: citation {} must be a positive integer", label, id));
                    }
                }
            }
            Some(_) => violations.push(format!("{}: citations must be an array", label)),
        }
    }
}

fn unknown_fields(obj: &Map<String, Value>, allowed: &[&str], label: &str, violations: &mut Vec<String>) {
    for key in obj.keys() {
        if !allowed.contains(&key.as_str()) {
            violations.push(format!("{}: unknown field '{}'", label, key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PlanValidator {
        PlanValidator::new(["calculator", "write_file"])
    }

    fn violations(text: &str) -> Vec<String> {
        match validator().validate(text) {
            Err(PlanError::Repairable { violations, .. }) => violations,
            other => panic!("expected repairable error, got {:?}", other),
        }
    }

    const VALID: &str = r#"{
        "steps": [
            {"step_number": 1, "capability": "calculator", "arguments": {"expression": "23*7+11"}, "description": "compute"},
            {"step_number": 2, "capability": "write_file", "arguments": {"path": "result.txt", "content": "172"}, "description": "save", "citations": [1]}
        ],
        "rationale": "compute then save"
    }"#;

    #[test]
    fn test_valid_plan_accepted() {
        let plan = validator().validate(VALID).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.capability_names(), vec!["calculator", "write_file"]);
        assert_eq!(plan.steps[1].citations, Some(vec![1]));
    }

    #[test]
    fn test_valid_plan_in_fence() {
        let text = format!("Sure!\n```json\n{}\n```", VALID);
        assert!(validator().validate(&text).is_ok());
    }

    #[test]
    fn test_no_json() {
        assert_eq!(violations("I cannot plan this"), vec!["response does not contain a JSON object"]);
    }

    #[test]
    fn test_invalid_json() {
        let v = violations(r#"{"steps": [,]}"#);
        assert!(v[0].starts_with("invalid JSON"));
    }

    #[test]
    fn test_empty_plan() {
        let v = violations(r#"{"steps": [], "rationale": "nothing"}"#);
        assert_eq!(v, vec!["plan must contain at least one step"]);
    }

    #[test]
    fn test_unknown_fields_rejected_at_both_levels() {
        let v = violations(
            r#"{"steps": [{"step_number": 1, "capability": "calculator", "arguments": {}, "description": "d", "priority": 1}],
                "rationale": "r", "confidence": 0.9}"#,
        );
        assert!(v.contains(&"plan: unknown field 'confidence'".to_string()));
        assert!(v.contains(&"step[0]: unknown field 'priority'".to_string()));
    }

    #[test]
    fn test_unknown_capability() {
        let v = violations(
            r#"{"steps": [{"step_number": 1, "capability": "http_fetch", "arguments": {}, "description": "d"}], "rationale": "r"}"#,
        );
        assert_eq!(v.len(), 1);
        assert!(v[0].contains("unknown capability 'http_fetch'"));
        assert!(v[0].contains("calculator, write_file"));
    }

    #[test]
    fn test_duplicate_and_nonpositive_step_numbers() {
        let v = violations(
            r#"{"steps": [
                {"step_number": 1, "capability": "calculator", "arguments": {}, "description": "a"},
                {"step_number": 1, "capability": "calculator", "arguments": {}, "description": "b"},
                {"step_number": 0, "capability": "calculator", "arguments": {}, "description": "c"}
            ], "rationale": "r"}"#,
        );
        assert!(v.contains(&"step[1]: duplicate step_number 1".to_string()));
        assert!(v.iter().any(|m| m.starts_with("step[2]: step_number must be a positive integer")));
    }

    #[test]
    fn test_non_sequential_step_numbers_allowed() {
        let text = r#"{"steps": [
            {"step_number": 10, "capability": "calculator", "arguments": {}, "description": "a"},
            {"step_number": 3, "capability": "calculator", "arguments": {}, "description": "b"}
        ], "rationale": "r"}"#;
        assert!(validator().validate(text).is_ok());
    }

    #[test]
    fn test_missing_fields_all_reported() {
        let v = violations(r#"{"steps": [{"step_number": 1}]}"#);
        assert!(v.contains(&"missing required field 'rationale'".to_string()));
        assert!(v.contains(&"step[0]: missing required field 'capability'".to_string()));
        assert!(v.contains(&"step[0]: missing required field 'arguments'".to_string()));
        assert!(v.contains(&"step[0]: missing required field 'description'".to_string()));
    }

    #[test]
    fn test_bad_citations() {
        let v = violations(
            r#"{"steps": [{"step_number": 1, "capability": "calculator", "arguments": {}, "description": "d", "citations": [1, -2, "x"]}], "rationale": "r"}"#,
        );
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn test_arguments_must_be_object() {
        let v = violations(
            r#"{"steps": [{"step_number": 1, "capability": "calculator", "arguments": "23*7", "description": "d"}], "rationale": "r"}"#,
        );
        assert_eq!(v, vec!["step[0]: arguments must be an object"]);
    }

    #[test]
    fn test_empty_registry_is_fatal() {
        let err = PlanValidator::new(Vec::<String>::new()).validate(VALID).unwrap_err();
        assert!(matches!(err, PlanError::Fatal { .. }));
    }

    #[test]
    fn test_round_trip() {
        let plan = validator().validate(VALID).unwrap();
        let again = validator().validate(&plan.to_json()).unwrap();
        assert_eq!(again.len(), plan.len());
        assert_eq!(again.capability_names(), plan.capability_names());
        assert_eq!(again, plan);
    }
}
