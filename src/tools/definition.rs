//! Capability trait and error types
//!
//! A capability is a named, externally implemented action the executor can
//! invoke with an argument bundle. The loop never inspects argument contents;
//! each capability validates its own arguments.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

/// A named action with a declared argument schema
#[async_trait]
pub trait Capability: Send + Sync {
    /// Registry name (matches the plan's `capability` field)
    fn name(&self) -> &str;

    /// Human-readable description for the planning prompt
    fn description(&self) -> &str;

    /// JSON schema for the argument bundle
    fn argument_schema(&self) -> Value;

    /// Run the capability
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value, CapabilityError>;
}

/// Catalogue entry rendered into prompts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityInfo {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Errors a capability invocation can produce
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability not found: {name}")]
    NotFound { name: String },

    #[error("invalid arguments: {message}")]
    InvalidArguments { message: String },

    #[error("path {path} escapes workspace {root}")]
    SandboxViolation { path: PathBuf, root: PathBuf },

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("{0}")]
    Failed(String),
}

impl CapabilityError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }

    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

/// Fetch a required string argument
pub fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, CapabilityError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::invalid(format!("'{}' must be a string", key)))
}
