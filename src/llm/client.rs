//! Language model trait and error types
//!
//! The loop treats the model as an opaque `generate(prompt, context) -> text`
//! call, used identically for plan generation, plan repair, and reflection.

use std::time::Duration;

use async_trait::async_trait;

/// Opaque text generator
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a response for `prompt`, with retrieved `context` supplied alongside
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, LlmError>;

    /// Model identifier for logging
    fn model(&self) -> &str;

    /// Tokens consumed so far, when the backend reports them
    fn usage(&self) -> Option<Usage> {
        None
    }
}

/// Cumulative token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Errors that can occur during model calls
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Script exhausted: no response queued for call {call}")]
    Exhausted { call: usize },
}
