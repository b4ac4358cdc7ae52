//! Scripted language model for tests and dry runs
//!
//! Returns queued responses in order and records every prompt it was given.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::{LanguageModel, LlmError};

/// A prompt/context pair the scripted model received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub prompt: String,
    pub context: String,
}

/// Queue-backed model. Once the queue is empty it replays the fallback, if any.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    /// Create a model that answers with `responses` in order
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Response returned for every call after the queue runs dry
    pub fn with_fallback(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// Push another response onto the end of the queue
    pub fn push(&self, response: impl Into<String>) {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response.into());
        }
    }

    /// All calls received so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, LlmError> {
        let call = {
            let mut calls = self
                .calls
                .lock()
                .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
            calls.push(RecordedCall {
                prompt: prompt.to_string(),
                context: context.to_string(),
            });
            calls.len()
        };

        let next = self
            .responses
            .lock()
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?
            .pop_front();

        match next.or_else(|| self.fallback.clone()) {
            Some(response) => Ok(response),
            None => Err(LlmError::Exhausted { call }),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
