//! Language model layer
//!
//! This module provides:
//! - LanguageModel trait, the opaque `generate(prompt, context)` collaborator
//! - AnthropicModel implementation over the Messages API
//! - ScriptedModel for deterministic tests and dry runs

pub mod anthropic;
pub mod client;
pub mod scripted;

pub use anthropic::{AnthropicConfig, AnthropicModel};
pub use client::{LanguageModel, LlmError, Usage};
pub use scripted::{RecordedCall, ScriptedModel};
