//! Long-term memory collaborator
//!
//! `retrieve` supplies context for plan generation, `store` is called once
//! when a run finishes.

mod jsonl;

pub use jsonl::{JsonlMemory, MemoryEntry};

use async_trait::async_trait;

use crate::domain::Plan;
use crate::error::Result;

#[async_trait]
pub trait LongTermMemory: Send + Sync {
    /// Context relevant to `query`; empty when nothing matches
    async fn retrieve(&self, query: &str) -> Result<String>;

    /// Record a finished run
    async fn store(&self, goal: &str, plan: Option<&Plan>, reflection_summary: &str) -> Result<()>;
}

/// Memory that remembers nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMemory;

#[async_trait]
impl LongTermMemory for NullMemory {
    async fn retrieve(&self, _query: &str) -> Result<String> {
        Ok(String::new())
    }

    async fn store(&self, _goal: &str, _plan: Option<&Plan>, _reflection_summary: &str) -> Result<()> {
        Ok(())
    }
}
