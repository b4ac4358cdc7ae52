//! JSONL-backed long-term memory with in-memory caching.
//!
//! Each finished run appends one entry. Retrieval ranks entries by keyword
//! overlap between the query and the entry's goal and summaries.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::domain::Plan;
use crate::error::{PlanloopError, Result};
use crate::id::now_ms;

use super::LongTermMemory;

/// Default number of entries returned by `retrieve`
const DEFAULT_TOP_K: usize = 3;

/// One remembered run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub summary: String,
    pub created_at: i64,
}

impl MemoryEntry {
    fn render(&self) -> String {
        let mut out = format!("- Goal: {}\n", self.goal);
        if let Some(rationale) = &self.rationale {
            out.push_str(&format!("  Approach: {}\n", rationale));
        }
        if !self.capabilities.is_empty() {
            out.push_str(&format!("  Capabilities: {}\n", self.capabilities.join(", ")));
        }
        out.push_str(&format!("  Outcome: {}\n", self.summary));
        out
    }

    fn keywords(&self) -> HashSet<String> {
        let text = format!(
            "{} {} {}",
            self.goal,
            self.rationale.as_deref().unwrap_or(""),
            self.summary
        );
        keywords(&text)
    }
}

/// Lowercased alphanumeric words of three or more characters
fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

pub struct JsonlMemory {
    path: PathBuf,
    top_k: usize,
    cache: RwLock<Option<Vec<MemoryEntry>>>,
}

impl JsonlMemory {
    /// Memory file at `path`; the file is created on first store
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            top_k: DEFAULT_TOP_K,
            cache: RwLock::new(None),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    /// Load entries into cache if not already loaded
    fn entries(&self) -> Result<Vec<MemoryEntry>> {
        {
            let cache = self.cache.read().map_err(|e| PlanloopError::Persistence(e.to_string()))?;
            if let Some(entries) = cache.as_ref() {
                return Ok(entries.clone());
            }
        }

        let mut entries = Vec::new();
        if self.path.exists() {
            let reader = BufReader::new(File::open(&self.path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<MemoryEntry>(&line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!("JsonlMemory: skipping line {} of {}: {}", lineno + 1, self.path.display(), e),
                }
            }
        }

        let mut cache = self.cache.write().map_err(|e| PlanloopError::Persistence(e.to_string()))?;
        *cache = Some(entries.clone());
        Ok(entries)
    }

    fn append(&self, entry: &MemoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;

        let mut cache = self.cache.write().map_err(|e| PlanloopError::Persistence(e.to_string()))?;
        if let Some(entries) = cache.as_mut() {
            entries.push(entry.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl LongTermMemory for JsonlMemory {
    async fn retrieve(&self, query: &str) -> Result<String> {
        let query_words = keywords(query);
        if query_words.is_empty() {
            return Ok(String::new());
        }

        let mut scored: Vec<(usize, MemoryEntry)> = self
            .entries()?
            .into_iter()
            .map(|entry| (entry.keywords().intersection(&query_words).count(), entry))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Best overlap first, newest first among ties
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.created_at.cmp(&a.1.created_at)));
        scored.truncate(self.top_k);

        debug!("JsonlMemory: {} entr(ies) matched query", scored.len());
        Ok(scored.iter().map(|(_, e)| e.render()).collect::<Vec<_>>().join(""))
    }

    async fn store(&self, goal: &str, plan: Option<&Plan>, reflection_summary: &str) -> Result<()> {
        let entry = MemoryEntry {
            goal: goal.to_string(),
            rationale: plan.map(|p| p.rationale.clone()),
            capabilities: plan
                .map(|p| p.capability_names().into_iter().map(String::from).collect())
                .unwrap_or_default(),
            summary: reflection_summary.to_string(),
            created_at: now_ms(),
        };
        self.append(&entry)
    }
}
