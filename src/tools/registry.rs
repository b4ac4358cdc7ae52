//! Capability registry
//!
//! Maps capability names to implementations. Built once at startup and
//! immutable afterwards, so an `Arc<CapabilityRegistry>` can be shared across
//! concurrent runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{PlanloopError, Result};

use super::calculator::Calculator;
use super::definition::{Capability, CapabilityError, CapabilityInfo};
use super::echo::Echo;
use super::files::{ListDir, ReadFile, Workspace, WriteFile};

#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in capability, file access confined to `workspace`
    pub fn with_builtins(workspace: impl AsRef<Path>, max_output_bytes: usize) -> Self {
        let ws = Arc::new(Workspace::new(workspace.as_ref()).with_max_output(max_output_bytes));
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn Capability>> = vec![
            Arc::new(Calculator),
            Arc::new(Echo),
            Arc::new(WriteFile::new(ws.clone())),
            Arc::new(ReadFile::new(ws.clone())),
            Arc::new(ListDir::new(ws)),
        ];
        for cap in builtins {
            registry
                .capabilities
                .insert(cap.name().to_string(), cap);
        }
        registry
    }

    /// Register a capability. Duplicate names are rejected.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Result<()> {
        let name = capability.name().to_string();
        if self.capabilities.contains_key(&name) {
            return Err(PlanloopError::Config(format!("capability '{}' registered twice", name)));
        }
        self.capabilities.insert(name, capability);
        Ok(())
    }

    /// Builder form of [`register`](Self::register)
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Result<Self> {
        self.register(capability)?;
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Catalogue for prompt rendering
    pub fn describe(&self) -> Vec<CapabilityInfo> {
        self.capabilities
            .values()
            .map(|c| CapabilityInfo {
                name: c.name().to_string(),
                description: c.description().to_string(),
                schema: c.argument_schema(),
            })
            .collect()
    }

    /// Invoke a capability by name
    pub async fn invoke(&self, name: &str, args: &Map<String, Value>) -> std::result::Result<Value, CapabilityError> {
        let capability = self.get(name).ok_or_else(|| CapabilityError::NotFound {
            name: name.to_string(),
        })?;
        capability.invoke(args).await
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .finish()
    }
}
