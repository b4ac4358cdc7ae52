//! Capabilities - named actions the executor can invoke, and their registry

mod calculator;
mod definition;
mod echo;
mod files;
mod registry;

pub use calculator::{Calculator, evaluate};
pub use definition::{Capability, CapabilityError, CapabilityInfo, required_str};
pub use echo::Echo;
pub use files::{DEFAULT_MAX_OUTPUT_BYTES, ListDir, ReadFile, Workspace, WriteFile};
pub use registry::CapabilityRegistry;
