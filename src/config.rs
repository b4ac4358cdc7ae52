//! Configuration for Planloop.
//!
//! YAML file with one section per concern; every field has a default so a
//! partial file (or none at all) is valid. Search order:
//! 1. Explicit path if provided
//! 2. ./planloop.yml
//! 3. ~/.config/planloop/planloop.yml
//! 4. Default values
//!
//! Command-line overrides are applied on top with [`Config::apply`].

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::PlanloopError;
use crate::llm::AnthropicConfig;
use crate::runner::LoopSettings;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    #[serde(rename = "loop")]
    pub run_loop: LoopConfig,
    pub storage: StorageConfig,
    pub llm: LlmConfig,
    pub capabilities: CapabilitiesConfig,
    /// Directory with `plan.hbs`, `repair.hbs` or `reflect.hbs` overrides
    pub prompts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub time_limit_minutes: u64,
    pub max_plan_attempts: u32,
    pub reflection_failure_threshold: u32,
    pub reflection_history_limit: usize,
    pub human_checkpoint_interval: u32,
    pub human_checkpoint_enabled: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            time_limit_minutes: 10,
            max_plan_attempts: 3,
            reflection_failure_threshold: 3,
            reflection_history_limit: 10,
            human_checkpoint_interval: 5,
            human_checkpoint_enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite checkpoint database
    pub db_path: PathBuf,
    /// JSONL long-term memory file
    pub memory_path: PathBuf,
    /// When false, checkpoints are kept in memory only
    pub enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("planloop");
        Self {
            db_path: base.join("checkpoints.db"),
            memory_path: base.join("memory.jsonl"),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let anthropic = AnthropicConfig::default();
        Self {
            model: anthropic.model,
            max_tokens: anthropic.max_tokens,
            timeout_ms: anthropic.timeout.as_millis() as u64,
            api_key_env: anthropic.api_key_env,
        }
    }
}

impl LlmConfig {
    pub fn anthropic(&self) -> AnthropicConfig {
        AnthropicConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            timeout: Duration::from_millis(self.timeout_ms),
            api_key_env: self.api_key_env.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// Root directory the file capabilities are confined to
    pub workspace: PathBuf,
    pub max_output_bytes: usize,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            max_output_bytes: crate::tools::DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Per-invocation overrides from the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub max_iterations: Option<u32>,
    pub time_limit_minutes: Option<u64>,
    pub checkpoint_interval: Option<u32>,
    pub no_checkpoint: bool,
    pub no_human_checkpoint: bool,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");
        let local_config = PathBuf::from(format!("{}.yml", project_name));
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => log::warn!("Failed to load config from {}: {}", local_config.display(), e),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => log::warn!("Failed to load config from {}: {}", user_config.display(), e),
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Apply command-line overrides
    pub fn apply(&mut self, overrides: &RunOverrides) {
        if let Some(n) = overrides.max_iterations {
            self.run_loop.max_iterations = n;
        }
        if let Some(minutes) = overrides.time_limit_minutes {
            self.run_loop.time_limit_minutes = minutes;
        }
        if let Some(interval) = overrides.checkpoint_interval {
            self.run_loop.human_checkpoint_interval = interval;
        }
        if overrides.no_checkpoint {
            self.storage.enabled = false;
        }
        if overrides.no_human_checkpoint {
            self.run_loop.human_checkpoint_enabled = false;
        }
    }

    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> std::result::Result<(), PlanloopError> {
        let l = &self.run_loop;
        if l.max_plan_attempts == 0 {
            return Err(PlanloopError::Config("loop.max_plan_attempts must be at least 1".into()));
        }
        if l.reflection_failure_threshold == 0 {
            return Err(PlanloopError::Config(
                "loop.reflection_failure_threshold must be at least 1".into(),
            ));
        }
        if l.human_checkpoint_enabled && l.human_checkpoint_interval == 0 {
            return Err(PlanloopError::Config(
                "loop.human_checkpoint_interval must be at least 1 when checkpoints are enabled".into(),
            ));
        }
        if self.llm.max_tokens == 0 {
            return Err(PlanloopError::Config("llm.max_tokens must be at least 1".into()));
        }
        if self.capabilities.max_output_bytes == 0 {
            return Err(PlanloopError::Config("capabilities.max_output_bytes must be at least 1".into()));
        }
        Ok(())
    }

    pub fn loop_settings(&self) -> LoopSettings {
        let l = &self.run_loop;
        LoopSettings {
            max_iterations: l.max_iterations,
            time_limit: Duration::from_secs(l.time_limit_minutes.saturating_mul(60)),
            max_plan_attempts: l.max_plan_attempts,
            reflection_failure_threshold: l.reflection_failure_threshold,
            reflection_history_limit: l.reflection_history_limit,
            human_checkpoint_interval: l.human_checkpoint_interval,
            human_checkpoint_enabled: l.human_checkpoint_enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.run_loop.max_iterations, 25);
        assert_eq!(config.run_loop.time_limit_minutes, 10);
        assert_eq!(config.run_loop.max_plan_attempts, 3);
        assert!(config.storage.enabled);
        assert!(config.validate().is_ok());
        assert_eq!(config.loop_settings(), LoopSettings::default());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("planloop.yml");
        fs::write(
            &path,
            "loop:\n  max_iterations: 3\n  human_checkpoint_enabled: false\nllm:\n  model: claude-haiku\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.run_loop.max_iterations, 3);
        assert!(!config.run_loop.human_checkpoint_enabled);
        assert_eq!(config.run_loop.time_limit_minutes, 10);
        assert_eq!(config.llm.model, "claude-haiku");
        assert_eq!(config.llm.max_tokens, 4096);
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("absent.yml"))).is_err());
    }

    #[test]
    fn test_invalid_yaml_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.yml");
        fs::write(&path, "loop: [not, a, map]").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        config.apply(&RunOverrides {
            max_iterations: Some(1),
            time_limit_minutes: Some(0),
            checkpoint_interval: Some(2),
            no_checkpoint: true,
            no_human_checkpoint: true,
        });
        assert_eq!(config.run_loop.max_iterations, 1);
        assert_eq!(config.run_loop.human_checkpoint_interval, 2);
        assert!(!config.storage.enabled);
        let settings = config.loop_settings();
        assert_eq!(settings.time_limit, Duration::ZERO);
        assert!(!settings.human_checkpoint_enabled);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        config.run_loop.max_plan_attempts = 0;
        assert!(matches!(config.validate(), Err(PlanloopError::Config(_))));

        let mut config = Config::default();
        config.run_loop.reflection_failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.run_loop.human_checkpoint_interval = 0;
        assert!(config.validate().is_err());
        config.run_loop.human_checkpoint_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_llm_config_to_anthropic() {
        let config = LlmConfig {
            timeout_ms: 1500,
            ..Default::default()
        };
        assert_eq!(config.anthropic().timeout, Duration::from_millis(1500));
    }
}
