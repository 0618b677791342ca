//! Hypervisor Configuration Module
//!
//! Provides configuration loading for the hypervisor. Supports loading from TOML
//! files with environment variable overrides (`HYPERVISOR__SECTION__KEY`).

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Main hypervisor configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct HypervisorConfig {
    /// Scheduler settings
    pub scheduler: SchedulerSettings,

    /// Per-actor execution limits
    pub actors: ActorSettings,

    /// Logging output
    pub logging: LoggingSettings,
}

/// Scheduler settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Maximum number of messages executing at the same time
    pub workers: usize,
}

/// Per-actor execution limits
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ActorSettings {
    /// Longest causal chain of messages before an envelope is rejected
    pub max_hops: u32,

    /// Ticks a single message may consume; `None` is unlimited
    pub tick_budget: Option<u64>,

    /// Largest code chunk stored inline in one state record
    pub max_inline_code: usize,
}

/// Logging settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

impl Default for ActorSettings {
    fn default() -> Self {
        Self {
            max_hops: 64,
            tick_budget: None,
            max_inline_code: 65_533,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl HypervisorConfig {
    /// Load configuration from a TOML file with environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading hypervisor config: {:?}", path);

        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("HYPERVISOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let parsed: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse configuration from an in-memory TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?;

        let parsed: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Render back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.workers == 0 {
            bail!("scheduler.workers must be at least 1");
        }
        if self.actors.max_hops == 0 {
            bail!("actors.max_hops must be at least 1");
        }
        if self.actors.max_inline_code == 0 {
            bail!("actors.max_inline_code must be at least 1");
        }
        debug!(
            workers = self.scheduler.workers,
            max_hops = self.actors.max_hops,
            tick_budget = ?self.actors.tick_budget,
            "Configuration validated"
        );
        Ok(())
    }

    /// Builder-style override of the worker budget
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.scheduler.workers = workers;
        self
    }

    /// Builder-style override of the per-message tick budget
    pub fn with_tick_budget(mut self, budget: Option<u64>) -> Self {
        self.actors.tick_budget = budget;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = HypervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.actors.max_inline_code, 65_533);
        assert_eq!(config.actors.tick_budget, None);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("hypervisor.toml");

        let config_content = r#"
[scheduler]
workers = 2

[actors]
max_hops = 10
tick_budget = 500

[logging]
level = "debug"
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = HypervisorConfig::load(&config_path).unwrap();

        assert_eq!(config.scheduler.workers, 2);
        assert_eq!(config.actors.max_hops, 10);
        assert_eq!(config.actors.tick_budget, Some(500));
        assert_eq!(config.actors.max_inline_code, 65_533);
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(HypervisorConfig::load(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = HypervisorConfig::from_toml_str("[scheduler]\nworkers = 0\n").unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = HypervisorConfig::default()
            .with_workers(3)
            .with_tick_budget(Some(42));
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(HypervisorConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
