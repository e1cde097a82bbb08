//! Configuration management
//!
//! Handles TOML configuration parsing and validation. Missing sections and
//! keys fall back to defaults, so an empty file is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    APP_NAME, CONFIG_FILE_NAME, DEFAULT_LOG_LEVEL, DEFAULT_MONITOR_COMMAND, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_RESTART_DELAY_MS, DEFAULT_SHELL, QUEUE_CAPACITY_MAX, RESTART_DELAY_MAX_MS,
};
use crate::filters::validate_filters;
use crate::logging::validate_level;
use crate::models::ConfigError;
use crate::monitor::MonitorSettings;
use crate::process::LaunchOptions;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub monitor: MonitorSection,
    pub output: OutputSection,
    pub logging: LoggingSection,
}

/// What to supervise and whether to relaunch it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSection {
    pub command: String,
    pub shell: String,
    pub privileged: bool,
    /// Relaunch the monitor after it exits (0-600000ms delay)
    pub restart: bool,
    pub restart_delay_ms: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            command: DEFAULT_MONITOR_COMMAND.to_string(),
            shell: DEFAULT_SHELL.to_string(),
            privileged: false,
            restart: false,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub json: bool,
    pub quiet: bool,
    /// Glob patterns on object path or device path (empty = all)
    pub filters: Vec<String>,
    /// Events buffered between the monitor and stdout (1-65536)
    pub queue_capacity: usize,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            json: false,
            quiet: false,
            filters: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Configuration {
    /// Per-user config location, e.g. `~/.config/udmon/config.toml`
    pub fn default_config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Unable to determine the user config directory")?;
        Ok(dir.join(APP_NAME).join(CONFIG_FILE_NAME))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given; otherwise the default file if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }

        match Self::default_config_path() {
            Ok(default_path) if default_path.exists() => Self::load_from_file(&default_path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }

        if self.output.queue_capacity == 0 || self.output.queue_capacity > QUEUE_CAPACITY_MAX {
            return Err(ConfigError::InvalidQueueCapacity(self.output.queue_capacity));
        }

        if self.monitor.restart_delay_ms > RESTART_DELAY_MAX_MS {
            return Err(ConfigError::InvalidRestartDelay(self.monitor.restart_delay_ms));
        }

        validate_filters(&self.output.filters)?;
        validate_level(&self.logging.level)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            command: self.monitor.command.clone(),
            launch: LaunchOptions {
                shell: self.monitor.shell.clone(),
                privileged: self.monitor.privileged,
            },
        }
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.monitor.restart_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Configuration::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor.command, "udisksctl monitor");
        assert_eq!(config.output.queue_capacity, 256);
        assert_eq!(config.restart_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[monitor]
privileged = true

[output]
filters = ["/dev/sd*"]
"#,
        )
        .unwrap();

        let config = Configuration::load_from_file(&path).unwrap();
        assert!(config.monitor.privileged);
        assert_eq!(config.monitor.shell, "/bin/bash");
        assert_eq!(config.output.filters, vec!["/dev/sd*"]);
        assert_eq!(config.logging.level, "info");

        let settings = config.monitor_settings();
        assert!(settings.launch.privileged);
        assert_eq!(settings.command, "udisksctl monitor");
    }

    #[test]
    fn test_out_of_range_values_rejected() {
        let mut config = Configuration::default();
        config.output.queue_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidQueueCapacity(0)));

        let mut config = Configuration::default();
        config.monitor.restart_delay_ms = 600_001;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRestartDelay(600_001)));

        let mut config = Configuration::default();
        config.monitor.command = "   ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyCommand));

        let mut config = Configuration::default();
        config.logging.level = "loud".to_string();
        assert_eq!(config.validate(), Err(ConfigError::InvalidLogLevel("loud".to_string())));
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[output]\nqueue_capacity = 100000\n").unwrap();

        let err = Configuration::load_from_file(&path).unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("bad.toml"), "{}", message);
        assert!(message.contains("between 1 and 65536"), "{}", message);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("typo.toml");
        fs::write(&path, "[monitor]\ncomand = \"cat\"\n").unwrap();

        assert!(Configuration::load_from_file(&path).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(Configuration::load(Some(&path)).is_err());
    }
}
