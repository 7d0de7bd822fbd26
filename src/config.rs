//! Runner configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum iterations across the whole run before aborting
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Entry mapping selector (picks the entry step from entry-step-mapping)
    pub mode: Option<String>,

    /// Step to route to after a failed completion check instead of the
    /// current step's repeat transition
    #[serde(rename = "retry-step")]
    pub retry_step: Option<String>,

    /// Working directory for completion condition commands
    pub workdir: PathBuf,

    /// Timeout for a single condition command in milliseconds
    #[serde(rename = "condition-timeout-ms")]
    pub condition_timeout_ms: u64,

    /// Delay between iterations in milliseconds
    #[serde(rename = "iteration-delay-ms")]
    pub iteration_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            mode: None,
            retry_step: None,
            workdir: PathBuf::from("."),
            condition_timeout_ms: 120_000,
            iteration_delay_ms: 0,
        }
    }
}

impl RunnerConfig {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .stepflow.yml
        let local_config = PathBuf::from(".stepflow.yml");
        if local_config.exists() {
            match Self::from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/stepflow/stepflow.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("stepflow").join("stepflow.yml");
            if user_config.exists() {
                match Self::from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config = Self::from_yaml_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();

        assert_eq!(config.max_iterations, 25);
        assert_eq!(config.mode, None);
        assert_eq!(config.retry_step, None);
        assert_eq!(config.workdir, PathBuf::from("."));
        assert_eq!(config.condition_timeout_ms, 120_000);
        assert_eq!(config.iteration_delay_ms, 0);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
max-iterations: 50
mode: hotfix
retry-step: fix
workdir: /tmp/flow
condition-timeout-ms: 60000
iteration-delay-ms: 250
"#;

        let config = RunnerConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.max_iterations, 50);
        assert_eq!(config.mode.as_deref(), Some("hotfix"));
        assert_eq!(config.retry_step.as_deref(), Some("fix"));
        assert_eq!(config.workdir, PathBuf::from("/tmp/flow"));
        assert_eq!(config.condition_timeout_ms, 60_000);
        assert_eq!(config.iteration_delay_ms, 250);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
max-iterations: 10
"#;

        let config = RunnerConfig::from_yaml_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.max_iterations, 10);

        // Defaults for unspecified
        assert_eq!(config.mode, None);
        assert_eq!(config.condition_timeout_ms, 120_000);
        assert_eq!(config.workdir, PathBuf::from("."));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stepflow.yml");
        fs::write(&path, "max-iterations: 7\nmode: triage\n").unwrap();

        let config = RunnerConfig::from_file(&path).unwrap();

        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.mode.as_deref(), Some("triage"));
    }

    #[test]
    fn test_load_explicit_path_missing_errors() {
        let missing = PathBuf::from("/nonexistent/stepflow.yml");
        let result = RunnerConfig::load(Some(&missing));

        assert!(result.is_err());
    }
}
