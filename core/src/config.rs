//! Coordinator configuration
//!
//! Loaded from an optional TOML file. Every key has a default, so an empty
//! or missing file yields a working coordinator.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Debounce window between a dirty signal and the pass
    pub debounce_ms: u64,
    /// Retry policy for surfaces that are not laid out yet
    pub attach_retry: RetryPolicy,
    /// Poll interval of the threaded service loop
    pub service_tick_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            attach_retry: RetryPolicy::default(),
            service_tick_ms: 10,
        }
    }
}

impl CoordinatorConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn service_tick(&self) -> Duration {
        Duration::from_millis(self.service_tick_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::Invalid("debounce_ms must be greater than 0".into()));
        }
        if self.attach_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "attach_retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<CoordinatorConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: CoordinatorConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load `path` (or the default location), falling back to defaults when the
/// file does not exist.
pub fn load_or_default(path: Option<&Path>) -> Result<CoordinatorConfig, ConfigError> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => default_config_path(),
    };
    match path {
        Some(p) if p.exists() => load_config(&p),
        _ => Ok(CoordinatorConfig::default()),
    }
}

/// `<config_dir>/atmos/coordinator.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("atmos").join("coordinator.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Backoff;

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
debounce_ms = 250

[attach_retry]
max_attempts = 3
backoff = "exponential"
"#;

        let config: CoordinatorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.attach_retry.max_attempts, 3);
        assert_eq!(config.attach_retry.backoff, Backoff::Exponential);
        assert_eq!(config.attach_retry.initial_delay_ms, 16);
        assert_eq!(config.service_tick_ms, 10);
    }

    #[test]
    fn test_load_rejects_zero_debounce() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.toml");
        fs::write(&path, "debounce_ms = 0\n").unwrap();

        assert!(matches!(load_config(&path), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coordinator.toml");
        fs::write(&path, "debounce_ms = \"soon\"\n").unwrap();

        match load_config(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert_eq!(
            load_or_default(Some(&path)).unwrap(),
            CoordinatorConfig::default()
        );
    }
}
