//! Configuration file
//!
//! Every key is optional; missing keys fall back to the built-in defaults.
//!
//! ```toml
//! firmware_dir = "/opt/navcard/firmware"
//! usb_timeout_ms = 5000
//! rescan_attempts = 20
//! rescan_delay_ms = 200
//! confirm = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use navcard_core::transport::RescanPolicy;
use serde::Deserialize;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Contents of `navcard.toml`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Firmware image directory
    pub firmware_dir: Option<PathBuf>,
    /// Timeout of a single USB transfer
    pub usb_timeout_ms: u64,
    /// Rescans while waiting for re-enumeration
    pub rescan_attempts: u32,
    /// Delay before each rescan
    pub rescan_delay_ms: u64,
    /// Ask before destructive operations
    pub confirm: bool,
}

impl Default for Config {
    fn default() -> Self {
        let policy = RescanPolicy::default();
        Self {
            firmware_dir: None,
            usb_timeout_ms: 5000,
            rescan_attempts: policy.attempts,
            rescan_delay_ms: policy.delay.as_millis() as u64,
            confirm: true,
        }
    }
}

const DEFAULT_PATHS: [&str; 2] = ["navcard.toml", "/etc/navcard/navcard.toml"];

impl Config {
    /// Parse a configuration string
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Load `path`, or the first default location that exists
    ///
    /// An explicit path must exist; with none given and no file in the
    /// default locations the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        for candidate in DEFAULT_PATHS.iter().map(Path::new) {
            if candidate.is_file() {
                log::debug!("Using configuration {}", candidate.display());
                return Self::from_file(candidate);
            }
        }
        Ok(Self::default())
    }

    /// USB transfer timeout
    pub fn usb_timeout(&self) -> Duration {
        Duration::from_millis(self.usb_timeout_ms)
    }

    /// Re-enumeration wait
    pub fn rescan_policy(&self) -> RescanPolicy {
        RescanPolicy {
            attempts: self.rescan_attempts,
            delay: Duration::from_millis(self.rescan_delay_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = Config::from_toml_str("rescan_attempts = 5\n", Path::new("t.toml")).unwrap();
        assert_eq!(config.rescan_attempts, 5);
        assert_eq!(config.rescan_policy().delay, Duration::from_millis(200));
        assert_eq!(config.usb_timeout(), Duration::from_secs(5));
        assert!(config.confirm);
        assert!(config.firmware_dir.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            Config::from_toml_str("retries = 3\n", Path::new("t.toml")),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_explicit_file() {
        assert!(matches!(
            Config::load(Some(Path::new("/nonexistent/navcard.toml"))),
            Err(ConfigError::Read { .. })
        ));
    }
}
