//! Startup configuration for DeckMix
//!
//! Read-only `key=value` file; mixer state is never written back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while reading the config file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: invalid value {value:?} for {key}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Meter sampling interval in milliseconds
    pub meter_interval_ms: u64,
    /// Reverb impulse response, relative to the working directory
    pub impulse_path: PathBuf,
    /// Command channel capacity
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meter_interval_ms: 500,
            impulse_path: PathBuf::from("impulse.wav"),
            channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Load config from the default location
    ///
    /// Returns default config if file doesn't exist or can't be parsed.
    pub fn load() -> Self {
        let path = Self::config_path();
        match Self::load_from(&path) {
            Ok(config) => {
                debug!(path = %path.display(), "config loaded");
                config
            }
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring config file");
                Self::default()
            }
        }
    }

    /// Load config from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("deckmix")
            .join("config.txt")
    }

    pub fn meter_interval(&self) -> Duration {
        Duration::from_millis(self.meter_interval_ms)
    }

    /// Parse config from simple key=value format
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            let invalid = || ConfigError::InvalidValue {
                line: index + 1,
                key: key.to_string(),
                value: value.to_string(),
            };

            match key {
                "meter_interval_ms" => {
                    config.meter_interval_ms = value
                        .parse()
                        .ok()
                        .filter(|&ms: &u64| ms > 0)
                        .ok_or_else(invalid)?;
                }
                "impulse_path" => {
                    if value.is_empty() {
                        return Err(invalid());
                    }
                    config.impulse_path = PathBuf::from(value);
                }
                "channel_capacity" => {
                    config.channel_capacity = value
                        .parse()
                        .ok()
                        .filter(|&n: &usize| n > 0)
                        .ok_or_else(invalid)?;
                }
                other => debug!(key = other, "ignoring unknown config key"),
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn test_parse_all_keys() {
        let content = "# DeckMix\nmeter_interval_ms = 250\nimpulse_path=irs/hall.wav\nchannel_capacity=64\n";
        let config = Config::parse(content).unwrap();
        assert_eq!(config.meter_interval(), Duration::from_millis(250));
        assert_eq!(config.impulse_path, PathBuf::from("irs/hall.wav"));
        assert_eq!(config.channel_capacity, 64);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = Config::parse("last_scan_folder=/music\ncolor=blue").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_value_names_line() {
        let err = Config::parse("# header\nmeter_interval_ms=soon").unwrap_err();
        match err {
            ConfigError::InvalidValue { line, key, .. } => {
                assert_eq!(line, 2);
                assert_eq!(key, "meter_interval_ms");
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(Config::parse("channel_capacity=0").is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Config::load_from(Path::new("/nonexistent/deckmix/config.txt"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
