use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::types::Config;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl Config {
    /// Returns the path to the configuration file.
    ///
    /// Uses `~/.config/votedeck/config.toml` on Unix/macOS,
    /// or equivalent on other platforms via `dirs::config_dir()`.
    /// Falls back to current directory if config_dir is unavailable.
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("votedeck").join("config.toml")
    }

    /// Loads configuration from the default config file.
    ///
    /// - If the file doesn't exist, returns `Config::default()`.
    /// - If the file exists, parses it as TOML and validates.
    /// - Returns an error if reading, parsing, or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - Timing windows are non-zero and mutually consistent
    /// - Batch size is at least 1
    /// - The endpoint and retry ladder are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schedule.debounce_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "schedule.debounce_ms must be non-zero".to_string(),
            });
        }

        if self.schedule.max_interval_ms < self.schedule.debounce_ms {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "schedule.max_interval_ms ({}) must be at least debounce_ms ({})",
                    self.schedule.max_interval_ms, self.schedule.debounce_ms
                ),
            });
        }

        if self.schedule.max_batch_size == 0 {
            return Err(ConfigError::ValidationError {
                message: "schedule.max_batch_size must be at least 1".to_string(),
            });
        }

        if self.sync.endpoint.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "sync.endpoint must not be empty".to_string(),
            });
        }

        if self.sync.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "sync.request_timeout_ms must be non-zero".to_string(),
            });
        }

        if self.sync.retry_backoff_base_ms == 0 {
            return Err(ConfigError::ValidationError {
                message: "sync.retry_backoff_base_ms must be non-zero".to_string(),
            });
        }

        if self.sync.retry_backoff_cap_ms < self.sync.retry_backoff_base_ms {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "sync.retry_backoff_cap_ms ({}) must be at least retry_backoff_base_ms ({})",
                    self.sync.retry_backoff_cap_ms, self.sync.retry_backoff_base_ms
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.schedule.debounce_ms, 800);
        assert_eq!(config.schedule.max_interval_ms, 5000);
        assert_eq!(config.schedule.max_batch_size, 20);
        assert_eq!(config.sync.max_retries, 3);
        config.validate().unwrap();
    }

    #[test]
    fn partial_section_fills_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            [schedule]
            debounce_ms = 250

            [sync]
            endpoint = "https://votes.example.com/batch"
            "#,
        )
        .unwrap();

        assert_eq!(config.schedule.debounce_ms, 250);
        assert_eq!(config.schedule.max_interval_ms, 5000);
        assert_eq!(config.sync.endpoint, "https://votes.example.com/batch");
        assert_eq!(config.sync.retry_backoff_base_ms, 500);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_interval_shorter_than_debounce() {
        let config: Config = toml::from_str(
            r#"
            [schedule]
            debounce_ms = 800
            max_interval_ms = 400
            "#,
        )
        .unwrap();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn rejects_zero_batch_size() {
        let config: Config = toml::from_str(
            r#"
            [schedule]
            max_batch_size = 0
            "#,
        )
        .unwrap();

        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_backoff_ladder() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            retry_backoff_base_ms = 2000
            retry_backoff_cap_ms = 100
            "#,
        )
        .unwrap();

        assert!(config.validate().is_err());
    }
}
