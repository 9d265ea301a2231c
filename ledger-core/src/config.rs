//! Configuration for the ledger

use crate::types::Principal;
use serde::{Deserialize, Serialize};

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Principal holding the administrator role
    pub administrator: Principal,

    /// Bounded mailbox size of the ledger actor
    pub mailbox_capacity: usize,

    /// Reward configuration
    pub reward: RewardConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "logistics-ledger".to_string(),
            administrator: Principal::new("admin"),
            mailbox_capacity: 1000,
            reward: RewardConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Reward configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Credits minted per unit of impact offset, before the kind bonus
    pub base_multiplier: u64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            base_multiplier: crate::rewards::DEFAULT_BASE_MULTIPLIER as u64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        Config::default().with_env_overrides()
    }

    /// Apply `LEDGER_*` environment overrides on top of `self`
    pub fn with_env_overrides(mut self) -> crate::Result<Self> {
        if let Ok(admin) = std::env::var("LEDGER_ADMIN") {
            self.administrator = Principal::new(admin);
        }

        if let Ok(multiplier) = std::env::var("LEDGER_BASE_MULTIPLIER") {
            self.reward.base_multiplier = multiplier.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_BASE_MULTIPLIER: {}", e))
            })?;
        }

        if let Ok(capacity) = std::env::var("LEDGER_MAILBOX_CAPACITY") {
            self.mailbox_capacity = capacity.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_MAILBOX_CAPACITY: {}", e))
            })?;
        }

        if let Ok(level) = std::env::var("LEDGER_LOG_LEVEL") {
            self.logging.level = level;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject configurations the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.administrator.is_zero() {
            return Err(crate::Error::Config(
                "administrator must not be empty".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be positive".to_string(),
            ));
        }
        if self.reward.base_multiplier == 0 {
            return Err(crate::Error::Config(
                "reward.base_multiplier must be positive".to_string(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(crate::Error::Config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "logistics-ledger");
        assert_eq!(config.administrator, Principal::new("admin"));
        assert_eq!(config.reward.base_multiplier, 100);
        assert!(!config.logging.json);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
administrator = "ops"

[reward]
base_multiplier = 250
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.administrator, Principal::new("ops"));
        assert_eq!(config.reward.base_multiplier, 250);
        assert_eq!(config.mailbox_capacity, 1000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mailbox_capacity = \"lots\"").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));

        let err = Config::from_file("/nonexistent/ledger.toml").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.administrator = Principal::zero();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.mailbox_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reward.base_multiplier = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "chatty".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "DEBUG".to_string();
        config.validate().unwrap();
    }
}
