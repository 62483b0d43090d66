//! Engine configuration, loadable from TOML
//!
//! ```toml
//! max_depth = 10
//! max_loop_iterations = 10000
//! error_strategy = "keepraw"
//! timeout_ms = 2000
//!
//! [delimiters]
//! open = "{~"
//! close = "~}"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::context::ErrorStrategy;
use crate::parser::Delimiters;

/// Errors that can occur when loading engine configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Limits and defaults shared by every template of an engine
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub delimiters: Delimiters,
    /// Maximum include/extends nesting
    pub max_depth: usize,
    /// Maximum iterations of a single `for` loop
    pub max_loop_iterations: usize,
    /// Strategy for tags without an `onerror` attribute
    pub error_strategy: ErrorStrategy,
    /// Overall render timeout
    pub timeout_ms: Option<u64>,
    /// Timeout for a single resolver call
    pub resolver_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiters: Delimiters::default(),
            max_depth: 10,
            max_loop_iterations: 10_000,
            error_strategy: ErrorStrategy::Throw,
            timeout_ms: None,
            resolver_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.delimiters;
        if d.open.is_empty() || d.close.is_empty() {
            return Err(ConfigError::Invalid("delimiters must not be empty".to_string()));
        }
        if d.open == d.close {
            return Err(ConfigError::Invalid(format!(
                "open and close delimiters must differ (both '{}')",
                d.open
            )));
        }
        if d.open.contains(char::is_whitespace) || d.close.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid("delimiters must not contain whitespace".to_string()));
        }
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn with_delimiters(mut self, delimiters: Delimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_loop_iterations(mut self, max: usize) -> Self {
        self.max_loop_iterations = max;
        self
    }

    pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
        self.error_strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_resolver_timeout(mut self, timeout: Duration) -> Self {
        self.resolver_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn resolver_timeout(&self) -> Option<Duration> {
        self.resolver_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_depth, 10);
        assert_eq!(config.max_loop_iterations, 10_000);
        assert_eq!(config.error_strategy, ErrorStrategy::Throw);
        assert_eq!(config.delimiters, Delimiters::default());
        assert_eq!(config.timeout(), None);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = EngineConfig::from_str(
            r#"
max_depth = 3
error_strategy = "keepraw"
resolver_timeout_ms = 250

[delimiters]
open = "<<"
close = ">>"
"#,
        )
        .expect("Should parse");
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.max_loop_iterations, 10_000);
        assert_eq!(config.error_strategy, ErrorStrategy::KeepRaw);
        assert_eq!(config.delimiters, Delimiters::new("<<", ">>"));
        assert_eq!(config.resolver_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_toml_error() {
        let result = EngineConfig::from_str("this is not valid toml {{{{");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        assert!(matches!(
            EngineConfig::from_str("unknown_key = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            EngineConfig::from_str("max_depth = 0"),
            Err(ConfigError::Invalid(_))
        ));
        let same = EngineConfig::default().with_delimiters(Delimiters::new("%%", "%%"));
        assert!(same.validate().is_err());
    }
}
