//! Configuration of a fill, add and verify cycle.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, ConfigResult};
use crate::verifier::VerifyMode;

/// Number of elements in each array by default (2^24).
pub const DEFAULT_ARRAY_LENGTH: usize = 1 << 24;

/// Largest array the kernels can index with a `u32` invocation id.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// Problem size and verification policy.
///
/// Missing fields fall back to the defaults when deserialising:
///
/// ```json
/// { "array_length": 1024, "verify_mode": "verbose" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdderConfig {
    array_length: usize,
    verify_mode: VerifyMode,
}

impl Default for AdderConfig {
    fn default() -> Self {
        Self {
            array_length: DEFAULT_ARRAY_LENGTH,
            verify_mode: VerifyMode::default(),
        }
    }
}

impl AdderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_array_length(mut self, array_length: usize) -> Self {
        self.array_length = array_length;
        self
    }

    pub fn with_verify_mode(mut self, verify_mode: VerifyMode) -> Self {
        self.verify_mode = verify_mode;
        self
    }

    pub fn array_length(&self) -> usize {
        self.array_length
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    /// Length of each buffer in bytes, `None` if it overflows `usize`.
    pub fn buffer_length(&self) -> Option<usize> {
        self.array_length.checked_mul(std::mem::size_of::<f32>())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.array_length == 0 {
            return Err(ConfigError::ZeroArrayLength);
        }
        if self.array_length > MAX_ARRAY_LENGTH {
            return Err(ConfigError::ArrayLengthTooLarge {
                length: self.array_length,
                max: MAX_ARRAY_LENGTH,
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(content).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AdderConfig::new();
        assert_eq!(config.array_length(), 1 << 24);
        assert_eq!(config.verify_mode(), VerifyMode::MismatchesOnly);
        assert_eq!(config.buffer_length(), Some(4 << 24));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = AdderConfig::new()
            .with_array_length(8)
            .with_verify_mode(VerifyMode::Verbose);
        assert_eq!(config.array_length(), 8);
        assert_eq!(config.verify_mode(), VerifyMode::Verbose);
        assert_eq!(config.buffer_length(), Some(32));
    }

    #[test]
    fn test_zero_length_rejected() {
        let config = AdderConfig::new().with_array_length(0);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroArrayLength)));
    }

    #[test]
    fn test_from_json_partial() {
        let config = AdderConfig::from_json_str(r#"{ "array_length": 1024 }"#)
            .expect("Config should parse");
        assert_eq!(config.array_length(), 1024);
        assert_eq!(config.verify_mode(), VerifyMode::MismatchesOnly);
    }

    #[test]
    fn test_from_json_verbose() {
        let config =
            AdderConfig::from_json_str(r#"{ "array_length": 16, "verify_mode": "verbose" }"#)
                .expect("Config should parse");
        assert_eq!(config.verify_mode(), VerifyMode::Verbose);
    }

    #[test]
    fn test_from_json_invalid() {
        let result = AdderConfig::from_json_str(r#"{ "array_length": "many" }"#);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));

        let result = AdderConfig::from_json_str(r#"{ "array_length": 0 }"#);
        assert!(matches!(result, Err(ConfigError::ZeroArrayLength)));
    }

    #[test]
    fn test_from_missing_file() {
        let result = AdderConfig::from_file("does/not/exist.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("array_adder_config_{}.json", std::process::id()));
        fs::write(&path, r#"{ "array_length": 64, "verify_mode": "mismatches_only" }"#)
            .expect("Config file should be written");

        let config = AdderConfig::from_file(&path).expect("Config should load");
        fs::remove_file(&path).ok();

        assert_eq!(config.array_length(), 64);
    }
}
