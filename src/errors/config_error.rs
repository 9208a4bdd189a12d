//! Error types for configuration loading.

use thiserror::Error;

/// Errors that can occur while loading or validating an [`AdderConfig`](crate::AdderConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {source}")]
    Parse { source: serde_json::Error },

    #[error("The array length must be greater than 0")]
    ZeroArrayLength,

    #[error("The array length {length} exceeds the maximum of {max} elements")]
    ArrayLengthTooLarge { length: usize, max: usize },
}
