//! Error types for the array adder.
//!
//! Setup, allocation and execution failures each have their own enum so the
//! caller can tell which stage of the one-shot pipeline failed. All of them are
//! fatal at this scope; [`AdderError`] wraps them for the top-level `run`.

mod allocation_error;
mod config_error;
mod execution_error;
mod initialization_error;

pub use allocation_error::AllocationError;
pub use config_error::ConfigError;
pub use execution_error::ExecutionError;
pub use initialization_error::InitializationError;

use thiserror::Error;

/// Any failure of the fill, add and verify cycle.
#[derive(Error, Debug)]
pub enum AdderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Result type alias for device context setup.
pub type InitializationResult<T> = std::result::Result<T, InitializationError>;

/// Result type alias for buffer allocation.
pub type AllocationResult<T> = std::result::Result<T, AllocationError>;

/// Result type alias for encoding and execution.
pub type ExecutionResult<T> = std::result::Result<T, ExecutionError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for the whole cycle.
pub type AdderResult<T> = std::result::Result<T, AdderError>;
