//! Error types for device context setup.

use thiserror::Error;

/// Errors that can occur while acquiring the device, resolving kernels,
/// compiling pipeline states or creating the command queue.
#[derive(Error, Debug)]
pub enum InitializationError {
    #[error("No compute device available: {message}")]
    DeviceUnavailable { message: String },

    #[error("The kernel library could not be loaded: {message}")]
    LibraryUnavailable { message: String },

    #[error("Kernel {name} not found in library, available kernels: {available:?}")]
    KernelNotFound { name: String, available: Vec<String> },

    #[error("Pipeline state compilation failed for kernel {kernel}: {message}")]
    PipelineCompilation { kernel: String, message: String },

    #[error("The command queue could not be created: {message}")]
    CommandQueue { message: String },
}
