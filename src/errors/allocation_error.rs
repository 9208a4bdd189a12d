//! Error types for device buffer allocation.

use thiserror::Error;

/// Errors that can occur when the device cannot satisfy a buffer request.
#[derive(Error, Debug)]
pub enum AllocationError {
    #[error("Buffer {label} must not be empty")]
    ZeroLength { label: String },

    #[error("Buffer length {length} is not a multiple of the element size {element_size}")]
    UnalignedLength { length: usize, element_size: usize },

    #[error("Buffer length overflows for {elements} elements")]
    LengthOverflow { elements: usize },

    #[error("Buffer {label} of {requested} bytes exceeds the device limit of {limit} bytes")]
    ExceedsDeviceLimit {
        label: String,
        requested: u64,
        limit: u64,
    },

    #[error("The device is out of memory allocating {requested} bytes for buffer {label}")]
    OutOfMemory { label: String, requested: u64 },

    #[error("The device rejected buffer {label}: {message}")]
    Rejected { label: String, message: String },
}
