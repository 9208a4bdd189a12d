//! Error types for command encoding and device execution.

use thiserror::Error;

/// Errors that can occur while encoding, committing or waiting on a command buffer.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Encoder {encoder} dispatched without a pipeline state")]
    MissingPipeline { encoder: usize },

    #[error("Encoder {encoder} already recorded a dispatch")]
    DuplicateDispatch { encoder: usize },

    #[error("Encoder {encoder} bound a buffer owned by another device context at slot {index}")]
    ForeignBuffer { encoder: usize, index: u32 },

    #[error(
        "Threadgroup {threadgroup:?} exceeds the limit of kernel {kernel} (max {max_threads} threads, grid {grid:?})"
    )]
    ThreadgroupTooLarge {
        kernel: String,
        threadgroup: [usize; 3],
        grid: [usize; 3],
        max_threads: usize,
    },

    #[error("Encoder {encoder} dispatched an empty grid or threadgroup")]
    EmptyDispatch { encoder: usize },

    #[error("Kernel {kernel} requires a buffer at slot {index}")]
    MissingBinding { kernel: String, index: u32 },

    #[error("Kernel {kernel} binds the same buffer at slots {first} and {second}")]
    AliasedBinding {
        kernel: String,
        first: u32,
        second: u32,
    },

    #[error("Grid of {groups} threadgroups exceeds the device dispatch limit")]
    GridTooLarge { groups: usize },

    #[error("The device rejected the command buffer: {message}")]
    Validation { message: String },

    #[error("The device reported a fault during execution: {message}")]
    DeviceFault { message: String },

    #[error("Buffer contents could not be mapped: {message}")]
    MapFailed { message: String },
}
