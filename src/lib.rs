//! Element-wise array addition on a compute device.
//!
//! Two device-shared `f32` arrays are filled on the device with their own
//! indices, added into a third array, and the result is verified on the host.
//! All three kernels go into a single command buffer, one compute pass each,
//! and run in encoding order.
//!
//! Devices implement [`ComputeDevice`]. [`WgpuDevice`] drives a real GPU and
//! [`HostDevice`] runs the same kernels on a worker thread.

pub mod adder;
pub mod buffers;
pub mod command;
pub mod config;
pub mod context;
pub mod device;
pub mod errors;
pub mod gpu;
pub mod host;
pub mod verifier;

pub use adder::{ArrayAdder, run, threadgroup_size_for_pipeline};
pub use buffers::{BufferPool, SharedBuffer};
pub use command::{CommandBuffer, ComputeEncoder};
pub use config::AdderConfig;
pub use context::DeviceContext;
pub use device::{ComputeDevice, DeviceBuffer, GridSize, KernelLibrary, PipelineState};
pub use errors::AdderError;
pub use gpu::WgpuDevice;
pub use host::{HostDevice, HostFunction, HostLibrary};
pub use verifier::{VerificationReport, Verifier, VerifyMode};
