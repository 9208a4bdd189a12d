//! GPU backend built on wgpu.
//!
//! The kernel library is WGSL generated by [`shaders::get_adder_wgsl`] with the
//! widest threadgroup the adapter supports. Entry points and their workgroup
//! sizes are read with naga before the shader module is handed to wgpu, so a
//! missing kernel is reported by name instead of failing pipeline creation.
//!
//! # Threadgroups
//!
//! WGSL fixes the workgroup size when the library is generated, so every
//! workgroup runs `THREADS_PER_GROUP` invocations whatever threadgroup was
//! encoded. The encoded threadgroup only sets the workgroup count,
//! `ceil(grid / threadgroup)`. With N = 8 and a 256 wide library the device
//! runs one 256 wide workgroup and the kernels discard invocations past the
//! end of the array.
//!
//! # Memory
//!
//! On integrated and CPU adapters with `MAPPABLE_PRIMARY_BUFFERS`, storage
//! buffers are mapped in place for reading. Elsewhere every storage buffer has
//! a readback twin that the command buffer refreshes after its last pass.
//! Host writes are staged through the queue and land before the next
//! submission.
//!
//! # Usage
//!
//! ```ignore
//! use array_adder::{AdderConfig, WgpuDevice, run};
//!
//! let device = WgpuDevice::system_default()?;
//! let report = run(device, &AdderConfig::default())?;
//! assert!(report.is_success());
//! ```

pub mod library;
pub mod shaders;
pub mod wgpu_device;

pub use library::{WgslFunction, WgslLibrary};
pub use shaders::get_adder_wgsl;
pub use wgpu_device::{WgpuBuffer, WgpuDevice, WgpuPipeline};
