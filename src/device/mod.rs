//! Compute device abstraction.
//!
//! The dispatch core only talks to a device through [`ComputeDevice`] and the
//! handle traits below. Two devices implement it:
//!
//! - [`WgpuDevice`](crate::gpu::WgpuDevice) runs the WGSL kernels on a real GPU.
//! - [`HostDevice`](crate::host::HostDevice) runs Rust kernels on a device
//!   worker thread with configurable limits.
//!
//! # Lifecycle
//!
//! ```text
//! device ─┬─ make_default_library ── function(name) ── make_compute_pipeline_state
//!         ├─ make_command_queue
//!         ├─ make_buffer (x3)
//!         └─ commit(queue, passes) ── Submission::wait_until_completed
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::command::EncodedPass;
use crate::errors::{AllocationResult, ExecutionResult, InitializationResult};

/// Name of the kernel writing a deterministic value into every element.
pub const FILL_KERNEL: &str = "fill_array";

/// Name of the kernel summing two buffers element-wise into a third.
pub const ADD_KERNEL: &str = "add_arrays";

/// Three dimensional extent of a grid or a threadgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl GridSize {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// A one dimensional extent `(width, 1, 1)`.
    pub const fn linear(width: usize) -> Self {
        Self::new(width, 1, 1)
    }

    /// Total number of threads covered by this extent.
    pub fn total(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.width, self.height, self.depth]
    }
}

impl fmt::Display for GridSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.width, self.height, self.depth)
    }
}

/// A collection of named kernels that can be compiled into pipeline states.
pub trait KernelLibrary {
    type Function;

    /// Look up a kernel by name.
    fn function(&self, name: &str) -> Option<Self::Function>;

    /// Names of every kernel in the library.
    fn function_names(&self) -> Vec<String>;
}

/// A kernel compiled for a specific device.
pub trait PipelineState {
    fn kernel_name(&self) -> &str;

    /// Largest threadgroup the device can run this pipeline with.
    fn max_total_threads_per_threadgroup(&self) -> usize;
}

/// A host and device visible region of `f32` elements.
pub trait DeviceBuffer {
    /// Host view of the buffer, valid while the guard is alive.
    type Contents<'a>: Deref<Target = [f32]>
    where
        Self: 'a;

    /// Writable host view; writes reach the device before the next commit.
    type ContentsMut<'a>: DerefMut<Target = [f32]>
    where
        Self: 'a;

    /// Length in bytes.
    fn length(&self) -> usize;

    /// Borrow the buffer contents on the host.
    ///
    /// Only meaningful once every command buffer writing to it has completed.
    fn contents(&self) -> ExecutionResult<Self::Contents<'_>>;

    /// Borrow the buffer contents on the host for writing.
    ///
    /// Must not overlap a command buffer that is still in flight.
    fn contents_mut(&self) -> ExecutionResult<Self::ContentsMut<'_>>;
}

/// A committed command buffer in flight on the device.
pub trait Submission {
    /// Block the calling thread until the device finished every encoded pass.
    fn wait_until_completed(self) -> ExecutionResult<()>;
}

/// A compute capable processor.
pub trait ComputeDevice: Sized {
    type Library: KernelLibrary;
    type Pipeline: PipelineState;
    type Buffer: DeviceBuffer;
    type Queue;
    type Submission: Submission;

    /// Human readable device name.
    fn name(&self) -> String;

    fn make_default_library(&self) -> InitializationResult<Self::Library>;

    fn make_compute_pipeline_state(
        &self,
        function: &<Self::Library as KernelLibrary>::Function,
    ) -> InitializationResult<Self::Pipeline>;

    fn make_command_queue(&self) -> InitializationResult<Self::Queue>;

    /// Allocate a zeroed buffer of `length` bytes.
    fn make_buffer(&self, length: usize, label: &str) -> AllocationResult<Self::Buffer>;

    /// Submit the passes of one command buffer, in order, to `queue`.
    fn commit(
        &self,
        queue: &Self::Queue,
        passes: Vec<EncodedPass<'_, Self>>,
    ) -> ExecutionResult<Self::Submission>;
}
