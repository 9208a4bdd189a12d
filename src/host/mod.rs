//! Host reference device.
//!
//! Buffers live in host memory shared with a device worker thread. Each
//! committed command buffer runs on its own worker, pass by pass in encoding
//! order, threadgroup by threadgroup within a pass. Limits and the kernel
//! library are configurable so that allocation and lookup failures can be
//! reproduced without GPU hardware.

pub mod kernels;

pub use kernels::{HostFunction, HostKernel, HostLibrary};

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use log::debug;

use crate::command::EncodedPass;
use crate::device::{ComputeDevice, DeviceBuffer, GridSize, PipelineState, Submission};
use crate::errors::{
    AllocationError, AllocationResult, ExecutionError, ExecutionResult, InitializationError,
    InitializationResult,
};

/// Default threadgroup limit, the usual value for Apple GPUs.
pub const DEFAULT_MAX_THREADS_PER_THREADGROUP: usize = 1024;

/// Default limit on a single buffer (256 MiB).
pub const DEFAULT_MAX_BUFFER_LENGTH: usize = 256 << 20;

/// Counters shared between a [`HostDevice`] and its observers.
#[derive(Debug, Default)]
pub struct HostDeviceStats {
    allocated_buffers: AtomicUsize,
    compiled_pipelines: AtomicUsize,
    committed_command_buffers: AtomicUsize,
}

impl HostDeviceStats {
    pub fn allocated_buffers(&self) -> usize {
        self.allocated_buffers.load(Ordering::SeqCst)
    }

    pub fn compiled_pipelines(&self) -> usize {
        self.compiled_pipelines.load(Ordering::SeqCst)
    }

    pub fn committed_command_buffers(&self) -> usize {
        self.committed_command_buffers.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct HostDevice {
    library: Option<HostLibrary>,
    max_threads_per_threadgroup: usize,
    max_buffer_length: usize,
    stats: Arc<HostDeviceStats>,
}

impl Default for HostDevice {
    fn default() -> Self {
        Self {
            library: Some(HostLibrary::standard()),
            max_threads_per_threadgroup: DEFAULT_MAX_THREADS_PER_THREADGROUP,
            max_buffer_length: DEFAULT_MAX_BUFFER_LENGTH,
            stats: Arc::new(HostDeviceStats::default()),
        }
    }
}

impl HostDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(mut self, library: HostLibrary) -> Self {
        self.library = Some(library);
        self
    }

    /// A device whose default library fails to load.
    pub fn without_library(mut self) -> Self {
        self.library = None;
        self
    }

    pub fn with_max_threads_per_threadgroup(mut self, max_threads: usize) -> Self {
        self.max_threads_per_threadgroup = max_threads;
        self
    }

    /// Largest buffer, in bytes, the device agrees to allocate.
    pub fn with_max_buffer_length(mut self, max_length: usize) -> Self {
        self.max_buffer_length = max_length;
        self
    }

    /// Counters that stay readable after the device is moved into a context.
    pub fn stats(&self) -> Arc<HostDeviceStats> {
        Arc::clone(&self.stats)
    }
}

#[derive(Debug)]
pub struct HostPipeline {
    name: String,
    kernel: HostKernel,
    argument_count: u32,
    max_threads: usize,
}

impl PipelineState for HostPipeline {
    fn kernel_name(&self) -> &str {
        &self.name
    }

    fn max_total_threads_per_threadgroup(&self) -> usize {
        self.max_threads
    }
}

#[derive(Debug)]
pub struct HostBuffer {
    storage: Arc<Mutex<Vec<f32>>>,
    length: usize,
}

/// Host view of a [`HostBuffer`], holding its lock. Reads and writes go
/// straight to the storage the kernels run on.
pub struct HostContents<'a> {
    guard: MutexGuard<'a, Vec<f32>>,
}

impl Deref for HostContents<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.guard
    }
}

impl DerefMut for HostContents<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.guard
    }
}

impl HostBuffer {
    fn lock(&self) -> ExecutionResult<HostContents<'_>> {
        let guard = self
            .storage
            .lock()
            .map_err(|_| ExecutionError::DeviceFault {
                message: "buffer poisoned by a faulted kernel".to_string(),
            })?;
        Ok(HostContents { guard })
    }
}

impl DeviceBuffer for HostBuffer {
    type Contents<'a> = HostContents<'a>;
    type ContentsMut<'a> = HostContents<'a>;

    fn length(&self) -> usize {
        self.length
    }

    fn contents(&self) -> ExecutionResult<HostContents<'_>> {
        self.lock()
    }

    fn contents_mut(&self) -> ExecutionResult<HostContents<'_>> {
        self.lock()
    }
}

#[derive(Debug)]
pub struct HostQueue;

pub struct HostSubmission {
    worker: JoinHandle<ExecutionResult<()>>,
}

impl Submission for HostSubmission {
    fn wait_until_completed(self) -> ExecutionResult<()> {
        match self.worker.join() {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "kernel panicked".to_string());
                Err(ExecutionError::DeviceFault { message })
            }
        }
    }
}

/// A pass detached from the command buffer's borrows.
struct HostPass {
    name: String,
    kernel: HostKernel,
    arguments: Vec<Arc<Mutex<Vec<f32>>>>,
    grid: GridSize,
    threadgroup: GridSize,
}

impl HostPass {
    fn prepare(pass: &EncodedPass<'_, HostDevice>) -> ExecutionResult<Self> {
        let pipeline = pass.pipeline();
        let mut arguments: Vec<Arc<Mutex<Vec<f32>>>> = Vec::new();

        for index in 0..pipeline.argument_count {
            let buffer = pass.binding(index).ok_or(ExecutionError::MissingBinding {
                kernel: pipeline.name.clone(),
                index,
            })?;
            if let Some(first) = arguments
                .iter()
                .position(|bound| Arc::ptr_eq(bound, &buffer.storage))
            {
                return Err(ExecutionError::AliasedBinding {
                    kernel: pipeline.name.clone(),
                    first: first as u32,
                    second: index,
                });
            }
            arguments.push(Arc::clone(&buffer.storage));
        }

        Ok(Self {
            name: pipeline.name.clone(),
            kernel: pipeline.kernel,
            arguments,
            grid: pass.grid(),
            threadgroup: pass.threadgroup(),
        })
    }

    fn execute(&self) -> ExecutionResult<()> {
        let mut guards = self
            .arguments
            .iter()
            .map(|storage| {
                storage.lock().map_err(|_| ExecutionError::DeviceFault {
                    message: format!("{}: buffer poisoned by a faulted kernel", self.name),
                })
            })
            .collect::<ExecutionResult<Vec<_>>>()?;
        let mut arguments: Vec<&mut [f32]> =
            guards.iter_mut().map(|guard| guard.as_mut_slice()).collect();

        let grid = self.grid;
        let group = self.threadgroup;
        let groups = GridSize::new(
            grid.width.div_ceil(group.width),
            grid.height.div_ceil(group.height),
            grid.depth.div_ceil(group.depth),
        );

        for gz in 0..groups.depth {
            for gy in 0..groups.height {
                for gx in 0..groups.width {
                    for tz in 0..group.depth {
                        for ty in 0..group.height {
                            for tx in 0..group.width {
                                let (x, y, z) = (
                                    gx * group.width + tx,
                                    gy * group.height + ty,
                                    gz * group.depth + tz,
                                );
                                if x >= grid.width || y >= grid.height || z >= grid.depth {
                                    continue;
                                }
                                let index = x + grid.width * (y + grid.height * z);
                                (self.kernel)(index, &mut arguments);
                            }
                        }
                    }
                }
            }
        }

        debug!(
            "{} executed {} threadgroups of {}",
            self.name,
            groups.total(),
            group
        );
        Ok(())
    }
}

impl ComputeDevice for HostDevice {
    type Library = HostLibrary;
    type Pipeline = HostPipeline;
    type Buffer = HostBuffer;
    type Queue = HostQueue;
    type Submission = HostSubmission;

    fn name(&self) -> String {
        "host reference device".to_string()
    }

    fn make_default_library(&self) -> InitializationResult<HostLibrary> {
        self.library
            .clone()
            .ok_or_else(|| InitializationError::LibraryUnavailable {
                message: "no default library installed on the host device".to_string(),
            })
    }

    fn make_compute_pipeline_state(
        &self,
        function: &HostFunction,
    ) -> InitializationResult<HostPipeline> {
        let max_threads = function
            .max_threads_per_threadgroup
            .map_or(self.max_threads_per_threadgroup, |limit| {
                limit.min(self.max_threads_per_threadgroup)
            });
        if max_threads == 0 {
            return Err(InitializationError::PipelineCompilation {
                kernel: function.name.clone(),
                message: "kernel cannot run with any threadgroup size".to_string(),
            });
        }

        self.stats.compiled_pipelines.fetch_add(1, Ordering::SeqCst);
        Ok(HostPipeline {
            name: function.name.clone(),
            kernel: function.kernel,
            argument_count: function.argument_count,
            max_threads,
        })
    }

    fn make_command_queue(&self) -> InitializationResult<HostQueue> {
        Ok(HostQueue)
    }

    fn make_buffer(&self, length: usize, label: &str) -> AllocationResult<HostBuffer> {
        let element_size = std::mem::size_of::<f32>();
        if length == 0 {
            return Err(AllocationError::ZeroLength {
                label: label.to_string(),
            });
        }
        if length % element_size != 0 {
            return Err(AllocationError::UnalignedLength {
                length,
                element_size,
            });
        }
        if length > self.max_buffer_length {
            return Err(AllocationError::ExceedsDeviceLimit {
                label: label.to_string(),
                requested: length as u64,
                limit: self.max_buffer_length as u64,
            });
        }

        let elements = length / element_size;
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(elements)
            .map_err(|_| AllocationError::OutOfMemory {
                label: label.to_string(),
                requested: length as u64,
            })?;
        storage.resize(elements, 0.0);

        self.stats.allocated_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(HostBuffer {
            storage: Arc::new(Mutex::new(storage)),
            length,
        })
    }

    fn commit(
        &self,
        _queue: &HostQueue,
        passes: Vec<EncodedPass<'_, Self>>,
    ) -> ExecutionResult<HostSubmission> {
        let passes = passes
            .iter()
            .map(HostPass::prepare)
            .collect::<ExecutionResult<Vec<_>>>()?;

        self.stats
            .committed_command_buffers
            .fetch_add(1, Ordering::SeqCst);
        let worker = thread::Builder::new()
            .name("host-device".to_string())
            .spawn(move || passes.iter().try_for_each(HostPass::execute))
            .map_err(|e| ExecutionError::DeviceFault {
                message: format!("failed to start device worker: {e}"),
            })?;

        Ok(HostSubmission { worker })
    }
}
