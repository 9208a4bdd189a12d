//! Device context: the device, both pipeline states and the command queue.

use log::info;

use crate::command::CommandBuffer;
use crate::device::{ADD_KERNEL, ComputeDevice, FILL_KERNEL, KernelLibrary, PipelineState};
use crate::errors::{InitializationError, InitializationResult};

/// Owns the compute device and everything compiled for it.
///
/// Buffers and command buffers borrow the context, so it outlives every
/// resource created from it.
pub struct DeviceContext<D: ComputeDevice> {
    device: D,
    fill_pipeline: D::Pipeline,
    add_pipeline: D::Pipeline,
    command_queue: D::Queue,
}

impl<D: ComputeDevice> DeviceContext<D> {
    /// Load the default library, compile `fill_array` and `add_arrays` and
    /// create the command queue.
    pub fn initialize(device: D) -> InitializationResult<Self> {
        let library = device.make_default_library()?;
        let fill_function = Self::resolve(&library, FILL_KERNEL)?;
        let add_function = Self::resolve(&library, ADD_KERNEL)?;

        let fill_pipeline = device.make_compute_pipeline_state(&fill_function)?;
        let add_pipeline = device.make_compute_pipeline_state(&add_function)?;
        let command_queue = device.make_command_queue()?;

        info!(
            "Initialized {}: {} max threadgroup {}, {} max threadgroup {}",
            device.name(),
            fill_pipeline.kernel_name(),
            fill_pipeline.max_total_threads_per_threadgroup(),
            add_pipeline.kernel_name(),
            add_pipeline.max_total_threads_per_threadgroup()
        );

        Ok(Self {
            device,
            fill_pipeline,
            add_pipeline,
            command_queue,
        })
    }

    fn resolve(
        library: &D::Library,
        name: &str,
    ) -> InitializationResult<<D::Library as KernelLibrary>::Function> {
        library
            .function(name)
            .ok_or_else(|| InitializationError::KernelNotFound {
                name: name.to_string(),
                available: library.function_names(),
            })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn fill_pipeline(&self) -> &D::Pipeline {
        &self.fill_pipeline
    }

    pub fn add_pipeline(&self) -> &D::Pipeline {
        &self.add_pipeline
    }

    pub fn command_queue(&self) -> &D::Queue {
        &self.command_queue
    }

    /// Create an empty command buffer for the context's queue.
    pub fn make_command_buffer(&self) -> CommandBuffer<'_, D> {
        CommandBuffer::new(self)
    }
}
