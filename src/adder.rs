//! Dispatch orchestration: fill A, fill B, add into Result, wait, verify.

use log::info;

use crate::buffers::{BufferPool, SharedBuffer};
use crate::command::CommandBuffer;
use crate::config::AdderConfig;
use crate::context::DeviceContext;
use crate::device::{ComputeDevice, GridSize, PipelineState};
use crate::errors::{AdderResult, AllocationError, AllocationResult, ExecutionResult};
use crate::verifier::{VerificationReport, Verifier};

/// Threadgroup for `pipeline` over `grid`: the pipeline maximum, clamped to
/// the grid width. The grid itself is never reduced.
pub fn threadgroup_size_for_pipeline<P: PipelineState>(pipeline: &P, grid: GridSize) -> GridSize {
    GridSize::linear(pipeline.max_total_threads_per_threadgroup().min(grid.width))
}

/// Runs the fixed three pass pipeline on buffers owned for its lifetime.
pub struct ArrayAdder<'ctx, D: ComputeDevice> {
    context: &'ctx DeviceContext<D>,
    buffers: BufferPool<'ctx, D>,
    grid_size: GridSize,
    verifier: Verifier,
}

impl<'ctx, D: ComputeDevice> ArrayAdder<'ctx, D> {
    /// Allocate the three buffers for `config.array_length()` elements.
    pub fn new(context: &'ctx DeviceContext<D>, config: &AdderConfig) -> AllocationResult<Self> {
        let array_length = config.array_length();
        let buffer_length = config
            .buffer_length()
            .ok_or(AllocationError::LengthOverflow {
                elements: array_length,
            })?;
        let buffers = BufferPool::allocate(context, buffer_length)?;

        Ok(Self {
            context,
            buffers,
            grid_size: GridSize::linear(array_length),
            verifier: Verifier::new(config.verify_mode()),
        })
    }

    pub fn context(&self) -> &'ctx DeviceContext<D> {
        self.context
    }

    pub fn buffers(&self) -> &BufferPool<'ctx, D> {
        &self.buffers
    }

    pub fn grid_size(&self) -> GridSize {
        self.grid_size
    }

    /// Dispatch the pipeline, wait for it, then verify the sums.
    pub fn send_compute_command(&self) -> ExecutionResult<VerificationReport> {
        self.dispatch()?;
        self.verify()
    }

    /// Encode fill(A), fill(B) and add(A, B → Result) into one command
    /// buffer, commit it and block until the device completes it.
    pub fn dispatch(&self) -> ExecutionResult<()> {
        let mut command_buffer = self.context.make_command_buffer();

        self.encode_fill(&mut command_buffer, self.buffers.a())?;
        self.encode_fill(&mut command_buffer, self.buffers.b())?;
        self.encode_add(&mut command_buffer)?;

        command_buffer.commit()?.wait_until_completed()
    }

    /// Encode a pass filling `destination` with the `fill_array` kernel.
    pub fn encode_fill<'a>(
        &'a self,
        command_buffer: &mut CommandBuffer<'a, D>,
        destination: &'a SharedBuffer<'ctx, D>,
    ) -> ExecutionResult<()> {
        let pipeline = self.context.fill_pipeline();
        let mut encoder = command_buffer.compute_command_encoder();
        encoder.set_compute_pipeline_state(pipeline);
        encoder.set_buffer(destination, 0)?;
        encoder.dispatch_threads(
            self.grid_size,
            threadgroup_size_for_pipeline(pipeline, self.grid_size),
        )?;
        encoder.end_encoding();
        Ok(())
    }

    /// Encode a pass summing A and B into Result with the `add_arrays` kernel.
    pub fn encode_add<'a>(&'a self, command_buffer: &mut CommandBuffer<'a, D>) -> ExecutionResult<()> {
        let pipeline = self.context.add_pipeline();
        let mut encoder = command_buffer.compute_command_encoder();
        encoder.set_compute_pipeline_state(pipeline);
        encoder.set_buffer(self.buffers.a(), 0)?;
        encoder.set_buffer(self.buffers.b(), 1)?;
        encoder.set_buffer(self.buffers.result(), 2)?;
        encoder.dispatch_threads(
            self.grid_size,
            threadgroup_size_for_pipeline(pipeline, self.grid_size),
        )?;
        encoder.end_encoding();
        Ok(())
    }

    /// Check the buffers on the host. Call only after a dispatch completed.
    pub fn verify(&self) -> ExecutionResult<VerificationReport> {
        let a = self.buffers.a().contents()?;
        let b = self.buffers.b().contents()?;
        let result = self.buffers.result().contents()?;
        Ok(self.verifier.verify(&a, &b, &result))
    }
}

/// Initialize `device`, allocate the buffers and run one dispatch and verify
/// cycle.
///
/// Mismatches are reported in the returned [`VerificationReport`], not as
/// errors.
pub fn run<D: ComputeDevice>(device: D, config: &AdderConfig) -> AdderResult<VerificationReport> {
    config.validate()?;

    let context = DeviceContext::initialize(device)?;
    let adder = ArrayAdder::new(&context, config)?;
    info!(
        "Adding {} elements ({} bytes per buffer)",
        config.array_length(),
        adder.buffers().length()
    );

    Ok(adder.send_compute_command()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPipeline(usize);

    impl PipelineState for FixedPipeline {
        fn kernel_name(&self) -> &str {
            "fixed"
        }

        fn max_total_threads_per_threadgroup(&self) -> usize {
            self.0
        }
    }

    #[test]
    fn test_threadgroup_clamped_to_pipeline_max() {
        let size = threadgroup_size_for_pipeline(&FixedPipeline(256), GridSize::linear(1 << 24));
        assert_eq!(size, GridSize::linear(256));
    }

    #[test]
    fn test_threadgroup_clamped_to_grid() {
        let size = threadgroup_size_for_pipeline(&FixedPipeline(1024), GridSize::linear(8));
        assert_eq!(size, GridSize::linear(8));
    }

    #[test]
    fn test_threadgroup_size_is_min_of_max_and_grid() {
        for max in [1, 3, 32, 64, 1024] {
            for width in [1, 2, 7, 64, 1000, 4096] {
                let size = threadgroup_size_for_pipeline(&FixedPipeline(max), GridSize::linear(width));
                assert_eq!(size.width, max.min(width));
                assert_eq!((size.height, size.depth), (1, 1));
            }
        }
    }
}
