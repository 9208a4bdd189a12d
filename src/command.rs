//! Command buffers and compute encoders.
//!
//! A [`CommandBuffer`] collects encoded passes and is consumed by
//! [`CommandBuffer::commit`], so it can never be re-encoded or resubmitted.
//! A [`ComputeEncoder`] mutably borrows its command buffer, which means only
//! one encoder can record at a time; it is closed by
//! [`ComputeEncoder::end_encoding`] or, on any other exit path, when dropped.

use std::collections::BTreeMap;

use log::debug;

use crate::buffers::SharedBuffer;
use crate::context::DeviceContext;
use crate::device::{ComputeDevice, GridSize, PipelineState, Submission};
use crate::errors::{ExecutionError, ExecutionResult};

/// One closed encoder: a pipeline activation, its bindings and its dispatch.
pub struct EncodedPass<'a, D: ComputeDevice> {
    pipeline: &'a D::Pipeline,
    bindings: BTreeMap<u32, &'a D::Buffer>,
    grid: GridSize,
    threadgroup: GridSize,
}

impl<'a, D: ComputeDevice> EncodedPass<'a, D> {
    pub fn pipeline(&self) -> &'a D::Pipeline {
        self.pipeline
    }

    pub fn binding(&self, index: u32) -> Option<&'a D::Buffer> {
        self.bindings.get(&index).copied()
    }

    /// Bound buffers ordered by argument slot.
    pub fn bindings(&self) -> impl Iterator<Item = (u32, &'a D::Buffer)> + '_ {
        self.bindings.iter().map(|(index, buffer)| (*index, *buffer))
    }

    pub fn grid(&self) -> GridSize {
        self.grid
    }

    pub fn threadgroup(&self) -> GridSize {
        self.threadgroup
    }
}

/// A single unit of work holding zero or more encoded passes.
pub struct CommandBuffer<'a, D: ComputeDevice> {
    context: &'a DeviceContext<D>,
    passes: Vec<EncodedPass<'a, D>>,
    encoders_opened: usize,
}

impl<'a, D: ComputeDevice> CommandBuffer<'a, D> {
    pub(crate) fn new(context: &'a DeviceContext<D>) -> Self {
        Self {
            context,
            passes: Vec::new(),
            encoders_opened: 0,
        }
    }

    /// Open a compute encoder recording into this command buffer.
    pub fn compute_command_encoder(&mut self) -> ComputeEncoder<'_, 'a, D> {
        let index = self.encoders_opened;
        self.encoders_opened += 1;
        ComputeEncoder {
            command_buffer: self,
            index,
            pipeline: None,
            bindings: BTreeMap::new(),
            dispatch: None,
            ended: false,
        }
    }

    /// Number of passes recorded so far.
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Submit the recorded passes to the context's command queue.
    pub fn commit(self) -> ExecutionResult<CommittedCommandBuffer<D>> {
        let pass_count = self.passes.len();
        let submission = self
            .context
            .device()
            .commit(self.context.command_queue(), self.passes)?;
        debug!("Committed command buffer with {} passes", pass_count);

        Ok(CommittedCommandBuffer {
            submission,
            pass_count,
        })
    }
}

/// A command buffer that has been handed to the device.
pub struct CommittedCommandBuffer<D: ComputeDevice> {
    submission: D::Submission,
    pass_count: usize,
}

impl<D: ComputeDevice> CommittedCommandBuffer<D> {
    pub fn pass_count(&self) -> usize {
        self.pass_count
    }

    /// Block until the device reports completion of every pass.
    pub fn wait_until_completed(self) -> ExecutionResult<()> {
        self.submission.wait_until_completed()?;
        debug!("Command buffer completed ({} passes)", self.pass_count);
        Ok(())
    }
}

/// Scoped recording session for one pass of a command buffer.
pub struct ComputeEncoder<'cb, 'a, D: ComputeDevice> {
    command_buffer: &'cb mut CommandBuffer<'a, D>,
    index: usize,
    pipeline: Option<&'a D::Pipeline>,
    bindings: BTreeMap<u32, &'a D::Buffer>,
    dispatch: Option<(GridSize, GridSize)>,
    ended: bool,
}

impl<'cb, 'a, D: ComputeDevice> ComputeEncoder<'cb, 'a, D> {
    pub fn set_compute_pipeline_state(&mut self, pipeline: &'a D::Pipeline) {
        self.pipeline = Some(pipeline);
    }

    /// Bind `buffer` at argument slot `index`.
    pub fn set_buffer(&mut self, buffer: &'a SharedBuffer<'_, D>, index: u32) -> ExecutionResult<()> {
        if !std::ptr::eq(buffer.context(), self.command_buffer.context) {
            return Err(ExecutionError::ForeignBuffer {
                encoder: self.index,
                index,
            });
        }
        self.bindings.insert(index, buffer.raw());
        Ok(())
    }

    /// Record a dispatch of `grid` threads in groups of `threadgroup`.
    pub fn dispatch_threads(&mut self, grid: GridSize, threadgroup: GridSize) -> ExecutionResult<()> {
        let pipeline = self.pipeline.ok_or(ExecutionError::MissingPipeline {
            encoder: self.index,
        })?;
        if self.dispatch.is_some() {
            return Err(ExecutionError::DuplicateDispatch {
                encoder: self.index,
            });
        }
        if grid.is_empty() || threadgroup.is_empty() {
            return Err(ExecutionError::EmptyDispatch {
                encoder: self.index,
            });
        }

        let max_threads = pipeline.max_total_threads_per_threadgroup();
        let exceeds_grid = threadgroup.width > grid.width
            || threadgroup.height > grid.height
            || threadgroup.depth > grid.depth;
        if threadgroup.total() > max_threads || exceeds_grid {
            return Err(ExecutionError::ThreadgroupTooLarge {
                kernel: pipeline.kernel_name().to_string(),
                threadgroup: threadgroup.as_array(),
                grid: grid.as_array(),
                max_threads,
            });
        }

        self.dispatch = Some((grid, threadgroup));
        Ok(())
    }

    /// Close the encoder, making the command buffer available to the next one.
    pub fn end_encoding(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.ended {
            return;
        }
        self.ended = true;

        match (self.pipeline, self.dispatch) {
            (Some(pipeline), Some((grid, threadgroup))) => {
                debug!(
                    "Encoder {} closed: {} grid {} threadgroup {}",
                    self.index,
                    pipeline.kernel_name(),
                    grid,
                    threadgroup
                );
                self.command_buffer.passes.push(EncodedPass {
                    pipeline,
                    bindings: std::mem::take(&mut self.bindings),
                    grid,
                    threadgroup,
                });
            }
            _ => debug!("Encoder {} closed without a dispatch", self.index),
        }
    }
}

impl<D: ComputeDevice> Drop for ComputeEncoder<'_, '_, D> {
    fn drop(&mut self) {
        self.close();
    }
}
