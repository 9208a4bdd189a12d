//! The three equal-sized buffers of the adder.

use log::debug;

use crate::context::DeviceContext;
use crate::device::{ComputeDevice, DeviceBuffer};
use crate::errors::{AllocationResult, ExecutionResult};

/// A device buffer tagged with the context that allocated it.
pub struct SharedBuffer<'ctx, D: ComputeDevice> {
    raw: D::Buffer,
    context: &'ctx DeviceContext<D>,
    label: &'static str,
}

impl<'ctx, D: ComputeDevice> SharedBuffer<'ctx, D> {
    fn allocate(
        context: &'ctx DeviceContext<D>,
        length: usize,
        label: &'static str,
    ) -> AllocationResult<Self> {
        let raw = context.device().make_buffer(length, label)?;
        debug!("Allocated buffer {} ({} bytes)", label, length);
        Ok(Self {
            raw,
            context,
            label,
        })
    }

    pub fn raw(&self) -> &D::Buffer {
        &self.raw
    }

    pub(crate) fn context(&self) -> &'ctx DeviceContext<D> {
        self.context
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Length in bytes.
    pub fn length(&self) -> usize {
        self.raw.length()
    }

    pub fn element_count(&self) -> usize {
        self.raw.length() / std::mem::size_of::<f32>()
    }

    pub fn contents(&self) -> ExecutionResult<<D::Buffer as DeviceBuffer>::Contents<'_>> {
        self.raw.contents()
    }

    /// Writable host view of the buffer.
    pub fn contents_mut(&self) -> ExecutionResult<<D::Buffer as DeviceBuffer>::ContentsMut<'_>> {
        self.raw.contents_mut()
    }
}

/// Buffers A, B and Result, allocated once and reused for the dispatch.
pub struct BufferPool<'ctx, D: ComputeDevice> {
    a: SharedBuffer<'ctx, D>,
    b: SharedBuffer<'ctx, D>,
    result: SharedBuffer<'ctx, D>,
}

impl<'ctx, D: ComputeDevice> BufferPool<'ctx, D> {
    /// Allocate three buffers of `length` bytes each.
    pub fn allocate(context: &'ctx DeviceContext<D>, length: usize) -> AllocationResult<Self> {
        Ok(Self {
            a: SharedBuffer::allocate(context, length, "A")?,
            b: SharedBuffer::allocate(context, length, "B")?,
            result: SharedBuffer::allocate(context, length, "Result")?,
        })
    }

    pub fn a(&self) -> &SharedBuffer<'ctx, D> {
        &self.a
    }

    pub fn b(&self) -> &SharedBuffer<'ctx, D> {
        &self.b
    }

    pub fn result(&self) -> &SharedBuffer<'ctx, D> {
        &self.result
    }

    /// Length of each buffer in bytes.
    pub fn length(&self) -> usize {
        self.a.length()
    }
}
