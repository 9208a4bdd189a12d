//! [`ComputeDevice`] implementation on top of wgpu.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, mpsc};

use log::{debug, info, warn};

use crate::command::EncodedPass;
use crate::device::{ComputeDevice, DeviceBuffer, PipelineState, Submission};
use crate::errors::{
    AllocationError, AllocationResult, ExecutionError, ExecutionResult, InitializationError,
    InitializationResult,
};
use crate::gpu::library::{WgslFunction, WgslLibrary, compute_entry_points};
use crate::gpu::shaders::{DEFAULT_THREADS_PER_GROUP, get_adder_wgsl};

/// Last error the device reported outside of an error scope.
type FaultSlot = Arc<Mutex<Option<String>>>;

/// A GPU acquired through wgpu, with its queue and kernel library source.
pub struct WgpuDevice {
    adapter_info: wgpu::AdapterInfo,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    limits: wgpu::Limits,
    shared_memory: bool,
    library_source: String,
    fault: FaultSlot,
}

impl WgpuDevice {
    /// Acquire the default high performance adapter with the bundled kernels.
    pub fn system_default() -> InitializationResult<Self> {
        pollster::block_on(Self::request(None))
    }

    /// Acquire the default adapter with a custom WGSL kernel library.
    pub fn with_library_source(source: impl Into<String>) -> InitializationResult<Self> {
        pollster::block_on(Self::request(Some(source.into())))
    }

    async fn request(library_source: Option<String>) -> InitializationResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| InitializationError::DeviceUnavailable {
                message: "no compatible GPU adapter found".to_string(),
            })?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        // Host visible storage buffers only pay off when host and device share memory.
        let shared_memory = adapter
            .features()
            .contains(wgpu::Features::MAPPABLE_PRIMARY_BUFFERS)
            && matches!(
                adapter_info.device_type,
                wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::Cpu
            );
        let required_features = if shared_memory {
            wgpu::Features::MAPPABLE_PRIMARY_BUFFERS
        } else {
            wgpu::Features::empty()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("array-adder"),
                    required_features,
                    required_limits: limits.clone(),
                    ..Default::default()
                },
                None,
            )
            .await
            .map_err(|e| InitializationError::DeviceUnavailable {
                message: e.to_string(),
            })?;

        let fault: FaultSlot = Arc::new(Mutex::new(None));
        let handler_fault = Arc::clone(&fault);
        device.on_uncaptured_error(Box::new(move |error| {
            warn!("Uncaptured device error: {}", error);
            if let Ok(mut slot) = handler_fault.lock() {
                slot.get_or_insert_with(|| error.to_string());
            }
        }));

        let threads_per_group = match limits
            .max_compute_invocations_per_workgroup
            .min(limits.max_compute_workgroup_size_x)
        {
            0 => DEFAULT_THREADS_PER_GROUP,
            width => width,
        };
        let library_source = library_source.unwrap_or_else(|| get_adder_wgsl(threads_per_group));

        info!(
            "Selected {} ({:?}, {:?}), shared memory: {}",
            adapter_info.name, adapter_info.backend, adapter_info.device_type, shared_memory
        );

        Ok(Self {
            adapter_info,
            device: Arc::new(device),
            queue: Arc::new(queue),
            limits,
            shared_memory,
            library_source,
            fault,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Whether buffers are mapped in place instead of through staging copies.
    pub fn has_shared_memory(&self) -> bool {
        self.shared_memory
    }

    /// Largest buffer, in bytes, that can also be bound as a storage buffer.
    pub fn max_buffer_length(&self) -> u64 {
        self.limits
            .max_buffer_size
            .min(self.limits.max_storage_buffer_binding_size as u64)
    }

    fn scoped<T>(&self, filter: wgpu::ErrorFilter, body: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(filter);
        let value = body();
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }
}

/// Workgroup counts covering `groups` groups within the per dimension limit.
pub fn workgroup_counts(groups: usize, max_per_dimension: u32) -> Option<(u32, u32)> {
    let max = max_per_dimension.max(1) as usize;
    let x = groups.clamp(1, max);
    let y = groups.div_ceil(x).max(1);
    if y > max {
        return None;
    }
    Some((x as u32, y as u32))
}

/// Map an error captured while creating a buffer to an allocation failure.
fn allocation_failure(label: &str, requested: u64, error: wgpu::Error) -> AllocationError {
    match error {
        wgpu::Error::OutOfMemory { .. } => AllocationError::OutOfMemory {
            label: label.to_string(),
            requested,
        },
        other => AllocationError::Rejected {
            label: label.to_string(),
            message: other.to_string(),
        },
    }
}

#[derive(Debug)]
pub struct WgpuPipeline {
    name: String,
    raw: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    max_threads: usize,
}

impl PipelineState for WgpuPipeline {
    fn kernel_name(&self) -> &str {
        &self.name
    }

    fn max_total_threads_per_threadgroup(&self) -> usize {
        self.max_threads
    }
}

pub struct WgpuQueue {
    queue: Arc<wgpu::Queue>,
}

#[derive(Debug)]
pub struct WgpuBuffer {
    storage: wgpu::Buffer,
    readback: Option<wgpu::Buffer>,
    length: usize,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

/// Mapped host view of a [`WgpuBuffer`]; unmaps on drop.
pub struct WgpuContents<'a> {
    view: Option<wgpu::BufferView<'a>>,
    buffer: &'a wgpu::Buffer,
}

impl Deref for WgpuContents<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        match &self.view {
            Some(view) => bytemuck::cast_slice(&view[..]),
            None => &[],
        }
    }
}

impl Drop for WgpuContents<'_> {
    fn drop(&mut self) {
        self.view.take();
        self.buffer.unmap();
    }
}

/// Host copy of a [`WgpuBuffer`] that is written back through the queue on
/// drop, ahead of any later submission.
pub struct WgpuContentsMut<'a> {
    data: Vec<f32>,
    buffer: &'a WgpuBuffer,
}

impl Deref for WgpuContentsMut<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.data
    }
}

impl DerefMut for WgpuContentsMut<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

impl Drop for WgpuContentsMut<'_> {
    fn drop(&mut self) {
        let bytes: &[u8] = bytemuck::cast_slice(&self.data);
        let queue = &self.buffer.queue;
        queue.write_buffer(&self.buffer.storage, 0, bytes);
        if let Some(readback) = &self.buffer.readback {
            queue.write_buffer(readback, 0, bytes);
        }
        // Flush the staged writes so a later map observes them.
        queue.submit(std::iter::empty());
    }
}

impl DeviceBuffer for WgpuBuffer {
    type Contents<'a> = WgpuContents<'a>;
    type ContentsMut<'a> = WgpuContentsMut<'a>;

    fn length(&self) -> usize {
        self.length
    }

    fn contents(&self) -> ExecutionResult<WgpuContents<'_>> {
        let buffer = self.readback.as_ref().unwrap_or(&self.storage);
        let slice = buffer.slice(..);

        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| ExecutionError::MapFailed {
                message: e.to_string(),
            })?
            .map_err(|e| ExecutionError::MapFailed {
                message: e.to_string(),
            })?;

        Ok(WgpuContents {
            view: Some(slice.get_mapped_range()),
            buffer,
        })
    }

    fn contents_mut(&self) -> ExecutionResult<WgpuContentsMut<'_>> {
        let data = self.contents()?.to_vec();
        Ok(WgpuContentsMut { data, buffer: self })
    }
}

pub struct WgpuSubmission {
    device: Arc<wgpu::Device>,
    index: wgpu::SubmissionIndex,
    fault: FaultSlot,
}

impl Submission for WgpuSubmission {
    fn wait_until_completed(self) -> ExecutionResult<()> {
        let _ = self
            .device
            .poll(wgpu::Maintain::WaitForSubmissionIndex(self.index));

        let fault = self
            .fault
            .lock()
            .map_err(|_| ExecutionError::DeviceFault {
                message: "device error handler panicked".to_string(),
            })?
            .take();
        match fault {
            Some(message) => Err(ExecutionError::DeviceFault { message }),
            None => Ok(()),
        }
    }
}

impl ComputeDevice for WgpuDevice {
    type Library = WgslLibrary;
    type Pipeline = WgpuPipeline;
    type Buffer = WgpuBuffer;
    type Queue = WgpuQueue;
    type Submission = WgpuSubmission;

    fn name(&self) -> String {
        format!("{} ({:?})", self.adapter_info.name, self.adapter_info.backend)
    }

    fn make_default_library(&self) -> InitializationResult<WgslLibrary> {
        let entry_points = compute_entry_points(&self.library_source)?;

        let (module, error) = self.scoped(wgpu::ErrorFilter::Validation, || {
            self.device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some("Array Adder Library"),
                    source: wgpu::ShaderSource::Wgsl(self.library_source.as_str().into()),
                })
        });
        if let Some(error) = error {
            return Err(InitializationError::LibraryUnavailable {
                message: error.to_string(),
            });
        }

        debug!("Loaded WGSL library with entry points {:?}", entry_points);
        Ok(WgslLibrary::new(module, entry_points))
    }

    fn make_compute_pipeline_state(
        &self,
        function: &WgslFunction,
    ) -> InitializationResult<WgpuPipeline> {
        let max_threads = function.workgroup_size.iter().product::<u32>() as usize;
        if max_threads > self.limits.max_compute_invocations_per_workgroup as usize {
            return Err(InitializationError::PipelineCompilation {
                kernel: function.name.clone(),
                message: format!(
                    "workgroup of {} threads exceeds the device limit of {}",
                    max_threads, self.limits.max_compute_invocations_per_workgroup
                ),
            });
        }

        let (raw, error) = self.scoped(wgpu::ErrorFilter::Validation, || {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(function.name.as_str()),
                    layout: None,
                    module: &function.module,
                    entry_point: Some(function.name.as_str()),
                    compilation_options: Default::default(),
                    cache: None,
                })
        });
        if let Some(error) = error {
            return Err(InitializationError::PipelineCompilation {
                kernel: function.name.clone(),
                message: error.to_string(),
            });
        }

        let bind_group_layout = raw.get_bind_group_layout(0);
        Ok(WgpuPipeline {
            name: function.name.clone(),
            raw,
            bind_group_layout,
            max_threads,
        })
    }

    fn make_command_queue(&self) -> InitializationResult<WgpuQueue> {
        Ok(WgpuQueue {
            queue: Arc::clone(&self.queue),
        })
    }

    fn make_buffer(&self, length: usize, label: &str) -> AllocationResult<WgpuBuffer> {
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
        let limit = self.max_buffer_length();
        if length as u64 > limit {
            return Err(AllocationError::ExceedsDeviceLimit {
                label: label.to_string(),
                requested: length as u64,
                limit,
            });
        }

        let mut usage = wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST;
        if self.shared_memory {
            usage |= wgpu::BufferUsages::MAP_READ;
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let ((storage, readback), validation) = self.scoped(wgpu::ErrorFilter::Validation, || {
            let storage = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: length as u64,
                usage,
                mapped_at_creation: false,
            });
            let readback_label = format!("{label} Readback");
            let readback = (!self.shared_memory).then(|| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(readback_label.as_str()),
                    size: length as u64,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            });
            (storage, readback)
        });
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(error) = out_of_memory.or(validation) {
            return Err(allocation_failure(label, length as u64, error));
        }

        Ok(WgpuBuffer {
            storage,
            readback,
            length,
            device: Arc::clone(&self.device),
            queue: Arc::clone(&self.queue),
        })
    }

    fn commit(
        &self,
        queue: &WgpuQueue,
        passes: Vec<EncodedPass<'_, Self>>,
    ) -> ExecutionResult<WgpuSubmission> {
        let max_per_dimension = self.limits.max_compute_workgroups_per_dimension;
        let mut dispatches = Vec::with_capacity(passes.len());
        for pass in &passes {
            let groups = pass.grid().total().div_ceil(pass.threadgroup().total());
            let counts = workgroup_counts(groups, max_per_dimension)
                .ok_or(ExecutionError::GridTooLarge { groups })?;
            dispatches.push(counts);
        }

        let (index, error) = self.scoped(wgpu::ErrorFilter::Validation, || {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Array Adder Commands"),
                });

            for (pass, (x, y)) in passes.iter().zip(&dispatches) {
                let pipeline = pass.pipeline();
                let entries: Vec<wgpu::BindGroupEntry<'_>> = pass
                    .bindings()
                    .map(|(binding, buffer)| wgpu::BindGroupEntry {
                        binding,
                        resource: buffer.storage.as_entire_binding(),
                    })
                    .collect();
                let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(pipeline.name.as_str()),
                    layout: &pipeline.bind_group_layout,
                    entries: &entries,
                });

                let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(pipeline.name.as_str()),
                    timestamp_writes: None,
                });
                compute_pass.set_pipeline(&pipeline.raw);
                compute_pass.set_bind_group(0, &bind_group, &[]);
                compute_pass.dispatch_workgroups(*x, *y, 1);
            }

            // Staging copies go last so they observe every pass.
            let mut copied: Vec<&WgpuBuffer> = Vec::new();
            for (_, buffer) in passes.iter().flat_map(|pass| pass.bindings()) {
                if copied.iter().any(|seen| std::ptr::eq(*seen, buffer)) {
                    continue;
                }
                if let Some(readback) = &buffer.readback {
                    encoder.copy_buffer_to_buffer(
                        &buffer.storage,
                        0,
                        readback,
                        0,
                        buffer.length as u64,
                    );
                }
                copied.push(buffer);
            }

            queue.queue.submit(Some(encoder.finish()))
        });
        if let Some(error) = error {
            return Err(ExecutionError::Validation {
                message: error.to_string(),
            });
        }

        Ok(WgpuSubmission {
            device: Arc::clone(&self.device),
            index,
            fault: Arc::clone(&self.fault),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_counts_fit_one_dimension() {
        assert_eq!(workgroup_counts(1, 65535), Some((1, 1)));
        assert_eq!(workgroup_counts(16384, 65535), Some((16384, 1)));
    }

    #[test]
    fn test_workgroup_counts_fold_into_two_dimensions() {
        // 2^24 elements in groups of 256.
        let (x, y) = workgroup_counts(65536, 65535).unwrap();
        assert_eq!((x, y), (65535, 2));
        assert!(x as usize * y as usize >= 65536);
    }

    #[test]
    fn test_buffer_validation_error_is_allocation_error() {
        let error = wgpu::Error::Validation {
            source: Box::new(std::io::Error::other("usage MAP_WRITE is not allowed")),
            description: "usage MAP_WRITE is not allowed".to_string(),
        };

        match allocation_failure("A", 32, error) {
            AllocationError::Rejected { label, message } => {
                assert_eq!(label, "A");
                assert!(message.contains("MAP_WRITE"));
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn test_buffer_out_of_memory_error() {
        let error = wgpu::Error::OutOfMemory {
            source: Box::new(std::io::Error::other("out of memory")),
        };

        assert!(matches!(
            allocation_failure("Result", 64, error),
            AllocationError::OutOfMemory { requested: 64, .. }
        ));
    }

    #[test]
    fn test_workgroup_counts_too_large() {
        assert_eq!(workgroup_counts(10 * 10 + 1, 10), None);
    }
}
