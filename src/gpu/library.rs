//! WGSL kernel library: a compiled shader module and its compute entry points.

use std::sync::Arc;

use crate::device::KernelLibrary;
use crate::errors::{InitializationError, InitializationResult};

/// A compute entry point of a [`WgslLibrary`].
#[derive(Debug, Clone)]
pub struct WgslFunction {
    pub(crate) name: String,
    pub(crate) workgroup_size: [u32; 3],
    pub(crate) module: Arc<wgpu::ShaderModule>,
}

impl WgslFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }
}

#[derive(Debug)]
pub struct WgslLibrary {
    module: Arc<wgpu::ShaderModule>,
    entry_points: Vec<(String, [u32; 3])>,
}

/// Names and workgroup sizes of the compute entry points in `source`.
pub fn compute_entry_points(source: &str) -> InitializationResult<Vec<(String, [u32; 3])>> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        InitializationError::LibraryUnavailable {
            message: e.emit_to_string(source),
        }
    })?;

    Ok(module
        .entry_points
        .iter()
        .filter(|entry| entry.stage == naga::ShaderStage::Compute)
        .map(|entry| (entry.name.clone(), entry.workgroup_size))
        .collect())
}

impl WgslLibrary {
    pub(crate) fn new(
        module: wgpu::ShaderModule,
        entry_points: Vec<(String, [u32; 3])>,
    ) -> Self {
        Self {
            module: Arc::new(module),
            entry_points,
        }
    }
}

impl KernelLibrary for WgslLibrary {
    type Function = WgslFunction;

    fn function(&self, name: &str) -> Option<WgslFunction> {
        self.entry_points
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(entry, workgroup_size)| WgslFunction {
                name: entry.clone(),
                workgroup_size: *workgroup_size,
                module: Arc::clone(&self.module),
            })
    }

    fn function_names(&self) -> Vec<String> {
        self.entry_points
            .iter()
            .map(|(entry, _)| entry.clone())
            .collect()
    }
}
