//! Rust kernels run by the host device.

use std::collections::BTreeMap;

use crate::device::{ADD_KERNEL, FILL_KERNEL, KernelLibrary};

/// A kernel invocation: global thread index plus the bound buffers by slot.
pub type HostKernel = fn(index: usize, arguments: &mut [&mut [f32]]);

/// Writes the thread index into slot 0.
pub fn fill_array(index: usize, arguments: &mut [&mut [f32]]) {
    if let Some(value) = arguments[0].get_mut(index) {
        *value = index as f32;
    }
}

/// Writes `slot0[i] + slot1[i]` into slot 2.
pub fn add_arrays(index: usize, arguments: &mut [&mut [f32]]) {
    let (Some(&a), Some(&b)) = (arguments[0].get(index), arguments[1].get(index)) else {
        return;
    };
    if let Some(result) = arguments[2].get_mut(index) {
        *result = a + b;
    }
}

/// A named kernel and the number of buffer arguments it reads.
#[derive(Debug, Clone)]
pub struct HostFunction {
    pub(crate) name: String,
    pub(crate) kernel: HostKernel,
    pub(crate) argument_count: u32,
    pub(crate) max_threads_per_threadgroup: Option<usize>,
}

impl HostFunction {
    pub fn new(name: impl Into<String>, argument_count: u32, kernel: HostKernel) -> Self {
        Self {
            name: name.into(),
            kernel,
            argument_count,
            max_threads_per_threadgroup: None,
        }
    }

    /// Cap the threadgroup size below the device limit for this kernel.
    pub fn with_max_threads_per_threadgroup(mut self, max_threads: usize) -> Self {
        self.max_threads_per_threadgroup = Some(max_threads);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostLibrary {
    functions: BTreeMap<String, HostFunction>,
}

impl HostLibrary {
    /// An empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// The library with `fill_array` and `add_arrays`.
    pub fn standard() -> Self {
        Self::new()
            .with_function(HostFunction::new(FILL_KERNEL, 1, fill_array))
            .with_function(HostFunction::new(ADD_KERNEL, 3, add_arrays))
    }

    pub fn with_function(mut self, function: HostFunction) -> Self {
        self.functions.insert(function.name.clone(), function);
        self
    }

    pub fn without_function(mut self, name: &str) -> Self {
        self.functions.remove(name);
        self
    }
}

impl KernelLibrary for HostLibrary {
    type Function = HostFunction;

    fn function(&self, name: &str) -> Option<HostFunction> {
        self.functions.get(name).cloned()
    }

    fn function_names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }
}
