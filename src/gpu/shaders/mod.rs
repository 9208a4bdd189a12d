//! WGSL source of the `fill_array` and `add_arrays` kernels.

/// Threadgroup width used when the adapter reports no workgroup limits.
pub const DEFAULT_THREADS_PER_GROUP: u32 = 64;

/// Get the WGSL kernel library compiled with a fixed threadgroup width.
///
/// WGSL fixes the workgroup size at pipeline creation, so the library is
/// generated per device with the widest threadgroup that device supports.
///
/// # Arguments
/// * `threads_per_group` - Threads per workgroup of both kernels
pub fn get_adder_wgsl(threads_per_group: u32) -> String {
    format!(
        r#"// Array adder kernel library
// Generated with threads_per_group = {threads_per_group}

const THREADS_PER_GROUP: u32 = {threads_per_group}u;

{kernels}
"#,
        threads_per_group = threads_per_group,
        kernels = include_str!("adder.wgsl"),
    )
}
