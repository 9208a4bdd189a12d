//! End to end dispatch tests on the host reference device.

use array_adder::command::CommandBuffer;
use array_adder::errors::{AdderError, ExecutionError};
use array_adder::host::kernels;
use array_adder::{
    AdderConfig, ArrayAdder, BufferPool, DeviceContext, GridSize, HostDevice, HostFunction,
    HostLibrary, PipelineState, VerifyMode, run, threadgroup_size_for_pipeline,
};

const HOST_A: [f32; 8] = [0.1, -3.5, 1e7, f32::MIN_POSITIVE, 1.0, -0.0, 65504.0, 3.0e-5];
const HOST_B: [f32; 8] = [0.2, 3.5, 1.0, f32::MIN_POSITIVE, -1.0, 0.0, 0.5, -7.25];

fn expected_sums(length: usize) -> Vec<f32> {
    (0..length).map(|i| 2.0 * i as f32).collect()
}

#[test]
fn test_eight_elements_sum_to_twice_index() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let config = AdderConfig::new().with_array_length(8);
    let adder = ArrayAdder::new(&context, &config).unwrap();

    let report = adder.send_compute_command().unwrap();

    assert!(report.is_success());
    assert_eq!(report.checked, 8);
    let a = adder.buffers().a().contents().unwrap();
    let b = adder.buffers().b().contents().unwrap();
    let result = adder.buffers().result().contents().unwrap();
    assert_eq!(&*a, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    assert_eq!(&*b, &*a);
    assert_eq!(&*result, expected_sums(8).as_slice());
}

#[test]
fn test_single_element() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let config = AdderConfig::new().with_array_length(1);
    let adder = ArrayAdder::new(&context, &config).unwrap();

    assert_eq!(
        threadgroup_size_for_pipeline(context.add_pipeline(), adder.grid_size()),
        GridSize::linear(1)
    );

    let report = adder.send_compute_command().unwrap();
    assert!(report.is_success());
    assert_eq!(report.checked, 1);
    assert_eq!(&*adder.buffers().result().contents().unwrap(), &[0.0]);
}

#[test]
fn test_run_with_verbose_verification() {
    let device = HostDevice::new();
    let stats = device.stats();
    let config = AdderConfig::new()
        .with_array_length(1000)
        .with_verify_mode(VerifyMode::Verbose);

    let report = run(device, &config).unwrap();

    assert!(report.is_success());
    assert_eq!(report.checked, 1000);
    assert_eq!(stats.allocated_buffers(), 3);
    assert_eq!(stats.compiled_pipelines(), 2);
    assert_eq!(stats.committed_command_buffers(), 1);
}

#[test]
fn test_grid_larger_than_threadgroup() {
    let device = HostDevice::new().with_max_threads_per_threadgroup(64);
    let context = DeviceContext::initialize(device).unwrap();
    let config = AdderConfig::new().with_array_length(1000);
    let adder = ArrayAdder::new(&context, &config).unwrap();

    // 1000 is not a multiple of 64; the trailing partial group must still run.
    assert_eq!(
        threadgroup_size_for_pipeline(context.fill_pipeline(), adder.grid_size()),
        GridSize::linear(64)
    );

    let report = adder.send_compute_command().unwrap();
    assert!(report.is_success());
    assert_eq!(
        &*adder.buffers().result().contents().unwrap(),
        expected_sums(1000).as_slice()
    );
}

#[test]
fn test_threadgroup_follows_each_pipeline() {
    let library = HostLibrary::standard().with_function(
        HostFunction::new("add_arrays", 3, kernels::add_arrays).with_max_threads_per_threadgroup(3),
    );
    let device = HostDevice::new()
        .with_max_threads_per_threadgroup(32)
        .with_library(library);
    let context = DeviceContext::initialize(device).unwrap();
    let config = AdderConfig::new().with_array_length(8);
    let adder = ArrayAdder::new(&context, &config).unwrap();

    assert_eq!(context.fill_pipeline().max_total_threads_per_threadgroup(), 32);
    assert_eq!(context.add_pipeline().max_total_threads_per_threadgroup(), 3);
    assert_eq!(
        threadgroup_size_for_pipeline(context.fill_pipeline(), adder.grid_size()),
        GridSize::linear(8)
    );
    assert_eq!(
        threadgroup_size_for_pipeline(context.add_pipeline(), adder.grid_size()),
        GridSize::linear(3)
    );

    let report = adder.send_compute_command().unwrap();
    assert!(report.is_success());
}

#[test]
fn test_add_encoded_first_reads_stale_inputs() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let config = AdderConfig::new().with_array_length(8);
    let adder = ArrayAdder::new(&context, &config).unwrap();

    let mut command_buffer = context.make_command_buffer();
    adder.encode_add(&mut command_buffer).unwrap();
    adder.encode_fill(&mut command_buffer, adder.buffers().a()).unwrap();
    adder.encode_fill(&mut command_buffer, adder.buffers().b()).unwrap();
    assert_eq!(command_buffer.pass_count(), 3);
    command_buffer.commit().unwrap().wait_until_completed().unwrap();

    let report = adder.verify().unwrap();

    // The add pass saw zero-initialized inputs, so only index 0 is correct.
    assert!(!report.is_success());
    assert_eq!(report.mismatch_count, 7);
    assert_eq!(&*adder.buffers().result().contents().unwrap(), &[0.0; 8]);
    let first = report.mismatches[0];
    assert_eq!(first.index, 1);
    assert_eq!(first.result, 0.0);
    assert_eq!(first.expected(), 2.0);
}

#[test]
fn test_one_command_buffer_per_dispatch() {
    let device = HostDevice::new();
    let stats = device.stats();
    let context = DeviceContext::initialize(device).unwrap();
    let config = AdderConfig::new().with_array_length(16);
    let adder = ArrayAdder::new(&context, &config).unwrap();

    adder.dispatch().unwrap();
    assert_eq!(stats.committed_command_buffers(), 1);

    // Dispatching again on the same buffers is idempotent.
    adder.dispatch().unwrap();
    assert_eq!(stats.committed_command_buffers(), 2);
    assert!(adder.verify().unwrap().is_success());
}

fn faulting_kernel(index: usize, _arguments: &mut [&mut [f32]]) {
    if index == 3 {
        panic!("illegal address at index 3");
    }
}

#[test]
fn test_kernel_fault_reported() {
    let library =
        HostLibrary::standard().with_function(HostFunction::new("add_arrays", 3, faulting_kernel));
    let device = HostDevice::new().with_library(library);
    let config = AdderConfig::new().with_array_length(8);

    let result = run(device, &config);

    match result {
        Err(AdderError::Execution(ExecutionError::DeviceFault { message })) => {
            assert!(message.contains("illegal address"));
        }
        other => panic!("Expected a device fault, got {:?}", other),
    }
}

#[test]
fn test_missing_binding_rejected_at_commit() {
    let device = HostDevice::new();
    let stats = device.stats();
    let context = DeviceContext::initialize(device).unwrap();
    let buffers = BufferPool::allocate(&context, 32).unwrap();

    let mut command_buffer = context.make_command_buffer();
    {
        let mut encoder = command_buffer.compute_command_encoder();
        encoder.set_compute_pipeline_state(context.add_pipeline());
        encoder.set_buffer(buffers.a(), 0).unwrap();
        encoder.set_buffer(buffers.b(), 1).unwrap();
        encoder
            .dispatch_threads(GridSize::linear(8), GridSize::linear(8))
            .unwrap();
        encoder.end_encoding();
    }

    let result = command_buffer.commit();
    assert!(matches!(
        result,
        Err(ExecutionError::MissingBinding { index: 2, .. })
    ));
    assert_eq!(stats.committed_command_buffers(), 0);
}

#[test]
fn test_aliased_binding_rejected() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let buffers = BufferPool::allocate(&context, 32).unwrap();

    let mut command_buffer = context.make_command_buffer();
    {
        let mut encoder = command_buffer.compute_command_encoder();
        encoder.set_compute_pipeline_state(context.add_pipeline());
        encoder.set_buffer(buffers.a(), 0).unwrap();
        encoder.set_buffer(buffers.b(), 1).unwrap();
        encoder.set_buffer(buffers.a(), 2).unwrap();
        encoder
            .dispatch_threads(GridSize::linear(8), GridSize::linear(8))
            .unwrap();
    }

    assert!(matches!(
        command_buffer.commit(),
        Err(ExecutionError::AliasedBinding {
            first: 0,
            second: 2,
            ..
        })
    ));
}

#[test]
fn test_buffer_from_another_context_rejected() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let other = DeviceContext::initialize(HostDevice::new()).unwrap();
    let foreign = BufferPool::allocate(&other, 32).unwrap();

    let mut command_buffer: CommandBuffer<'_, HostDevice> = context.make_command_buffer();
    let mut encoder = command_buffer.compute_command_encoder();
    encoder.set_compute_pipeline_state(context.fill_pipeline());

    assert!(matches!(
        encoder.set_buffer(foreign.a(), 0),
        Err(ExecutionError::ForeignBuffer {
            encoder: 0,
            index: 0
        })
    ));
}

#[test]
fn test_encoder_misuse() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let mut command_buffer = context.make_command_buffer();

    {
        let mut encoder = command_buffer.compute_command_encoder();
        assert!(matches!(
            encoder.dispatch_threads(GridSize::linear(8), GridSize::linear(8)),
            Err(ExecutionError::MissingPipeline { encoder: 0 })
        ));

        encoder.set_compute_pipeline_state(context.fill_pipeline());
        assert!(matches!(
            encoder.dispatch_threads(GridSize::linear(0), GridSize::linear(1)),
            Err(ExecutionError::EmptyDispatch { .. })
        ));
        assert!(matches!(
            encoder.dispatch_threads(GridSize::linear(8), GridSize::linear(16)),
            Err(ExecutionError::ThreadgroupTooLarge { max_threads: 1024, .. })
        ));
        assert!(matches!(
            encoder.dispatch_threads(GridSize::linear(4096), GridSize::linear(2048)),
            Err(ExecutionError::ThreadgroupTooLarge { .. })
        ));

        encoder
            .dispatch_threads(GridSize::linear(8), GridSize::linear(8))
            .unwrap();
        assert!(matches!(
            encoder.dispatch_threads(GridSize::linear(8), GridSize::linear(8)),
            Err(ExecutionError::DuplicateDispatch { encoder: 0 })
        ));
    }

    {
        // An encoder without a dispatch records nothing.
        let mut encoder = command_buffer.compute_command_encoder();
        encoder.set_compute_pipeline_state(context.add_pipeline());
    }

    assert_eq!(command_buffer.pass_count(), 1);
}

#[test]
fn test_buffer_pool_labels_and_lengths() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let buffers = BufferPool::allocate(&context, 40).unwrap();

    let labels = [buffers.a().label(), buffers.b().label(), buffers.result().label()];
    assert_eq!(labels, ["A", "B", "Result"]);
    assert_eq!(buffers.length(), 40);
    assert_eq!(buffers.result().element_count(), 10);
}

#[test]
fn test_add_host_written_inputs() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let config = AdderConfig::new().with_array_length(HOST_A.len());
    let adder = ArrayAdder::new(&context, &config).unwrap();

    adder
        .buffers()
        .a()
        .contents_mut()
        .unwrap()
        .copy_from_slice(&HOST_A);
    adder
        .buffers()
        .b()
        .contents_mut()
        .unwrap()
        .copy_from_slice(&HOST_B);

    let mut command_buffer = context.make_command_buffer();
    adder.encode_add(&mut command_buffer).unwrap();
    command_buffer.commit().unwrap().wait_until_completed().unwrap();

    let expected: Vec<f32> = HOST_A.iter().zip(&HOST_B).map(|(a, b)| a + b).collect();
    assert_eq!(&*adder.buffers().result().contents().unwrap(), expected.as_slice());
    assert!(adder.verify().unwrap().is_success());
}

#[test]
fn test_host_written_result_detected_as_mismatch() {
    let context = DeviceContext::initialize(HostDevice::new()).unwrap();
    let config = AdderConfig::new().with_array_length(4);
    let adder = ArrayAdder::new(&context, &config).unwrap();
    adder.dispatch().unwrap();

    adder.buffers().result().contents_mut().unwrap()[2] = 5.0;

    let report = adder.verify().unwrap();
    assert_eq!(report.mismatch_count, 1);
    assert_eq!(report.mismatches[0].index, 2);
    assert_eq!(report.mismatches[0].result, 5.0);
    assert_eq!(report.mismatches[0].expected(), 4.0);
}
