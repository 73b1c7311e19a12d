//! Backend tests for hcl-compute, run against software devices.

use hcl_compute::{
    AccessMode, Backend, Blocking, BufferLifetime, BuildOptions, ComputeContext, ComputeError,
    ComputeResult, ContextConfig, DeviceBuffer, Event, Platform, Precision, Program, ProgramSource,
    SoftwareLaunch, WorkShape, describe_backends,
};

const SCALE_SOURCE: &str = r#"
@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform> factor: f32;

@compute @workgroup_size(64)
fn scale(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i < arrayLength(&input)) {
        output[i] = input[i] * factor;
    }
}
"#;

fn scale_kernel(launch: &SoftwareLaunch) -> ComputeResult<()> {
    let input: Vec<f32> = launch.read(0)?;
    let factor = launch.scalar_f32(2)?;
    let out = launch.map_items(|[x, _, _]| input[x as usize] * factor);
    launch.write(1, &out)
}

fn software_context(devices: usize) -> ComputeContext {
    let ctx = ComputeContext::initialize(
        &Platform::software(devices),
        &ContextConfig {
            device_count: devices,
            ..Default::default()
        },
    )
    .unwrap();
    ctx.registry().register("scale", scale_kernel);
    ctx
}

fn scale_program(ctx: &ComputeContext) -> Program<'_> {
    let source = ProgramSource::from_str("scale", SCALE_SOURCE).unwrap();
    Program::build(ctx.queue(), &source, &BuildOptions::default()).unwrap()
}

#[test]
fn test_software_backend_available() {
    assert!(Backend::Software.is_available());
    assert!(describe_backends(&Platform::software(1)).contains("[+] software: 1 device(s)"));
}

#[test]
fn test_scale_roundtrip() {
    let ctx = software_context(1);
    let program = scale_program(&ctx);
    let mut kernel = program.kernel("scale").unwrap();

    let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
    let input = DeviceBuffer::from_slice(ctx.queue(), &data, AccessMode::ReadOnly, BufferLifetime::Transient).unwrap();
    let output = DeviceBuffer::zeroed::<f32>(ctx.queue(), data.len(), AccessMode::ReadWrite, BufferLifetime::Transient).unwrap();

    kernel.set_buffer(0, &input).unwrap();
    kernel.set_buffer(1, &output).unwrap();
    kernel.set_scalar(2, 2.0f32).unwrap();
    kernel.run(&WorkShape::one_d(data.len() as u32)).unwrap();

    let result: Vec<f32> = output.read_vec().unwrap();
    for (i, v) in result.iter().enumerate() {
        approx::assert_relative_eq!(*v, i as f32 * 2.0);
    }
}

#[test]
fn test_nonblocking_then_read() {
    let ctx = software_context(1);
    let program = scale_program(&ctx);
    let mut kernel = program.kernel("scale").unwrap();

    let data = vec![1.5f32; 4096];
    let input = DeviceBuffer::from_slice(ctx.queue(), &data, AccessMode::ReadOnly, BufferLifetime::Transient).unwrap();
    let output = DeviceBuffer::zeroed::<f32>(ctx.queue(), data.len(), AccessMode::ReadWrite, BufferLifetime::Transient).unwrap();
    kernel.set_buffer(0, &input).unwrap();
    kernel.set_buffer(1, &output).unwrap();
    kernel.set_scalar(2, 4.0f32).unwrap();

    let _event = kernel.dispatch(&WorkShape::one_d(4096), Blocking::No).unwrap();
    // read drains the queue first
    let result: Vec<f32> = output.read_vec().unwrap();
    assert!(result.iter().all(|&v| v == 6.0));
    assert_eq!(ctx.queue().pending_count(), 0);
}

#[test]
fn test_events_across_queues() {
    let ctx = software_context(2);
    let mut events = Vec::new();
    let mut outputs = Vec::new();
    let mut kernels = Vec::new();

    for queue in ctx.queues() {
        let source = ProgramSource::from_str("scale", SCALE_SOURCE).unwrap();
        let program = Program::build(queue, &source, &BuildOptions::default()).unwrap();
        let mut kernel = program.kernel("scale").unwrap();
        let input = DeviceBuffer::from_slice(queue, &[1.0f32; 256], AccessMode::ReadOnly, BufferLifetime::Transient).unwrap();
        let output = DeviceBuffer::zeroed::<f32>(queue, 256, AccessMode::ReadWrite, BufferLifetime::Transient).unwrap();
        kernel.set_buffer(0, &input).unwrap();
        kernel.set_buffer(1, &output).unwrap();
        kernel.set_scalar(2, (queue.index() + 1) as f32).unwrap();
        events.push(kernel.dispatch(&WorkShape::one_d(256), Blocking::No).unwrap());
        outputs.push(output);
        kernels.push(kernel);
    }

    Event::wait_all(events).unwrap();
    for (i, output) in outputs.iter().enumerate() {
        let result: Vec<f32> = output.read_vec().unwrap();
        assert!(result.iter().all(|&v| v == (i + 1) as f32));
    }
}

#[test]
fn test_argument_order() {
    let ctx = software_context(1);
    let program = scale_program(&ctx);
    let mut kernel = program.kernel("scale").unwrap();

    let err = kernel.set_scalar(2, 1.0f32).unwrap_err();
    assert!(matches!(err, ComputeError::ArgumentOutOfOrder { index: 2, next: 0, .. }));
    assert_eq!(err.status().code(), -49);

    let err = kernel.set_scalar(3, 1.0f32).unwrap_err();
    assert!(matches!(err, ComputeError::InvalidArgumentIndex { arity: 3, .. }));
}

#[test]
fn test_argument_mismatch() {
    let ctx = software_context(1);
    let program = scale_program(&ctx);
    let mut kernel = program.kernel("scale").unwrap();

    // scalar into a storage binding
    assert!(matches!(kernel.set_scalar(0, 1u32), Err(ComputeError::ArgumentMismatch { .. })));

    let ro = DeviceBuffer::zeroed::<f32>(ctx.queue(), 4, AccessMode::ReadOnly, BufferLifetime::Transient).unwrap();
    kernel.set_buffer(0, &ro).unwrap();
    // read-only buffer into read_write storage
    assert!(matches!(kernel.set_buffer(1, &ro), Err(ComputeError::ArgumentMismatch { .. })));
}

#[test]
fn test_unbound_argument() {
    let ctx = software_context(1);
    let program = scale_program(&ctx);
    let mut kernel = program.kernel("scale").unwrap();
    let buf = DeviceBuffer::zeroed::<f32>(ctx.queue(), 4, AccessMode::ReadWrite, BufferLifetime::Transient).unwrap();
    kernel.set_buffer(0, &buf).unwrap();
    kernel.set_buffer(1, &buf).unwrap();

    let err = kernel.run(&WorkShape::one_d(4)).unwrap_err();
    assert!(matches!(err, ComputeError::UnboundArgument { index: 2, .. }));

    kernel.clear_args();
    assert!(matches!(kernel.run(&WorkShape::one_d(4)), Err(ComputeError::UnboundArgument { index: 0, .. })));
}

#[test]
fn test_buffer_size_mismatch() {
    let ctx = software_context(1);
    let buf = DeviceBuffer::zeroed::<u32>(ctx.queue(), 8, AccessMode::ReadWrite, BufferLifetime::Transient).unwrap();
    assert!(matches!(buf.write(&[0u32; 7]), Err(ComputeError::BufferSizeMismatch { expected: 32, actual: 28 })));
    let mut short = [0u32; 9];
    assert!(matches!(buf.read(&mut short), Err(ComputeError::BufferSizeMismatch { .. })));
}

#[test]
fn test_zero_allocation() {
    let ctx = software_context(1);
    let err = DeviceBuffer::allocate(ctx.queue(), 0, AccessMode::ReadWrite, BufferLifetime::Transient).unwrap_err();
    assert!(matches!(err, ComputeError::Allocation(_)));
    assert_eq!(err.status().code(), -4);
}

#[test]
fn test_missing_host_kernel_fails_build() {
    let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
    let source = ProgramSource::from_str("scale", SCALE_SOURCE).unwrap();
    let err = Program::build(ctx.queue(), &source, &BuildOptions::default()).unwrap_err();
    assert!(err.build_log().unwrap().contains("'scale'"));
    assert_eq!(err.status().code(), -11);
}

#[test]
fn test_entry_point_not_found() {
    let ctx = software_context(1);
    let program = scale_program(&ctx);
    let err = program.kernel("missing").unwrap_err();
    assert!(matches!(err, ComputeError::EntryPointNotFound(_)));
    assert_eq!(err.status().code(), -46);
}

#[test]
fn test_double_precision_on_software() {
    let ctx = software_context(1);
    let source = ProgramSource::from_str("scale", SCALE_SOURCE).unwrap();
    let program = Program::build(ctx.queue(), &source, &BuildOptions::new(Precision::Double)).unwrap();
    assert_eq!(program.precision(), Precision::Double);
}

#[test]
fn test_oversized_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("huge.wgsl");
    std::fs::write(&path, vec![b' '; hcl_compute::MAX_SOURCE_SIZE as usize + 1]).unwrap();

    let err = ProgramSource::from_file(&path).unwrap_err();
    assert!(matches!(err, ComputeError::SourceTooLarge { .. }));

    let ok = dir.path().join("scale.wgsl");
    std::fs::write(&ok, SCALE_SOURCE).unwrap();
    let source = ProgramSource::from_file(&ok).unwrap();
    assert_eq!(source.name(), "scale");
}

#[test]
fn test_missing_file_source() {
    let err = ProgramSource::from_file("/nonexistent/kernel.wgsl").unwrap_err();
    assert!(matches!(err, ComputeError::SourceRead { .. }));
}

#[test]
fn test_teardown_and_reinitialize() {
    let platform = Platform::software(1);
    let ctx = ComputeContext::initialize(&platform, &ContextConfig::default()).unwrap();
    ctx.teardown().unwrap();
    let ctx = ComputeContext::initialize(&platform, &ContextConfig::default()).unwrap();
    ctx.teardown().unwrap();
}
