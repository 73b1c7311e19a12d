//! End-to-end runs of every algorithm module on software devices.

use hcl_compute::{ComputeContext, ComputeError, ContextConfig, Platform, Precision, StatusCode};
use hcl_kernels::mandelbrot::{MAX_NUM_ITERATIONS, REFERENCE_HEIGHT, REFERENCE_WIDTH};
use hcl_kernels::{
    Algorithm, Config, KernelError, Mandelbrot, Modulo, Rot13, Sine, Viewport, Visualizer, modulo, sine,
};

fn context(devices: usize) -> ComputeContext {
    ComputeContext::initialize(
        &Platform::software(devices),
        &ContextConfig {
            device_count: devices,
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn test_rot13_involution() {
    let ctx = context(1);
    let mut rot13 = Rot13::init(&ctx, &Config::default()).unwrap();

    let encoded = rot13.encode("Hello, World!").unwrap();
    assert_eq!(encoded, "Uryyb, Jbeyq!");
    assert_eq!(rot13.encode(&encoded).unwrap(), "Hello, World!");
}

#[test]
fn test_rot13_non_ascii_untouched() {
    let ctx = context(1);
    let mut rot13 = Rot13::init(&ctx, &Config::default()).unwrap();
    assert_eq!(rot13.encode("Grüße 123").unwrap(), "Teüßr 123");
}

#[test]
fn test_sine_reference() {
    let ctx = context(1);
    let mut sine = Sine::init(&ctx, &Config::default()).unwrap();

    let mut data = sine::reference_input(sine::REFERENCE_LEN);
    sine.run(&mut data).unwrap();
    for (i, v) in data.iter().enumerate() {
        approx::assert_abs_diff_eq!(*v, (i as f32).sin(), epsilon = 1e-5);
    }
}

#[test]
fn test_sine_reusable() {
    let ctx = context(1);
    let mut sine = Sine::init(&ctx, &Config::default()).unwrap();
    for len in [1, 63, 64, 65, 1000] {
        let mut data = vec![0.5f32; len];
        sine.run(&mut data).unwrap();
        assert!(data.iter().all(|v| (*v - 0.5f32.sin()).abs() < 1e-6));
    }
}

#[test]
fn test_modulo_table() {
    let ctx = context(1);
    let mut modulo = Modulo::init(&ctx, &Config::default()).unwrap();

    let (amount, modulus): (Vec<f32>, Vec<f32>) = modulo::REFERENCE_TABLE.iter().copied().unzip();
    let out = modulo.compute(&amount, &modulus).unwrap();

    for ((a, m), r) in amount.iter().zip(&modulus).zip(&out) {
        if *m == 0.0 {
            assert!(r.is_nan());
        } else {
            approx::assert_relative_eq!(*r, a - (a / m).floor() * m);
        }
    }
    approx::assert_relative_eq!(out[1], 2.0);
}

#[test]
fn test_mandelbrot_reference_points() {
    let ctx = context(1);
    let mut renderer = Mandelbrot::init(&ctx, &Config::default()).unwrap();

    let viewport = Viewport::standard(REFERENCE_WIDTH, REFERENCE_HEIGHT);
    let frame = renderer.render(REFERENCE_WIDTH, REFERENCE_HEIGHT, &viewport).unwrap();

    assert_eq!(frame.iterations.len(), (REFERENCE_WIDTH * REFERENCE_HEIGHT) as usize);
    assert!(frame.get(0, 0).unwrap() <= 2);
    // c = -0.25 + 0i lies inside the main cardioid
    assert_eq!(frame.get(225, 100), Some(MAX_NUM_ITERATIONS));
}

#[test]
fn test_mandelbrot_double_precision() {
    let ctx = context(1);
    let config = Config {
        precision: Precision::Double,
        ..Default::default()
    };
    let mut renderer = Mandelbrot::init(&ctx, &config).unwrap();
    let viewport = Viewport::standard(REFERENCE_WIDTH, REFERENCE_HEIGHT);
    let frame = renderer.render(REFERENCE_WIDTH, REFERENCE_HEIGHT, &viewport).unwrap();
    assert_eq!(frame.get(225, 100), Some(MAX_NUM_ITERATIONS));
}

#[test]
fn test_mandelbrot_multi_device_matches_single() {
    let viewport = Viewport::standard(70, 41);

    let single_ctx = context(1);
    let single = Mandelbrot::init(&single_ctx, &Config::default())
        .unwrap()
        .with_max_iterations(200)
        .render(70, 41, &viewport)
        .unwrap();

    let multi_ctx = context(3);
    let config = Config {
        gpu_count: 3,
        ..Default::default()
    };
    let mut multi = Mandelbrot::init(&multi_ctx, &config).unwrap().with_max_iterations(200);
    assert_eq!(multi.band_count(), 3);
    assert_eq!(multi.render(70, 41, &viewport).unwrap(), single);
}

#[test]
fn test_mandelbrot_software_matches_device() {
    let ctx = context(1);
    let viewport = Viewport::centered(-0.75, 0.1, 0.005, 64, 48);

    let device = Mandelbrot::init(&ctx, &Config::default())
        .unwrap()
        .render(64, 48, &viewport)
        .unwrap();

    let config = Config {
        software_mandelbrot: true,
        ..Default::default()
    };
    let host = Mandelbrot::init(&ctx, &config).unwrap().render(64, 48, &viewport).unwrap();
    assert_eq!(host, device);
}

#[test]
fn test_visualizer_converges_to_render() {
    let ctx = context(1);
    let viewport = Viewport::standard(48, 30);

    let rendered = Mandelbrot::init(&ctx, &Config::default())
        .unwrap()
        .with_max_iterations(300)
        .render(48, 30, &viewport)
        .unwrap();

    let mut vis = Visualizer::init(&ctx, &Config::default())
        .unwrap()
        .with_max_iterations(300)
        .with_iterations_per_pass(50);
    vis.reset(48, 30, &viewport).unwrap();
    let frame = vis.run_to_completion().unwrap();

    assert!(vis.is_converged());
    assert_eq!(vis.frames_rendered(), 6);
    assert_eq!(frame, rendered);
}

#[test]
fn test_visualizer_software_matches_device() {
    let ctx = context(1);
    let viewport = Viewport::standard(40, 25);

    let mut device = Visualizer::init(&ctx, &Config::default()).unwrap().with_iterations_per_pass(7);
    let config = Config {
        software_mandelbrot: true,
        ..Default::default()
    };
    let mut host = Visualizer::init(&ctx, &config).unwrap().with_iterations_per_pass(7);
    assert!(host.is_software());

    device.reset(40, 25, &viewport).unwrap();
    host.reset(40, 25, &viewport).unwrap();
    for _ in 0..4 {
        assert_eq!(device.frame().unwrap(), host.frame().unwrap());
    }
}

#[test]
fn test_visualizer_resize() {
    let ctx = context(1);
    let mut vis = Visualizer::init(&ctx, &Config::default()).unwrap();
    vis.reset(20, 10, &Viewport::standard(20, 10)).unwrap();
    vis.frame().unwrap();
    vis.reset(30, 7, &Viewport::standard(30, 7)).unwrap();
    let frame = vis.frame().unwrap();
    assert_eq!((frame.width, frame.height), (30, 7));
    assert_eq!(frame.iterations.len(), 210);
    assert_eq!(vis.frames_rendered(), 1);
}

#[test]
fn test_kernel_dir_override() {
    let dir = tempfile::tempdir().unwrap();
    // same kernel under a different entry point name
    let renamed = hcl_kernels::sources::embedded("sine").unwrap().replace("fn sine(", "fn sine_renamed(");
    std::fs::write(dir.path().join("sine.wgsl"), renamed).unwrap();

    let ctx = context(1);
    let config = Config {
        kernel_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let err = Sine::init(&ctx, &config).err().unwrap();
    // the override was loaded: its entry point has no host kernel
    assert_eq!(err.status(), StatusCode::BUILD_PROGRAM_FAILURE);
    match err {
        KernelError::Compute(e) => assert!(e.build_log().unwrap().contains("sine_renamed")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_oversized_override_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let huge = vec![b'/'; hcl_compute::MAX_SOURCE_SIZE as usize + 16];
    std::fs::write(dir.path().join("rot13.wgsl"), huge).unwrap();

    let ctx = context(1);
    let config = Config {
        kernel_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let err = Rot13::init(&ctx, &config).err().unwrap();
    assert!(matches!(err, KernelError::Compute(ComputeError::SourceTooLarge { .. })));
    assert_eq!(err.status(), StatusCode::INVALID_VALUE);
}

#[test]
fn test_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hellocl.yaml");
    std::fs::write(&path, "precision: double\nverbose_sine: true\n").unwrap();

    let config = Config::from_file(&path).unwrap();
    assert_eq!(config.precision, Precision::Double);
    assert!(config.verbose_sine);
}
