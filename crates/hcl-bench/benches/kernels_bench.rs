//! Benchmarks for the algorithm modules on software devices.
//!
//! Run with: `cargo bench -p hcl-bench`

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use hcl_compute::{ComputeContext, ContextConfig, Platform};
use hcl_kernels::mandelbrot::{self, REFERENCE_HEIGHT, REFERENCE_WIDTH};
use hcl_kernels::{Algorithm, Config, Mandelbrot, Modulo, Rot13, Sine, Viewport, Visualizer, sine};

fn context(devices: usize) -> ComputeContext {
    ComputeContext::initialize(
        &Platform::software(devices),
        &ContextConfig {
            device_count: devices,
            ..Default::default()
        },
    )
    .expect("software context")
}

/// Benchmark the sine transform at several sizes.
fn bench_sine(c: &mut Criterion) {
    let ctx = context(1);
    let mut module = Sine::init(&ctx, &Config::default()).expect("sine init");
    let mut group = c.benchmark_group("sine");

    for size in [1_024usize, sine::REFERENCE_LEN, 100_000] {
        let input = sine::reference_input(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| {
                let mut data = input.clone();
                module.run(black_box(&mut data)).expect("sine run");
                data
            })
        });
    }

    group.finish();
}

/// Benchmark ROT13 and modulo, the small 1-D kernels.
fn bench_small_kernels(c: &mut Criterion) {
    let ctx = context(1);
    let mut rot13 = Rot13::init(&ctx, &Config::default()).expect("rot13 init");
    let mut modulo = Modulo::init(&ctx, &Config::default()).expect("modulo init");

    let text = "Hello, World! ".repeat(256);
    let amount: Vec<f32> = (0..4096).map(|i| i as f32 * 0.37 - 500.0).collect();
    let modulus: Vec<f32> = (0..4096).map(|i| (i % 17) as f32 - 8.0).collect();

    c.bench_function("rot13_3584", |b| b.iter(|| rot13.encode(black_box(&text)).expect("rot13")));
    c.bench_function("modulo_4096", |b| {
        b.iter(|| modulo.compute(black_box(&amount), black_box(&modulus)).expect("modulo"))
    });
}

/// Benchmark the reference Mandelbrot render across band counts and modes.
fn bench_mandelbrot(c: &mut Criterion) {
    let mut group = c.benchmark_group("mandelbrot");
    group.sample_size(20);
    let viewport = Viewport::standard(REFERENCE_WIDTH, REFERENCE_HEIGHT);
    group.throughput(Throughput::Elements(u64::from(REFERENCE_WIDTH * REFERENCE_HEIGHT)));

    for bands in [1usize, 2, 4] {
        let ctx = context(bands);
        let config = Config {
            gpu_count: bands,
            ..Default::default()
        };
        let mut renderer = Mandelbrot::init(&ctx, &config).expect("mandelbrot init");
        group.bench_with_input(BenchmarkId::new("bands", bands), &viewport, |b, vp| {
            b.iter(|| renderer.render(REFERENCE_WIDTH, REFERENCE_HEIGHT, vp).expect("render"))
        });
    }

    let ctx = context(1);
    let config = Config {
        software_mandelbrot: true,
        ..Default::default()
    };
    let mut host = Mandelbrot::init(&ctx, &config).expect("mandelbrot init");
    group.bench_function("host", |b| {
        b.iter(|| host.render(REFERENCE_WIDTH, REFERENCE_HEIGHT, &viewport).expect("render"))
    });

    let mut vis = Visualizer::init(&ctx, &Config::default()).expect("vis init");
    group.bench_function("vis_frame", |b| {
        vis.reset(REFERENCE_WIDTH, REFERENCE_HEIGHT, &viewport).expect("reset");
        b.iter(|| vis.frame().expect("frame"))
    });

    group.finish();
}

/// Benchmark the host escape-time loop alone.
fn bench_escape_time(c: &mut Criterion) {
    let mut group = c.benchmark_group("escape_time");
    // one point escaping immediately, one never escaping
    for (name, cr) in [("outside", 1.0f64), ("cardioid", -0.25)] {
        group.bench_function(name, |b| {
            b.iter(|| mandelbrot::escape_time(black_box(cr), black_box(0.0), mandelbrot::MAX_NUM_ITERATIONS))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_sine, bench_small_kernels, bench_mandelbrot, bench_escape_time);
criterion_main!(benches);
