//! Reference sequence: every stage in order, one summed status.
//!
//! A failing stage never stops the sequence; its status joins the sum and
//! its full message (including any build log) is printed at the end.

use crate::RunArgs;
use anyhow::Result;
use hcl_compute::{ComputeContext, ComputeRuntime, StatusCode, StatusSum};
use hcl_kernels::mandelbrot::{REFERENCE_HEIGHT, REFERENCE_WIDTH};
use hcl_kernels::{Algorithm, Config, Mandelbrot, Modulo, Rot13, Sine, Viewport, Visualizer, modulo, rot13, sine};
use tracing::info;

/// Runs the reference sequence and returns the summed status.
pub fn run(runtime: &mut ComputeRuntime, args: RunArgs, mut config: Config) -> Result<StatusCode> {
    if args.no_sine {
        config.enable_sine = false;
    }
    if args.verbose_sine {
        config.verbose_sine = true;
    }
    if args.software_mandelbrot {
        config.software_mandelbrot = true;
    }

    let mut sum = StatusSum::new();
    let ctx = match super::open_context(runtime, &config) {
        Ok(ctx) => ctx,
        Err(e) => {
            sum.record_error("initialise", &e);
            println!("init errors = {}", sum.message());
            report(&sum);
            return Ok(sum.total());
        }
    };
    info!(queues = ctx.queue_count(), "Running reference sequence");

    if config.enable_sine {
        sum.merge(sine_stage(ctx, &config));
    }
    sum.merge(rot13_stage(ctx, &config));
    sum.merge(modulo_stage(ctx, &config));
    sum.merge(mandelbrot_stage(ctx, &config, args.frames));

    let teardown = runtime.teardown();
    sum.record("teardown", &teardown);

    println!("total errors = {} ({})", sum.total().code(), sum.message());
    report(&sum);
    Ok(sum.total())
}

fn report(sum: &StatusSum) {
    sum.failures().iter().for_each(super::print_failure);
}

fn sine_stage(ctx: &ComputeContext, config: &Config) -> StatusSum {
    println!("========= SIN =========");
    let mut stage = StatusSum::new();

    let module = Sine::init(ctx, config);
    stage.record("init_sine", &module);
    println!("init errors = {}", stage.message());

    if let Ok(mut module) = module {
        let mut data = sine::reference_input(sine::REFERENCE_LEN);
        let result = module.run(&mut data);
        stage.record("clsin", &result);
        if result.is_ok() && config.verbose_sine {
            for (i, v) in data.iter().enumerate().step_by(sine::VERBOSE_STRIDE) {
                println!("sin({i}) = {v:.6}");
            }
        }
    }
    println!("clsin errors = {}", stage.message());
    stage
}

fn rot13_stage(ctx: &ComputeContext, config: &Config) -> StatusSum {
    println!("========= ROT13 =========");
    let mut stage = StatusSum::new();

    let module = Rot13::init(ctx, config);
    stage.record("init_rot13", &module);
    println!("init errors = {}", stage.message());

    let ciphertext = match module {
        Ok(mut module) => {
            let result = module.encode(rot13::REFERENCE_MESSAGE);
            stage.record("rot13", &result);
            result.unwrap_or_default()
        }
        Err(_) => String::new(),
    };
    println!("rot13 errors = {}, ciphertext = {}", stage.total().code(), ciphertext);
    stage
}

fn modulo_stage(ctx: &ComputeContext, config: &Config) -> StatusSum {
    println!("========= MODULO =========");
    let mut stage = StatusSum::new();

    let module = Modulo::init(ctx, config);
    stage.record("init_modulo", &module);
    println!("init errors = {}", stage.message());

    if let Ok(mut module) = module {
        let (amount, modulus): (Vec<f32>, Vec<f32>) = modulo::REFERENCE_TABLE.iter().copied().unzip();
        let result = module.compute(&amount, &modulus);
        stage.record("modulo", &result);
        if let Ok(out) = result {
            for ((a, m), r) in amount.iter().zip(&modulus).zip(&out) {
                println!("modulo({a}, {m}) = {r}");
            }
        }
    }
    println!("modulo errors = {}", stage.message());
    stage
}

fn mandelbrot_stage(ctx: &ComputeContext, config: &Config, frames: u32) -> StatusSum {
    println!("========= MANDELBROT =========");
    let mut stage = StatusSum::new();
    let viewport = Viewport::standard(REFERENCE_WIDTH, REFERENCE_HEIGHT);

    let renderer = Mandelbrot::init(ctx, config);
    stage.record("init_mandelbrot", &renderer);
    if let Ok(mut renderer) = renderer {
        let frame = renderer.render(REFERENCE_WIDTH, REFERENCE_HEIGHT, &viewport);
        stage.record("mandelbrot", &frame);
        if let Ok(frame) = frame {
            let inside = frame.iterations.iter().filter(|&&n| n >= frame.max_iterations).count();
            println!(
                "mandelbrot: {}x{} on {} band(s), {} points inside",
                frame.width,
                frame.height,
                renderer.band_count().max(1),
                inside
            );
        }
    }
    println!("mandelbrot errors = {}", stage.message());

    let vis = Visualizer::init(ctx, config);
    stage.record("init_mandelbrotvis", &vis);
    if let Ok(mut vis) = vis {
        let reset = vis.reset(REFERENCE_WIDTH, REFERENCE_HEIGHT, &viewport);
        stage.record("mandelbrotvis_reset", &reset);
        if reset.is_ok() {
            for _ in 0..frames {
                let frame = vis.frame();
                stage.record("mandelbrotvis", &frame);
                if frame.is_err() {
                    break;
                }
            }
        }
        println!("mandelbrotvis: {} frame(s)", vis.frames_rendered());
    }
    println!("mandelbrotvis errors = {}", stage.message());
    stage
}
