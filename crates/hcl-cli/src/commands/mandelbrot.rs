//! Mandelbrot command: one-shot render or visualizer frames.

use crate::MandelbrotArgs;
use anyhow::{Context, Result};
use hcl_compute::{ComputeRuntime, StatusCode};
use hcl_kernels::{Algorithm, Config, Frame, Mandelbrot, Viewport, Visualizer};
use std::fs;
use tracing::info;

/// Runs the render and writes a PGM or prints an ASCII preview.
pub fn run(runtime: &mut ComputeRuntime, args: MandelbrotArgs, mut config: Config) -> Result<StatusCode> {
    if args.software {
        config.software_mandelbrot = true;
    }
    let viewport = viewport(&args);
    let ctx = super::require_context(runtime, &config)?;

    let frame = if args.frames == 0 {
        let mut renderer = Mandelbrot::init(ctx, &config)?;
        info!(bands = renderer.band_count(), "Rendering");
        renderer.render(args.width, args.height, &viewport)?
    } else {
        let mut vis = Visualizer::init(ctx, &config)?;
        vis.reset(args.width, args.height, &viewport)?;
        let mut last = None;
        for i in 0..args.frames {
            let frame = vis.frame()?;
            info!(frame = i, converged = vis.is_converged(), "Visualizer frame");
            last = Some(frame);
        }
        last.context("No frame rendered")?
    };

    output(&args, &frame)?;
    runtime.teardown()?;
    Ok(StatusCode::SUCCESS)
}

fn viewport(args: &MandelbrotArgs) -> Viewport {
    let standard = Viewport::standard(args.width, args.height);
    if args.center_x.is_none() && args.center_y.is_none() && args.step.is_none() {
        return standard;
    }
    // unset fields fall back to the center of the standard view
    let step = args.step.unwrap_or(standard.step);
    let cx = args
        .center_x
        .unwrap_or(standard.origin_x + standard.step * f64::from(args.width) / 2.0);
    let cy = args.center_y.unwrap_or(0.0);
    Viewport::centered(cx, cy, step, args.width, args.height)
}

fn output(args: &MandelbrotArgs, frame: &Frame) -> Result<()> {
    match &args.output {
        Some(path) => {
            fs::write(path, frame.to_pgm()).with_context(|| format!("Failed to save: {}", path.display()))?;
            println!("Wrote {}x{} image to {}", frame.width, frame.height, path.display());
        }
        None => print!("{}", frame.to_ascii()),
    }
    Ok(())
}
