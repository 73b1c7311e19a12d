//! Sine command.

use crate::SineArgs;
use anyhow::Result;
use hcl_compute::{ComputeRuntime, StatusCode};
use hcl_kernels::{Algorithm, Config, Sine, sine};

pub fn run(runtime: &mut ComputeRuntime, args: SineArgs, config: &Config) -> Result<StatusCode> {
    let ctx = super::require_context(runtime, config)?;
    let mut data = sine::reference_input(args.count);
    Sine::init(ctx, config)?.run(&mut data)?;

    if args.stride > 0 {
        for (i, v) in data.iter().enumerate().step_by(args.stride) {
            println!("sin({i}) = {v:.6}");
        }
    }
    println!("sine: {} element(s)", data.len());
    runtime.teardown()?;
    Ok(StatusCode::SUCCESS)
}
