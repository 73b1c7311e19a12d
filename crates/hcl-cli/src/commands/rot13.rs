//! ROT13 command.

use crate::Rot13Args;
use anyhow::Result;
use hcl_compute::{ComputeRuntime, StatusCode};
use hcl_kernels::{Algorithm, Config, Rot13};

pub fn run(runtime: &mut ComputeRuntime, args: Rot13Args, config: &Config) -> Result<StatusCode> {
    let ctx = super::require_context(runtime, config)?;
    let encoded = Rot13::init(ctx, config)?.encode(&args.text)?;
    println!("{encoded}");
    runtime.teardown()?;
    Ok(StatusCode::SUCCESS)
}
