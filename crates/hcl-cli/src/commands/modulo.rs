//! Modulo command.

use crate::ModuloArgs;
use anyhow::{Result, ensure};
use hcl_compute::{ComputeRuntime, StatusCode};
use hcl_kernels::{Algorithm, Config, Modulo};

pub fn run(runtime: &mut ComputeRuntime, args: ModuloArgs, config: &Config) -> Result<StatusCode> {
    ensure!(
        args.amount.len() == args.modulus.len(),
        "--amount has {} values, --modulus has {}",
        args.amount.len(),
        args.modulus.len()
    );

    let ctx = super::require_context(runtime, config)?;
    let out = Modulo::init(ctx, config)?.compute(&args.amount, &args.modulus)?;
    for ((a, m), r) in args.amount.iter().zip(&args.modulus).zip(&out) {
        println!("modulo({a}, {m}) = {r}");
    }
    runtime.teardown()?;
    Ok(StatusCode::SUCCESS)
}
