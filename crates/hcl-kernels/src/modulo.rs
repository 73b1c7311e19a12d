//! Element-wise floored modulo.
//!
//! `out[i] = amount[i] - floor(amount[i] / modulus[i]) * modulus[i]`, so the
//! result takes the sign of the modulus. A zero modulus yields NaN.

use hcl_compute::{
    AccessMode, BufferLifetime, ComputeContext, ComputeError, ComputeResult, DeviceBuffer, Kernel, SoftwareLaunch,
    WorkShape,
};
use tracing::trace;

use crate::{Algorithm, Config, KernelResult, build_program, sources, work_items};

/// Table evaluated by the reference modulo stage: `(amount, modulus)`.
pub const REFERENCE_TABLE: &[(f32, f32)] = &[
    (7.0, 3.0),
    (-7.0, 3.0),
    (7.0, -3.0),
    (5.5, 2.0),
    (360.0, 90.0),
    (1.0, 0.0),
];

pub struct Modulo<'ctx> {
    ctx: &'ctx ComputeContext,
    kernel: Kernel<'ctx>,
}

impl<'ctx> Algorithm<'ctx> for Modulo<'ctx> {
    const NAME: &'static str = "modulo";

    fn init(ctx: &'ctx ComputeContext, config: &Config) -> KernelResult<Self> {
        ctx.registry().register("modulo", modulo_kernel);
        let program = build_program(ctx.queue(), sources::MODULO, config)?;
        let kernel = program.kernel("modulo")?;
        Ok(Self { ctx, kernel })
    }
}

impl<'ctx> Modulo<'ctx> {
    /// Evaluate into `out`; all three slices must have equal length.
    pub fn run(&mut self, amount: &[f32], modulus: &[f32], out: &mut [f32]) -> KernelResult<()> {
        trace!(len = amount.len(), "Modulo::run");
        for len in [modulus.len(), out.len()] {
            if len != amount.len() {
                return Err(ComputeError::BufferSizeMismatch {
                    expected: std::mem::size_of_val(amount),
                    actual: len * std::mem::size_of::<f32>(),
                }
                .into());
            }
        }
        if amount.is_empty() {
            return Ok(());
        }
        let count = work_items(amount.len())?;

        let queue = self.ctx.queue();
        let amount_buf = DeviceBuffer::from_slice(queue, amount, AccessMode::ReadOnly, BufferLifetime::Transient)?;
        let modulus_buf = DeviceBuffer::from_slice(queue, modulus, AccessMode::ReadOnly, BufferLifetime::Transient)?;
        let out_buf = DeviceBuffer::zeroed::<f32>(queue, out.len(), AccessMode::WriteOnly, BufferLifetime::Transient)?;

        let result = self.dispatch(&amount_buf, &modulus_buf, &out_buf, count);
        self.kernel.clear_args();
        result?;

        out_buf.read(out)?;
        Ok(())
    }

    /// Evaluate into a new vector.
    pub fn compute(&mut self, amount: &[f32], modulus: &[f32]) -> KernelResult<Vec<f32>> {
        let mut out = vec![0.0; amount.len()];
        self.run(amount, modulus, &mut out)?;
        Ok(out)
    }

    fn dispatch(
        &mut self,
        amount: &DeviceBuffer<'ctx>,
        modulus: &DeviceBuffer<'ctx>,
        out: &DeviceBuffer<'ctx>,
        count: u32,
    ) -> ComputeResult<()> {
        self.kernel.set_buffer(0, amount)?;
        self.kernel.set_buffer(1, modulus)?;
        self.kernel.set_buffer(2, out)?;
        self.kernel.set_scalar(3, count)?;
        self.kernel.run(&WorkShape::one_d(count))
    }
}

/// Floored modulo on the host; NaN for a zero modulus.
pub fn floored_mod(amount: f32, modulus: f32) -> f32 {
    if modulus == 0.0 {
        return f32::NAN;
    }
    amount - (amount / modulus).floor() * modulus
}

/// Host implementation of the `modulo` entry point.
fn modulo_kernel(launch: &SoftwareLaunch) -> ComputeResult<()> {
    let amount: Vec<f32> = launch.read(0)?;
    let modulus: Vec<f32> = launch.read(1)?;
    let count = (launch.scalar_u32(3)? as usize).min(amount.len()).min(modulus.len());
    let out = launch.map_items(|[x, _, _]| {
        let i = x as usize;
        if i < count { floored_mod(amount[i], modulus[i]) } else { 0.0 }
    });
    launch.write(2, &out[..count.min(out.len())])
}
