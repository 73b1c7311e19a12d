//! In-place sine transform.

use hcl_compute::{
    AccessMode, BufferLifetime, ComputeContext, ComputeResult, DeviceBuffer, Kernel, SoftwareLaunch, WorkShape,
};
use tracing::{debug, trace};

use crate::{Algorithm, Config, KernelResult, build_program, sources, work_items};

/// Element count of the reference sine stage.
pub const REFERENCE_LEN: usize = 10_240;

/// Stride between printed elements in verbose mode.
pub const VERBOSE_STRIDE: usize = 101;

/// `data[i] = sin(data[i])` on the default queue.
pub struct Sine<'ctx> {
    ctx: &'ctx ComputeContext,
    kernel: Kernel<'ctx>,
}

impl<'ctx> Algorithm<'ctx> for Sine<'ctx> {
    const NAME: &'static str = "sine";

    fn init(ctx: &'ctx ComputeContext, config: &Config) -> KernelResult<Self> {
        ctx.registry().register("sine", sine_kernel);
        let program = build_program(ctx.queue(), sources::SINE, config)?;
        let kernel = program.kernel("sine")?;
        Ok(Self { ctx, kernel })
    }
}

impl<'ctx> Sine<'ctx> {
    /// Replace every element with its sine. Empty input is a no-op.
    pub fn run(&mut self, data: &mut [f32]) -> KernelResult<()> {
        trace!(len = data.len(), "Sine::run");
        if data.is_empty() {
            return Ok(());
        }
        let count = work_items(data.len())?;

        let queue = self.ctx.queue();
        let buffer = DeviceBuffer::from_slice(queue, data, AccessMode::ReadWrite, BufferLifetime::Transient)?;

        let result = self.dispatch(&buffer, count);
        self.kernel.clear_args();
        result?;

        buffer.read(data)?;
        debug!(len = data.len(), "Sine complete");
        Ok(())
    }

    fn dispatch(&mut self, buffer: &DeviceBuffer<'ctx>, count: u32) -> ComputeResult<()> {
        self.kernel.set_buffer(0, buffer)?;
        self.kernel.set_scalar(1, count)?;
        self.kernel.run(&WorkShape::one_d(count))
    }
}

/// Reference input: `data[i] = i`.
pub fn reference_input(len: usize) -> Vec<f32> {
    (0..len).map(|i| i as f32).collect()
}

/// Host implementation of the `sine` entry point.
fn sine_kernel(launch: &SoftwareLaunch) -> ComputeResult<()> {
    let data: Vec<f32> = launch.read(0)?;
    let count = (launch.scalar_u32(1)? as usize).min(data.len());
    let out = launch.map_items(|[x, _, _]| data.get(x as usize).map_or(0.0, |v| v.sin()));
    launch.write(0, &out[..count.min(out.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl_compute::{ContextConfig, Platform};

    #[test]
    fn test_small_input() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut sine = Sine::init(&ctx, &Config::default()).unwrap();

        let mut data = vec![0.0f32, std::f32::consts::FRAC_PI_2, std::f32::consts::PI];
        sine.run(&mut data).unwrap();
        approx::assert_abs_diff_eq!(data[0], 0.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(data[1], 1.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(data[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_input() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut sine = Sine::init(&ctx, &Config::default()).unwrap();
        let mut data: Vec<f32> = Vec::new();
        sine.run(&mut data).unwrap();
    }
}
