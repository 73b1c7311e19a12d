//! Algorithm modules built on the hcl-compute lifecycle.
//!
//! Each module follows the same contract: `init` registers its host
//! kernels, builds its program(s) against the context and resolves its
//! kernels; a typed `run` call moves data in, dispatches and reads results
//! back. Buffers created by `run` are transient and released before it
//! returns.
//!
//! | module         | program(s)                     | work shape |
//! |----------------|--------------------------------|------------|
//! | [`Sine`]       | `sine`                         | 1-D        |
//! | [`Rot13`]      | `rot13`                        | 1-D        |
//! | [`Modulo`]     | `modulo`                       | 1-D        |
//! | [`Mandelbrot`] | `mandelbrot`                   | 2-D bands  |
//! | [`Visualizer`] | `mandelbrot_vis`               | 2-D passes |

pub mod config;
pub mod error;
pub mod mandelbrot;
pub mod modulo;
pub mod rot13;
pub mod sine;
pub mod sources;

pub use config::Config;
pub use error::{KernelError, KernelResult};
pub use mandelbrot::{Frame, Mandelbrot, Visualizer, Viewport};
pub use modulo::Modulo;
pub use rot13::Rot13;
pub use sine::Sine;

use hcl_compute::{ComputeContext, Program, Queue};
use tracing::debug;

/// Uniform lifecycle shared by every algorithm module.
pub trait Algorithm<'ctx>: Sized {
    /// Module name used in logs and stage labels.
    const NAME: &'static str;

    /// Register host kernels, build programs and resolve kernels.
    fn init(ctx: &'ctx ComputeContext, config: &Config) -> KernelResult<Self>;
}

/// Build the named program on `queue` with the configured options.
pub(crate) fn build_program<'ctx>(queue: &'ctx Queue, name: &str, config: &Config) -> KernelResult<Program<'ctx>> {
    let source = sources::load(name, config.kernel_dir.as_deref())?;
    let program = Program::build(queue, &source, &config.build_options())?;
    debug!(program = name, queue = queue.index(), precision = %config.precision, "Built program");
    Ok(program)
}

/// Element count as a 1-D global work size.
pub(crate) fn work_items(len: usize) -> KernelResult<u32> {
    u32::try_from(len).map_err(|_| KernelError::InvalidInput(format!("{len} elements exceed the u32 work range")))
}
