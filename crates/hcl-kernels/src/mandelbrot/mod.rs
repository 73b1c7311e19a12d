//! Mandelbrot renderer and incremental visualizer.
//!
//! [`Mandelbrot`] renders a whole frame per call. With more than one queue
//! the rows are split into contiguous bands, one band per queue, dispatched
//! without blocking and joined before the frame is assembled.
//!
//! [`Visualizer`] keeps per-pixel state on the device and advances it a
//! bounded number of iterations per frame, so a display loop can show the
//! set sharpening over time.

mod escape;
mod vis;

pub use escape::{Frame, Real, Viewport, escape_time, iterate, pixel_coord, render_rows};
pub use vis::Visualizer;

use hcl_compute::{
    AccessMode, Blocking, BufferLifetime, ComputeContext, ComputeResult, DeviceBuffer, Event, Kernel, Precision,
    Queue, SoftwareLaunch, WorkShape,
};
use tracing::{debug, trace, warn};

use crate::{Algorithm, Config, KernelError, KernelResult, build_program, sources};

/// Iteration cap; beyond this single precision loses the target.
pub const MAX_NUM_ITERATIONS: u32 = 1200;

/// Dispatches per visualizer frame.
pub const JOBS_PER_FRAME: u32 = 3;

/// Iterations each visualizer pass may add to a pixel.
pub const VIS_ITERATIONS_PER_PASS: u32 = 100;

/// Size of the reference render.
pub const REFERENCE_WIDTH: u32 = 350;
pub const REFERENCE_HEIGHT: u32 = 200;

/// One-shot escape-time renderer.
pub struct Mandelbrot<'ctx> {
    /// One kernel per band queue; empty in software mode.
    kernels: Vec<Kernel<'ctx>>,
    precision: Precision,
    max_iterations: u32,
}

impl<'ctx> Algorithm<'ctx> for Mandelbrot<'ctx> {
    const NAME: &'static str = "mandelbrot";

    fn init(ctx: &'ctx ComputeContext, config: &Config) -> KernelResult<Self> {
        let mut renderer = Self {
            kernels: Vec::new(),
            precision: config.precision,
            max_iterations: MAX_NUM_ITERATIONS,
        };
        if config.software_mandelbrot {
            debug!("Mandelbrot renders on the host");
            return Ok(renderer);
        }

        let bands = band_count(ctx, config.gpu_count);
        ctx.registry().register("mandelbrot", mandelbrot_kernel);
        for queue in &ctx.queues()[..bands] {
            let program = build_program(queue, sources::MANDELBROT, config)?;
            renderer.kernels.push(program.kernel("mandelbrot")?);
        }
        debug!(bands, "Mandelbrot kernels ready");
        Ok(renderer)
    }
}

/// Requested queue count, clamped to what the context has.
fn band_count(ctx: &ComputeContext, requested: usize) -> usize {
    let available = ctx.queue_count();
    if requested > available {
        warn!(requested, available, "gpu_count exceeds available queues, clamping");
    }
    requested.clamp(1, available.max(1))
}

impl<'ctx> Mandelbrot<'ctx> {
    /// Override the iteration cap.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Queues the rows are split across; 0 when rendering on the host.
    pub fn band_count(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_software(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Render a `width` x `height` frame of `viewport`.
    pub fn render(&mut self, width: u32, height: u32, viewport: &Viewport) -> KernelResult<Frame> {
        trace!(width, height, ?viewport, software = self.is_software(), "Mandelbrot::render");
        let pixels = check_dimensions(width, height)?;

        let iterations = if self.is_software() {
            match self.precision {
                Precision::Single => render_rows::<f32>(viewport, width, 0, height, self.max_iterations),
                Precision::Double => render_rows::<f64>(viewport, width, 0, height, self.max_iterations),
            }
        } else {
            let result = self.render_bands(width, height, pixels, viewport);
            self.kernels.iter_mut().for_each(Kernel::clear_args);
            result?
        };

        Ok(Frame {
            width,
            height,
            max_iterations: self.max_iterations,
            iterations,
        })
    }

    fn render_bands(&mut self, width: u32, height: u32, pixels: usize, viewport: &Viewport) -> ComputeResult<Vec<u32>> {
        let n = (self.kernels.len() as u32).min(height);
        let mut bands = Vec::with_capacity(n as usize);
        let mut events = Vec::with_capacity(n as usize);

        for (i, kernel) in self.kernels.iter_mut().take(n as usize).enumerate() {
            let start = band_start(i as u32, height, n);
            let rows = band_start(i as u32 + 1, height, n) - start;
            let queue = kernel.queue();

            let job = job_buffer(queue, viewport, self.precision, BufferLifetime::Transient)?;
            let out = DeviceBuffer::zeroed::<u32>(
                queue,
                width as usize * rows as usize,
                AccessMode::ReadWrite,
                BufferLifetime::Transient,
            )?;
            kernel.set_buffer(0, &out)?;
            kernel.set_buffer(1, &job)?;
            kernel.set_scalar(2, [width, rows, start, self.max_iterations])?;

            debug!(band = i, queue = queue.index(), start, rows, "Dispatching band");
            events.push(kernel.dispatch(&WorkShape::two_d(width, rows), Blocking::No)?);
            bands.push((start, out, job));
        }

        Event::wait_all(events)?;

        let mut image = vec![0u32; pixels];
        for (start, out, _job) in &bands {
            let offset = *start as usize * width as usize;
            let len = out.len::<u32>();
            out.read(&mut image[offset..offset + len])?;
        }
        Ok(image)
    }
}

/// First row of band `i` of `n` over `height` rows.
fn band_start(i: u32, height: u32, n: u32) -> u32 {
    (u64::from(i) * u64::from(height) / u64::from(n)) as u32
}

/// Pixel count of a frame.
///
/// Kernels index pixels with a `u32`, so the count must fit one.
fn check_dimensions(width: u32, height: u32) -> KernelResult<usize> {
    if width == 0 || height == 0 {
        return Err(KernelError::InvalidInput(format!("empty frame {width}x{height}")));
    }
    match width.checked_mul(height) {
        Some(pixels) => Ok(pixels as usize),
        None => Err(KernelError::InvalidInput(format!(
            "frame {width}x{height} exceeds {} pixels",
            u32::MAX
        ))),
    }
}

/// Upload the viewport job in kernel precision.
fn job_buffer<'ctx>(
    queue: &'ctx Queue,
    viewport: &Viewport,
    precision: Precision,
    lifetime: BufferLifetime,
) -> ComputeResult<DeviceBuffer<'ctx>> {
    let mode = AccessMode::ReadOnly;
    match precision {
        Precision::Single => DeviceBuffer::from_slice(queue, &viewport.job::<f32>(), mode, lifetime),
        Precision::Double => DeviceBuffer::from_slice(queue, &viewport.job::<f64>(), mode, lifetime),
    }
}

/// Host implementation of the `mandelbrot` entry point.
fn mandelbrot_kernel(launch: &SoftwareLaunch) -> ComputeResult<()> {
    match launch.precision() {
        Precision::Single => mandelbrot_band::<f32>(launch),
        Precision::Double => mandelbrot_band::<f64>(launch),
    }
}

fn mandelbrot_band<R: Real>(launch: &SoftwareLaunch) -> ComputeResult<()> {
    let job = read_job::<R>(launch, 1)?;
    let [width, rows, row_offset, max] = launch.scalar_uvec4(2)?;
    let out = launch.map_items(|[x, y, _]| {
        if x >= width || y >= rows {
            return 0;
        }
        let (cr, ci) = pixel_coord(&job, x, y + row_offset);
        escape_time(cr, ci, max)
    });
    launch.write(0, &out)
}

fn read_job<R: Real>(launch: &SoftwareLaunch, index: usize) -> ComputeResult<[R; 3]> {
    let job: Vec<R> = launch.read(index)?;
    match job[..] {
        [ox, oy, step, ..] => Ok([ox, oy, step]),
        _ => Err(hcl_compute::ComputeError::Dispatch(format!(
            "{}: job buffer holds {} values, expected 3",
            launch.entry_point(),
            job.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl_compute::{ContextConfig, Platform};

    #[test]
    fn test_band_clamping() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let config = Config {
            gpu_count: 4,
            ..Default::default()
        };
        let renderer = Mandelbrot::init(&ctx, &config).unwrap();
        assert_eq!(renderer.band_count(), 1);
    }

    #[test]
    fn test_software_mode_builds_nothing() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let config = Config {
            software_mandelbrot: true,
            ..Default::default()
        };
        let renderer = Mandelbrot::init(&ctx, &config).unwrap();
        assert!(renderer.is_software());
        assert!(!ctx.registry().contains("mandelbrot"));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut renderer = Mandelbrot::init(&ctx, &Config::default()).unwrap();
        let vp = Viewport::standard(1, 1);
        assert!(matches!(renderer.render(0, 10, &vp), Err(KernelError::InvalidInput(_))));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let vp = Viewport::standard(70_000, 70_000);

        let mut renderer = Mandelbrot::init(&ctx, &Config::default()).unwrap();
        let err = renderer.render(70_000, 70_000, &vp).unwrap_err();
        assert!(matches!(err, KernelError::InvalidInput(ref msg) if msg.contains("70000x70000")));

        let mut host = Mandelbrot::init(
            &ctx,
            &Config {
                software_mandelbrot: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(matches!(host.render(70_000, 70_000, &vp), Err(KernelError::InvalidInput(_))));
    }

    #[test]
    fn test_dimension_limits() {
        assert_eq!(check_dimensions(65_536, 65_535).unwrap(), 65_536 * 65_535);
        assert!(check_dimensions(65_536, 65_536).is_err());
        assert_eq!(band_start(3, u32::MAX, 4), (u64::from(u32::MAX) * 3 / 4) as u32);
    }
}
