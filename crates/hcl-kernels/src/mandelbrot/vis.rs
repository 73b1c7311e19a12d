//! Incremental Mandelbrot visualizer.
//!
//! Per-pixel `z` and iteration counts persist on the device between frames.
//! A frame is [`JOBS_PER_FRAME`] dispatches; job `j` advances the rows with
//! `row % JOBS_PER_FRAME == j` by at most `iterations_per_pass`. After
//! `ceil(max / iterations_per_pass)` frames every pixel has escaped or hit
//! the cap, and the frame equals a one-shot render.

use hcl_compute::{
    AccessMode, Blocking, BufferLifetime, ComputeContext, ComputeResult, DeviceBuffer, Event, Kernel, Precision,
    SoftwareLaunch, WorkShape,
};
use tracing::{debug, trace};

use super::escape::{Frame, Real, Viewport, iterate, pixel_coord, render_rows};
use super::{JOBS_PER_FRAME, MAX_NUM_ITERATIONS, VIS_ITERATIONS_PER_PASS, check_dimensions, job_buffer, read_job};
use crate::{Algorithm, Config, KernelError, KernelResult, build_program, sources};

struct DeviceState<'ctx> {
    iterations: DeviceBuffer<'ctx>,
    z: DeviceBuffer<'ctx>,
    job: DeviceBuffer<'ctx>,
}

struct VisState<'ctx> {
    width: u32,
    height: u32,
    viewport: Viewport,
    /// `None` when frames are computed on the host.
    device: Option<DeviceState<'ctx>>,
}

pub struct Visualizer<'ctx> {
    ctx: &'ctx ComputeContext,
    /// `(mandelbrot_vis_init, mandelbrot_vis)`; `None` in software mode.
    kernels: Option<(Kernel<'ctx>, Kernel<'ctx>)>,
    precision: Precision,
    max_iterations: u32,
    iterations_per_pass: u32,
    state: Option<VisState<'ctx>>,
    frames: u32,
}

impl<'ctx> Algorithm<'ctx> for Visualizer<'ctx> {
    const NAME: &'static str = "mandelbrot_vis";

    fn init(ctx: &'ctx ComputeContext, config: &Config) -> KernelResult<Self> {
        let kernels = if config.software_mandelbrot {
            None
        } else {
            let registry = ctx.registry();
            registry.register("mandelbrot_vis_init", vis_init_kernel);
            registry.register("mandelbrot_vis", vis_pass_kernel);
            let program = build_program(ctx.queue(), sources::MANDELBROT_VIS, config)?;
            Some((program.kernel("mandelbrot_vis_init")?, program.kernel("mandelbrot_vis")?))
        };

        Ok(Self {
            ctx,
            kernels,
            precision: config.precision,
            max_iterations: MAX_NUM_ITERATIONS,
            iterations_per_pass: VIS_ITERATIONS_PER_PASS,
            state: None,
            frames: 0,
        })
    }
}

impl<'ctx> Visualizer<'ctx> {
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    /// Iteration budget per pixel per frame (at least 1).
    pub fn with_iterations_per_pass(mut self, per_pass: u32) -> Self {
        self.iterations_per_pass = per_pass.max(1);
        self
    }

    pub fn is_software(&self) -> bool {
        self.kernels.is_none()
    }

    /// Frames rendered since the last reset.
    pub fn frames_rendered(&self) -> u32 {
        self.frames
    }

    /// Frames needed for every pixel to settle.
    pub fn frames_to_converge(&self) -> u32 {
        self.max_iterations.div_ceil(self.iterations_per_pass).max(1)
    }

    pub fn is_converged(&self) -> bool {
        self.state.is_some() && self.frames >= self.frames_to_converge()
    }

    /// Start over on `viewport` at the given size.
    ///
    /// Persistent buffers are kept when the size is unchanged and replaced
    /// otherwise; either way every pixel returns to its pristine state.
    pub fn reset(&mut self, width: u32, height: u32, viewport: &Viewport) -> KernelResult<()> {
        trace!(width, height, ?viewport, "Visualizer::reset");
        let pixels = check_dimensions(width, height)?;
        self.frames = 0;
        let budget = self.budget();

        let Some((init, pass)) = self.kernels.as_mut() else {
            self.state = Some(VisState {
                width,
                height,
                viewport: *viewport,
                device: None,
            });
            return Ok(());
        };

        let queue = self.ctx.queue();
        let reuse = matches!(&self.state, Some(s) if s.width == width && s.height == height && s.device.is_some());
        let previous = self.state.take().and_then(|s| s.device);

        let (iterations, z) = match previous {
            Some(DeviceState { iterations, z, .. }) if reuse => (iterations, z),
            _ => {
                init.clear_args();
                pass.clear_args();
                debug!(width, height, "Allocating visualizer state");
                (
                    DeviceBuffer::zeroed::<u32>(queue, pixels, AccessMode::ReadWrite, BufferLifetime::Persistent)?,
                    DeviceBuffer::allocate(
                        queue,
                        (2 * pixels * self.precision.size_bytes()) as u64,
                        AccessMode::ReadWrite,
                        BufferLifetime::Persistent,
                    )?,
                )
            }
        };
        let job = job_buffer(queue, viewport, self.precision, BufferLifetime::Persistent)?;
        let device = DeviceState { iterations, z, job };

        bind(init, &device, [width, height, 0, JOBS_PER_FRAME], budget)?;
        init.run(&WorkShape::two_d(width, height))?;

        self.state = Some(VisState {
            width,
            height,
            viewport: *viewport,
            device: Some(device),
        });
        Ok(())
    }

    /// Advance every pixel by one pass and return the current image.
    pub fn frame(&mut self) -> KernelResult<Frame> {
        let budget = self.budget();
        let Some(state) = self.state.as_ref() else {
            return Err(KernelError::InvalidState("visualizer frame requested before reset".into()));
        };
        let (width, height) = (state.width, state.height);
        trace!(width, height, frame = self.frames, "Visualizer::frame");

        let iterations = match (self.kernels.as_mut(), state.device.as_ref()) {
            (Some((_, pass)), Some(device)) => {
                let result = advance(pass, device, width, height, budget);
                pass.clear_args();
                result?
            }
            _ => {
                // host frames: capping at the budget spent so far matches the device state
                let cap = self.max_iterations.min((self.frames + 1).saturating_mul(self.iterations_per_pass));
                match self.precision {
                    Precision::Single => render_rows::<f32>(&state.viewport, width, 0, height, cap),
                    Precision::Double => render_rows::<f64>(&state.viewport, width, 0, height, cap),
                }
            }
        };

        self.frames += 1;
        Ok(Frame {
            width,
            height,
            max_iterations: self.max_iterations,
            iterations,
        })
    }

    /// Render frames until every pixel has settled; returns the final frame.
    pub fn run_to_completion(&mut self) -> KernelResult<Frame> {
        let remaining = self.frames_to_converge().saturating_sub(self.frames).max(1);
        let mut last = None;
        for _ in 0..remaining {
            last = Some(self.frame()?);
        }
        last.ok_or_else(|| KernelError::InvalidState("no frame rendered".into()))
    }

    fn budget(&self) -> [u32; 4] {
        [self.max_iterations, self.iterations_per_pass, 0, 0]
    }
}

fn bind<'ctx>(
    kernel: &mut Kernel<'ctx>,
    device: &DeviceState<'ctx>,
    frame: [u32; 4],
    budget: [u32; 4],
) -> ComputeResult<()> {
    kernel.set_buffer(0, &device.iterations)?;
    kernel.set_buffer(1, &device.z)?;
    kernel.set_buffer(2, &device.job)?;
    kernel.set_scalar(3, frame)?;
    kernel.set_scalar(4, budget)
}

/// Dispatch the interleaved row jobs of one frame and read the counts.
fn advance<'ctx>(
    pass: &mut Kernel<'ctx>,
    device: &DeviceState<'ctx>,
    width: u32,
    height: u32,
    budget: [u32; 4],
) -> ComputeResult<Vec<u32>> {
    let mut events = Vec::with_capacity(JOBS_PER_FRAME as usize);
    for j in 0..JOBS_PER_FRAME.min(height) {
        let rows = (height - j).div_ceil(JOBS_PER_FRAME);
        bind(pass, device, [width, height, j, JOBS_PER_FRAME], budget)?;
        events.push(pass.dispatch(&WorkShape::two_d(width, rows), Blocking::No)?);
    }
    Event::wait_all(events)?;
    device.iterations.read_vec()
}

/// Host implementation of `mandelbrot_vis_init`.
fn vis_init_kernel(launch: &SoftwareLaunch) -> ComputeResult<()> {
    let [width, height, _, _] = launch.scalar_uvec4(3)?;
    let pixels = width as usize * height as usize;
    launch.write(0, &vec![0u32; pixels])?;
    match launch.precision() {
        Precision::Single => launch.write(1, &vec![0f32; 2 * pixels]),
        Precision::Double => launch.write(1, &vec![0f64; 2 * pixels]),
    }
}

/// Host implementation of `mandelbrot_vis`.
fn vis_pass_kernel(launch: &SoftwareLaunch) -> ComputeResult<()> {
    match launch.precision() {
        Precision::Single => vis_pass::<f32>(launch),
        Precision::Double => vis_pass::<f64>(launch),
    }
}

fn vis_pass<R: Real>(launch: &SoftwareLaunch) -> ComputeResult<()> {
    let mut counts: Vec<u32> = launch.read(0)?;
    let mut z: Vec<R> = launch.read(1)?;
    let job = read_job::<R>(launch, 2)?;
    let [width, height, job_index, jobs] = launch.scalar_uvec4(3)?;
    let [max, per_pass, _, _] = launch.scalar_uvec4(4)?;

    let updates = launch.map_items(|[x, y, _]| {
        let row = y * jobs + job_index;
        if x >= width || row >= height {
            return None;
        }
        let i = (row * width + x) as usize;
        let (cr, ci) = pixel_coord(&job, x, row);
        let (n, (zr, zi)) = iterate(cr, ci, (*z.get(2 * i)?, *z.get(2 * i + 1)?), *counts.get(i)?, max, per_pass);
        Some((i, n, zr, zi))
    });

    for (i, n, zr, zi) in updates.into_iter().flatten() {
        counts[i] = n;
        z[2 * i] = zr;
        z[2 * i + 1] = zi;
    }
    launch.write(0, &counts)?;
    launch.write(1, &z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl_compute::reflect::EntryPointInfo;
    use hcl_compute::{ContextConfig, DeviceLimits, Platform};

    #[test]
    fn test_frame_before_reset() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut vis = Visualizer::init(&ctx, &Config::default()).unwrap();
        assert!(matches!(vis.frame(), Err(KernelError::InvalidState(_))));
    }

    #[test]
    fn test_first_frame_is_capped_by_budget() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut vis = Visualizer::init(&ctx, &Config::default()).unwrap();
        vis.reset(35, 20, &Viewport::standard(35, 20)).unwrap();
        let frame = vis.frame().unwrap();
        assert!(frame.iterations.iter().all(|&n| n <= VIS_ITERATIONS_PER_PASS));
        assert_eq!(vis.frames_rendered(), 1);
        assert!(!vis.is_converged());
    }

    #[test]
    fn test_reset_restarts() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut vis = Visualizer::init(&ctx, &Config::default()).unwrap();
        let vp = Viewport::standard(16, 8);
        vis.reset(16, 8, &vp).unwrap();
        let first = vis.frame().unwrap();
        vis.frame().unwrap();
        vis.reset(16, 8, &vp).unwrap();
        assert_eq!(vis.frame().unwrap(), first);
    }

    #[test]
    fn test_oversized_reset_rejected() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut vis = Visualizer::init(&ctx, &Config::default()).unwrap();
        let err = vis.reset(70_000, 70_000, &Viewport::standard(70_000, 70_000)).unwrap_err();
        assert!(matches!(err, KernelError::InvalidInput(_)));
        assert!(matches!(vis.frame(), Err(KernelError::InvalidState(_))));
    }

    #[test]
    fn test_init_covers_large_frames_in_two_dimensions() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let vis = Visualizer::init(&ctx, &Config::default()).unwrap();
        let (init, _) = vis.kernels.as_ref().unwrap();
        assert_eq!(init.workgroup_size(), [16, 16, 1]);

        // 4096 x 4096 pixels is 262144 groups of 64 when flattened
        let entry = EntryPointInfo {
            name: init.name().to_string(),
            workgroup_size: init.workgroup_size(),
        };
        let limits = DeviceLimits::default();
        let shape = WorkShape::two_d(4096, 4096).resolve(&entry, &limits, true).unwrap();
        assert_eq!(shape.group_counts(), [256, 256, 1]);
    }
}
