//! Escape-time arithmetic and frames, shared by host and device paths.
//!
//! The host functions mirror the WGSL kernels operation for operation so a
//! software render and a device render in the same precision agree pixel
//! for pixel.

use std::ops::{Add, Mul, Sub};

use bytemuck::Pod;
use rayon::prelude::*;

/// Floating-point type usable as Mandelbrot coordinates.
pub trait Real: Pod + Send + Sync + PartialOrd + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self> {
    fn from_f64(v: f64) -> Self;
    fn from_u32(v: u32) -> Self;
}

impl Real for f32 {
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn from_u32(v: u32) -> Self {
        v as f32
    }
}

impl Real for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }

    fn from_u32(v: u32) -> Self {
        f64::from(v)
    }
}

/// Region of the complex plane mapped onto pixels.
///
/// Pixel `(x, y)` maps to `origin_x + x * step` on the real axis and
/// `origin_y - y * step` on the imaginary axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub origin_x: f64,
    pub origin_y: f64,
    pub step: f64,
}

impl Viewport {
    /// Whole set: real axis from -2.5 to 1.0, imaginary axis centered.
    pub fn standard(width: u32, height: u32) -> Self {
        let step = 3.5 / f64::from(width.max(1));
        Self {
            origin_x: -2.5,
            origin_y: step * f64::from(height) / 2.0,
            step,
        }
    }

    /// Viewport centered on `(cx, cy)` with `step` per pixel.
    pub fn centered(cx: f64, cy: f64, step: f64, width: u32, height: u32) -> Self {
        Self {
            origin_x: cx - step * f64::from(width) / 2.0,
            origin_y: cy + step * f64::from(height) / 2.0,
            step,
        }
    }

    /// `[origin_x, origin_y, step]` in kernel precision.
    pub fn job<R: Real>(&self) -> [R; 3] {
        [R::from_f64(self.origin_x), R::from_f64(self.origin_y), R::from_f64(self.step)]
    }
}

/// Complex coordinate of a pixel, computed exactly as the kernels do.
pub fn pixel_coord<R: Real>(job: &[R; 3], x: u32, row: u32) -> (R, R) {
    let [ox, oy, step] = *job;
    (ox + R::from_u32(x) * step, oy - R::from_u32(row) * step)
}

/// Advance `z` from iteration `n` until it escapes, reaches `max` or has
/// run `budget` more iterations. An already escaped `z` is returned as is.
pub fn iterate<R: Real>(cr: R, ci: R, z: (R, R), mut n: u32, max: u32, budget: u32) -> (u32, (R, R)) {
    let two = R::from_f64(2.0);
    let four = R::from_f64(4.0);
    let (mut zr, mut zi) = z;
    if zr * zr + zi * zi > four {
        return (n, z);
    }
    let mut k = 0;
    while k < budget && n < max {
        let t = zr * zr - zi * zi + cr;
        zi = two * zr * zi + ci;
        zr = t;
        n += 1;
        k += 1;
        if zr * zr + zi * zi > four {
            break;
        }
    }
    (n, (zr, zi))
}

/// Iterations until `|z| > 2`, capped at `max`.
pub fn escape_time<R: Real>(cr: R, ci: R, max: u32) -> u32 {
    let zero = R::from_f64(0.0);
    iterate(cr, ci, (zero, zero), 0, max, u32::MAX).0
}

/// Render `rows` rows starting at `row_offset` on the host.
pub fn render_rows<R: Real>(viewport: &Viewport, width: u32, row_offset: u32, rows: u32, max: u32) -> Vec<u32> {
    let job = viewport.job::<R>();
    (0..width as usize * rows as usize)
        .into_par_iter()
        .with_min_len(width as usize)
        .map(|i| {
            let x = (i % width as usize) as u32;
            let y = (i / width as usize) as u32 + row_offset;
            let (cr, ci) = pixel_coord(&job, x, y);
            escape_time(cr, ci, max)
        })
        .collect()
}

const GLYPHS: &[u8] = b" .:-=+*#%@";

/// Rendered iteration counts, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub max_iterations: u32,
    pub iterations: Vec<u32>,
}

impl Frame {
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.iterations.get((y * self.width + x) as usize).copied()
    }

    /// Grey level: black inside the set, brighter for slower escape.
    pub fn shade(&self, n: u32) -> u8 {
        if n >= self.max_iterations || self.max_iterations == 0 {
            return 0;
        }
        // sqrt stretches the low iteration counts most pixels land on
        let t = (f64::from(n) / f64::from(self.max_iterations)).sqrt();
        (t * 255.0).round() as u8
    }

    /// Binary PGM (P5) image.
    pub fn to_pgm(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend(self.iterations.iter().map(|&n| self.shade(n)));
        out
    }

    /// Text preview: one glyph per pixel, one line per row.
    pub fn to_ascii(&self) -> String {
        let mut out = String::with_capacity((self.width as usize + 1) * self.height as usize);
        for row in self.iterations.chunks(self.width.max(1) as usize) {
            for &n in row {
                out.push(GLYPHS[self.glyph_index(n)] as char);
            }
            out.push('\n');
        }
        out
    }

    /// Two bytes per pixel, `(colour, glyph)`, row-major; the layout a
    /// terminal renderer consumes. Colour is an index into a 16-entry
    /// palette, 0 for points inside the set.
    pub fn to_char_pairs(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.iterations.len() * 2);
        for &n in &self.iterations {
            let colour = if n >= self.max_iterations { 0 } else { 1 + (n % 15) as u8 };
            out.push(colour);
            out.push(GLYPHS[self.glyph_index(n)]);
        }
        out
    }

    fn glyph_index(&self, n: u32) -> usize {
        if n >= self.max_iterations {
            return GLYPHS.len() - 1;
        }
        (usize::from(self.shade(n)) * (GLYPHS.len() - 1)) / 256
    }
}
