//! ROT13 cipher.
//!
//! Bytes are widened to one `u32` lane each so the kernel never touches
//! sub-word storage. Input may carry a trailing NUL terminator; it is not
//! encoded, and a terminator is written after the output when the output
//! slice has room for one.

use hcl_compute::{
    AccessMode, BufferLifetime, ComputeContext, ComputeError, ComputeResult, DeviceBuffer, Kernel, SoftwareLaunch,
    WorkShape,
};
use tracing::trace;

use crate::{Algorithm, Config, KernelError, KernelResult, build_program, sources, work_items};

/// Message of the reference ROT13 stage.
pub const REFERENCE_MESSAGE: &str = "Hello, World!";

pub struct Rot13<'ctx> {
    ctx: &'ctx ComputeContext,
    kernel: Kernel<'ctx>,
}

impl<'ctx> Algorithm<'ctx> for Rot13<'ctx> {
    const NAME: &'static str = "rot13";

    fn init(ctx: &'ctx ComputeContext, config: &Config) -> KernelResult<Self> {
        ctx.registry().register("rot13", rot13_kernel);
        let program = build_program(ctx.queue(), sources::ROT13, config)?;
        let kernel = program.kernel("rot13")?;
        Ok(Self { ctx, kernel })
    }
}

impl<'ctx> Rot13<'ctx> {
    /// Encode `input` into `output`.
    ///
    /// `output` must hold at least the message (input without its
    /// terminator).
    pub fn run(&mut self, input: &[u8], output: &mut [u8]) -> KernelResult<()> {
        let message = input.strip_suffix(&[0]).unwrap_or(input);
        trace!(len = message.len(), "Rot13::run");

        if output.len() < message.len() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: message.len(),
                actual: output.len(),
            }
            .into());
        }
        if message.is_empty() {
            if let Some(first) = output.first_mut() {
                *first = 0;
            }
            return Ok(());
        }
        let count = work_items(message.len())?;

        let queue = self.ctx.queue();
        let lanes: Vec<u32> = message.iter().map(|&b| u32::from(b)).collect();
        let src = DeviceBuffer::from_slice(queue, &lanes, AccessMode::ReadOnly, BufferLifetime::Transient)?;
        let dst = DeviceBuffer::zeroed::<u32>(queue, lanes.len(), AccessMode::WriteOnly, BufferLifetime::Transient)?;

        let result = self.dispatch(&src, &dst, count);
        self.kernel.clear_args();
        result?;

        let encoded: Vec<u32> = dst.read_vec()?;
        for (out, lane) in output.iter_mut().zip(&encoded) {
            // kernel output is always a byte value
            *out = *lane as u8;
        }
        if let Some(terminator) = output.get_mut(message.len()) {
            *terminator = 0;
        }
        Ok(())
    }

    /// Encode a string. ROT13 maps ASCII to ASCII and leaves every other
    /// byte alone, so UTF-8 text stays valid.
    pub fn encode(&mut self, text: &str) -> KernelResult<String> {
        let mut out = vec![0u8; text.len()];
        self.run(text.as_bytes(), &mut out)?;
        String::from_utf8(out).map_err(|e| KernelError::InvalidInput(e.to_string()))
    }

    fn dispatch(&mut self, src: &DeviceBuffer<'ctx>, dst: &DeviceBuffer<'ctx>, count: u32) -> ComputeResult<()> {
        self.kernel.set_buffer(0, src)?;
        self.kernel.set_buffer(1, dst)?;
        self.kernel.set_scalar(2, count)?;
        self.kernel.run(&WorkShape::one_d(count))
    }
}

/// Rotate one byte by 13 within its case; non-letters pass through.
pub fn rotate_byte(c: u8) -> u8 {
    match c {
        b'A'..=b'Z' => (c - b'A' + 13) % 26 + b'A',
        b'a'..=b'z' => (c - b'a' + 13) % 26 + b'a',
        _ => c,
    }
}

/// Host implementation of the `rot13` entry point.
fn rot13_kernel(launch: &SoftwareLaunch) -> ComputeResult<()> {
    let input: Vec<u32> = launch.read(0)?;
    let count = (launch.scalar_u32(2)? as usize).min(input.len());
    let out = launch.map_items(|[x, _, _]| {
        input
            .get(x as usize)
            .map_or(0, |&c| u8::try_from(c).map_or(c, |b| u32::from(rotate_byte(b))))
    });
    launch.write(1, &out[..count.min(out.len())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl_compute::{ContextConfig, Platform};

    #[test]
    fn test_rotate_byte() {
        assert_eq!(rotate_byte(b'a'), b'n');
        assert_eq!(rotate_byte(b'N'), b'A');
        assert_eq!(rotate_byte(b'z'), b'm');
        assert_eq!(rotate_byte(b'!'), b'!');
        assert_eq!(rotate_byte(0xC3), 0xC3);
    }

    #[test]
    fn test_terminator_handling() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut rot13 = Rot13::init(&ctx, &Config::default()).unwrap();

        let mut out = [0xFFu8; 4];
        rot13.run(b"abc\0", &mut out).unwrap();
        assert_eq!(&out, b"nop\0");

        let mut exact = [0u8; 3];
        rot13.run(b"abc", &mut exact).unwrap();
        assert_eq!(&exact, b"nop");
    }

    #[test]
    fn test_short_output() {
        let ctx = ComputeContext::initialize(&Platform::software(1), &ContextConfig::default()).unwrap();
        let mut rot13 = Rot13::init(&ctx, &Config::default()).unwrap();
        let mut out = [0u8; 2];
        let err = rot13.run(b"abc", &mut out).unwrap_err();
        assert!(matches!(err, KernelError::Compute(ComputeError::BufferSizeMismatch { .. })));
    }
}
