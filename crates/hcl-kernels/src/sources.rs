//! Kernel sources shipped with the crate.
//!
//! Each program is embedded at compile time. A configured kernel directory
//! takes precedence: `<dir>/<name>.wgsl` replaces the embedded text when it
//! exists, and goes through the same size check as any file source.

use std::path::Path;

use hcl_compute::ProgramSource;
use tracing::debug;

use crate::{KernelError, KernelResult};

pub const SINE: &str = "sine";
pub const ROT13: &str = "rot13";
pub const MODULO: &str = "modulo";
pub const MANDELBROT: &str = "mandelbrot";
pub const MANDELBROT_VIS: &str = "mandelbrot_vis";

const EMBEDDED: &[(&str, &str)] = &[
    (SINE, include_str!("../kernels/sine.wgsl")),
    (ROT13, include_str!("../kernels/rot13.wgsl")),
    (MODULO, include_str!("../kernels/modulo.wgsl")),
    (MANDELBROT, include_str!("../kernels/mandelbrot.wgsl")),
    (MANDELBROT_VIS, include_str!("../kernels/mandelbrot_vis.wgsl")),
];

/// Names of every embedded program.
pub fn names() -> impl Iterator<Item = &'static str> {
    EMBEDDED.iter().map(|(name, _)| *name)
}

/// Embedded text of a program.
pub fn embedded(name: &str) -> Option<&'static str> {
    EMBEDDED.iter().find(|(n, _)| *n == name).map(|(_, text)| *text)
}

/// Source for `name`, preferring `kernel_dir` over the embedded copy.
pub fn load(name: &str, kernel_dir: Option<&Path>) -> KernelResult<ProgramSource> {
    let text = embedded(name).ok_or_else(|| KernelError::InvalidConfig(format!("unknown program '{name}'")))?;

    if let Some(dir) = kernel_dir {
        let path = dir.join(format!("{name}.wgsl"));
        if path.is_file() {
            debug!(program = name, path = %path.display(), "Loading kernel source override");
            return Ok(ProgramSource::from_file(&path)?);
        }
    }
    Ok(ProgramSource::from_str(name, text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_embedded() {
        for name in names() {
            let source = load(name, None).unwrap();
            assert_eq!(source.name(), name);
            assert!(source.text().contains("@compute"));
        }
    }

    #[test]
    fn test_unknown_program() {
        assert!(matches!(load("fft", None), Err(KernelError::InvalidConfig(_))));
    }

    #[test]
    fn test_missing_override_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let source = load(SINE, Some(dir.path())).unwrap();
        assert_eq!(source.text(), embedded(SINE).unwrap());
    }
}
