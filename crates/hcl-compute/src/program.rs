//! Program loading and building.
//!
//! A [`ProgramSource`] is length-checked when it is created, so an oversized
//! source never reaches a build. [`Program::build`] prepends the build-option
//! preamble, reflects the source and hands it to the queue's backend.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backend::{BuildRequest, CompiledProgram};
use crate::context::Queue;
use crate::device::CAP_SHADER_F64;
use crate::kernel::Kernel;
use crate::reflect::{self, EntryPointInfo, ProgramReflection};
use crate::{ComputeError, ComputeResult};

/// Largest accepted kernel source (1 MiB).
pub const MAX_SOURCE_SIZE: u64 = 1024 * 1024;

/// Type alias injected into every program for fractional math.
pub const REAL_TYPE_ALIAS: &str = "real_t";

/// Floating-point precision of fractional kernel math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    #[serde(alias = "float", alias = "f32")]
    Single,
    #[serde(alias = "f64")]
    Double,
}

impl Precision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Double => "double",
        }
    }

    /// WGSL scalar type.
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            Self::Single => "f32",
            Self::Double => "f64",
        }
    }

    /// Size of one element in bytes.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Single => 4,
            Self::Double => 8,
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" | "float" | "f32" => Ok(Self::Single),
            "double" | "f64" => Ok(Self::Double),
            other => Err(format!("unknown precision '{other}' (expected single or double)")),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build options, rendered as a preamble ahead of the source.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub precision: Precision,
    /// Extra `const NAME = value;` declarations.
    pub defines: Vec<(String, String)>,
    /// Extra `alias NAME = type;` declarations.
    pub aliases: Vec<(String, String)>,
}

impl BuildOptions {
    pub fn new(precision: Precision) -> Self {
        Self {
            precision,
            ..Default::default()
        }
    }

    pub fn define(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.defines.push((name.into(), value.to_string()));
        self
    }

    pub fn alias(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.aliases.push((name.into(), ty.into()));
        self
    }

    /// WGSL text prepended to the program source.
    pub fn preamble(&self) -> String {
        let mut out = format!("alias {REAL_TYPE_ALIAS} = {};\n", self.precision.wgsl_type());
        for (name, ty) in &self.aliases {
            out.push_str(&format!("alias {name} = {ty};\n"));
        }
        for (name, value) in &self.defines {
            out.push_str(&format!("const {name} = {value};\n"));
        }
        out
    }
}

/// Kernel source text, at most [`MAX_SOURCE_SIZE`] bytes.
#[derive(Debug, Clone)]
pub struct ProgramSource {
    name: String,
    text: String,
}

impl ProgramSource {
    /// Wrap in-memory source text.
    pub fn from_str(name: impl Into<String>, text: impl Into<String>) -> ComputeResult<Self> {
        let name = name.into();
        let text = text.into();
        check_size(&name, text.len() as u64)?;
        Ok(Self { name, text })
    }

    /// Read a source file; the program name is the file stem.
    ///
    /// The size is checked against metadata first and again on a bounded
    /// read, so a file that grows between the two checks still fails.
    pub fn from_file(path: impl AsRef<Path>) -> ComputeResult<Self> {
        let path = path.as_ref();
        trace!(path = %path.display(), "ProgramSource::from_file");

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let read_err = |source| ComputeError::SourceRead {
            path: path.to_path_buf(),
            source,
        };

        let file = std::fs::File::open(path).map_err(read_err)?;
        let size = file.metadata().map_err(read_err)?.len();
        check_size(&name, size)?;

        let mut bytes = Vec::new();
        file.take(MAX_SOURCE_SIZE + 1)
            .read_to_end(&mut bytes)
            .map_err(read_err)?;
        check_size(&name, bytes.len() as u64)?;

        let text = String::from_utf8(bytes)
            .map_err(|e| read_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        Ok(Self { name, text })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn check_size(name: &str, size: u64) -> ComputeResult<()> {
    if size > MAX_SOURCE_SIZE {
        return Err(ComputeError::SourceTooLarge {
            name: name.to_string(),
            size,
            limit: MAX_SOURCE_SIZE,
        });
    }
    Ok(())
}

pub(crate) struct ProgramInner<'ctx> {
    pub(crate) queue: &'ctx Queue,
    pub(crate) name: String,
    pub(crate) precision: Precision,
    pub(crate) reflection: ProgramReflection,
    pub(crate) compiled: Box<dyn CompiledProgram>,
}

/// A program built for one queue's device.
///
/// Cloning is cheap; kernels keep the program alive.
#[derive(Clone)]
pub struct Program<'ctx> {
    inner: Arc<ProgramInner<'ctx>>,
}

impl<'ctx> Program<'ctx> {
    /// Build `source` for the device behind `queue`.
    pub fn build(queue: &'ctx Queue, source: &ProgramSource, options: &BuildOptions) -> ComputeResult<Self> {
        trace!(program = source.name(), device = queue.device().name(), precision = %options.precision, "Program::build");

        let build_error = |log: String| ComputeError::Build {
            program: source.name().to_string(),
            log,
        };

        if source.is_empty() {
            return Err(build_error("error: empty program source".into()));
        }

        if options.precision == Precision::Double && !queue.device().has_capability(CAP_SHADER_F64) {
            return Err(build_error(format!(
                "error: device '{}' does not support double precision ({CAP_SHADER_F64})",
                queue.device().name()
            )));
        }

        let full_source = format!("{}{}", options.preamble(), source.text());
        let reflection = reflect::reflect(&full_source).map_err(build_error)?;

        let compiled = queue.backend().build(&BuildRequest {
            name: source.name(),
            source: &full_source,
            reflection: &reflection,
            registry: queue.registry(),
        })?;

        debug!(
            program = source.name(),
            device = queue.device().name(),
            entry_points = ?reflection.entry_points.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(),
            "Built program"
        );

        Ok(Self {
            inner: Arc::new(ProgramInner {
                queue,
                name: source.name().to_string(),
                precision: options.precision,
                reflection,
                compiled,
            }),
        })
    }

    /// Resolve a named entry point to a kernel.
    pub fn kernel(&self, name: &str) -> ComputeResult<Kernel<'ctx>> {
        let entry = self
            .inner
            .reflection
            .entry_point(name)
            .cloned()
            .ok_or_else(|| ComputeError::EntryPointNotFound(format!("{} in program '{}'", name, self.inner.name)))?;
        Ok(Kernel::new(self.inner.clone(), entry))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn precision(&self) -> Precision {
        self.inner.precision
    }

    pub fn queue(&self) -> &'ctx Queue {
        self.inner.queue
    }

    pub fn reflection(&self) -> &ProgramReflection {
        &self.inner.reflection
    }

    pub fn entry_points(&self) -> &[EntryPointInfo] {
        &self.inner.reflection.entry_points
    }
}

impl fmt::Debug for Program<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.inner.name)
            .field("precision", &self.inner.precision)
            .field("queue", &self.inner.queue.index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble() {
        let opts = BuildOptions::new(Precision::Single).define("MAX_ITER", 1200u32).alias("idx_t", "u32");
        let pre = opts.preamble();
        assert!(pre.contains("alias real_t = f32;"));
        assert!(pre.contains("alias idx_t = u32;"));
        assert!(pre.contains("const MAX_ITER = 1200;"));

        let pre = BuildOptions::new(Precision::Double).preamble();
        assert_eq!(pre, "alias real_t = f64;\n");
    }

    #[test]
    fn test_source_limit() {
        let ok = "x".repeat(MAX_SOURCE_SIZE as usize);
        assert!(ProgramSource::from_str("ok", ok).is_ok());

        let big = "x".repeat(MAX_SOURCE_SIZE as usize + 1);
        let err = ProgramSource::from_str("big", big).unwrap_err();
        assert!(matches!(err, ComputeError::SourceTooLarge { size, .. } if size == MAX_SOURCE_SIZE + 1));
    }

    #[test]
    fn test_precision_parse() {
        assert_eq!("float".parse::<Precision>().unwrap(), Precision::Single);
        assert_eq!("DOUBLE".parse::<Precision>().unwrap(), Precision::Double);
        assert!("half".parse::<Precision>().is_err());
    }
}
