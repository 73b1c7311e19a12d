//! Kernel argument binding and dispatch.
//!
//! Arguments are positional and map one-to-one onto the program's reflected
//! bindings: buffers bind to `storage` bindings, scalars to `uniform`
//! bindings. A kernel can be re-run any number of times; bindings persist
//! until [`Kernel::clear_args`].

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::backend::{BoundArg, BufferHandle, Launch};
use crate::buffer::{AccessMode, DeviceBuffer};
use crate::context::{Event, Queue};
use crate::device::DeviceLimits;
use crate::program::ProgramInner;
use crate::reflect::{AddressSpace, EntryPointInfo};
use crate::{ComputeError, ComputeResult};

/// Scalar kernel argument, bound to a `var<uniform>` binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    U32(u32),
    I32(i32),
    F32(f32),
    F64(f64),
    UVec4([u32; 4]),
}

impl ScalarValue {
    /// Uniform buffer contents, zero-padded to 16 bytes.
    pub fn to_uniform_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        match *self {
            Self::U32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Self::I32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Self::F32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Self::F64(v) => out[..8].copy_from_slice(&v.to_le_bytes()),
            Self::UVec4(v) => out.copy_from_slice(bytemuck::cast_slice(&v)),
        }
        out
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::U32(_) => "u32",
            Self::I32(_) => "i32",
            Self::F32(_) => "f32",
            Self::F64(_) => "f64",
            Self::UVec4(_) => "vec4<u32>",
        }
    }
}

impl From<u32> for ScalarValue {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<f32> for ScalarValue {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<[u32; 4]> for ScalarValue {
    fn from(v: [u32; 4]) -> Self {
        Self::UVec4(v)
    }
}

/// A positional kernel argument.
pub enum KernelArg<'a, 'ctx> {
    Buffer(&'a DeviceBuffer<'ctx>),
    Scalar(ScalarValue),
}

/// Whether dispatch waits for completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocking {
    Yes,
    No,
}

// =============================================================================
// Work shape
// =============================================================================

/// Requested global (and optional local) work size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkShape {
    pub global: [u32; 3],
    /// Number of meaningful dimensions (1..=3).
    pub dims: u32,
    pub local: Option<[u32; 3]>,
}

impl WorkShape {
    pub fn one_d(x: u32) -> Self {
        Self {
            global: [x, 1, 1],
            dims: 1,
            local: None,
        }
    }

    pub fn two_d(x: u32, y: u32) -> Self {
        Self {
            global: [x, y, 1],
            dims: 2,
            local: None,
        }
    }

    pub fn three_d(x: u32, y: u32, z: u32) -> Self {
        Self {
            global: [x, y, z],
            dims: 3,
            local: None,
        }
    }

    /// Request an explicit local size (missing extents are 1).
    pub fn with_local(mut self, local: &[u32]) -> Self {
        let mut l = [1u32; 3];
        for (slot, v) in l.iter_mut().zip(local) {
            *slot = *v;
        }
        self.local = Some(l);
        self
    }

    /// Total number of work items.
    pub fn total_items(&self) -> u64 {
        self.global.iter().map(|&g| g as u64).product()
    }

    /// Resolve the local size for a device.
    ///
    /// With `declared` set the entry point's `@workgroup_size` is the only
    /// legal local size and the global extent is covered by whole groups.
    pub fn resolve(&self, entry: &EntryPointInfo, limits: &DeviceLimits, declared: bool) -> ComputeResult<ResolvedShape> {
        if !(1..=3).contains(&self.dims) {
            return Err(ComputeError::InvalidGlobalWorkSize(format!(
                "{} dimensions (expected 1 to 3)",
                self.dims
            )));
        }
        if self.global.contains(&0) {
            return Err(ComputeError::InvalidGlobalWorkSize(format!("{:?} has a zero extent", self.global)));
        }
        if self.global[self.dims as usize..].iter().any(|&g| g != 1) {
            return Err(ComputeError::InvalidGlobalWorkSize(format!(
                "{:?} uses more than {} dimensions",
                self.global, self.dims
            )));
        }

        let local = if declared {
            let wg = entry.workgroup_size;
            match self.local {
                Some(requested) if requested != wg => {
                    return Err(ComputeError::InvalidWorkShape(format!(
                        "{}: local size {requested:?} differs from declared @workgroup_size {wg:?}",
                        entry.name
                    )));
                }
                _ => {}
            }
            Some(wg)
        } else if let Some(local) = self.local {
            validate_local(&self.global, &local, limits)?;
            Some(local)
        } else {
            let m = limits.preferred_work_group_multiple;
            (m > 0 && m <= limits.max_work_group_size && self.global[0] % m == 0).then_some([m, 1, 1])
        };

        let resolved = ResolvedShape {
            global: self.global,
            local,
            dims: self.dims,
        };
        for (axis, groups) in resolved.group_counts().iter().enumerate() {
            if *groups > limits.max_work_groups_per_dimension {
                return Err(ComputeError::InvalidGlobalWorkSize(format!(
                    "{groups} work groups along axis {axis} exceeds device limit of {}",
                    limits.max_work_groups_per_dimension
                )));
            }
        }
        Ok(resolved)
    }
}

fn validate_local(global: &[u32; 3], local: &[u32; 3], limits: &DeviceLimits) -> ComputeResult<()> {
    if local.contains(&0) {
        return Err(ComputeError::InvalidWorkShape(format!("local size {local:?} has a zero extent")));
    }
    if let Some(axis) = (0..3).find(|&i| global[i] % local[i] != 0) {
        return Err(ComputeError::InvalidWorkShape(format!(
            "local size {} does not divide global size {} along axis {axis}",
            local[axis], global[axis]
        )));
    }
    let items: u64 = local.iter().map(|&l| l as u64).product();
    if items > limits.max_work_group_size as u64 {
        return Err(ComputeError::InvalidWorkShape(format!(
            "local size {local:?} ({items} items) exceeds device limit of {}",
            limits.max_work_group_size
        )));
    }
    Ok(())
}

/// Work shape after local-size resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShape {
    pub global: [u32; 3],
    /// `None` means global-only: the device picks its own grouping.
    pub local: Option<[u32; 3]>,
    pub dims: u32,
}

impl ResolvedShape {
    /// Work groups per axis, rounding partial groups up.
    pub fn group_counts(&self) -> [u32; 3] {
        let local = self.local.unwrap_or([1, 1, 1]);
        [
            self.global[0].div_ceil(local[0]),
            self.global[1].div_ceil(local[1]),
            self.global[2].div_ceil(local[2]),
        ]
    }

    pub fn total_items(&self) -> u64 {
        self.global.iter().map(|&g| g as u64).product()
    }

    /// Items per work group (1 when global-only).
    pub fn local_items(&self) -> usize {
        self.local.map(|l| l.iter().map(|&v| v as usize).product()).unwrap_or(1)
    }
}

// =============================================================================
// Kernel
// =============================================================================

#[derive(Clone)]
enum Bound {
    Buffer(Arc<dyn BufferHandle>),
    Scalar(ScalarValue),
}

/// A named entry point of a built program.
pub struct Kernel<'ctx> {
    program: Arc<ProgramInner<'ctx>>,
    entry: EntryPointInfo,
    args: Vec<Option<Bound>>,
}

impl<'ctx> Kernel<'ctx> {
    pub(crate) fn new(program: Arc<ProgramInner<'ctx>>, entry: EntryPointInfo) -> Self {
        let arity = program.reflection.bindings.len();
        Self {
            program,
            entry,
            args: vec![None; arity],
        }
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Number of positional arguments.
    pub fn arity(&self) -> u32 {
        self.args.len() as u32
    }

    /// Queue the owning program was built for.
    pub fn queue(&self) -> &'ctx Queue {
        self.program.queue
    }

    /// Declared `@workgroup_size`.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.entry.workgroup_size
    }

    /// Lowest argument index not yet bound.
    fn next_unbound(&self) -> u32 {
        self.args.iter().position(Option::is_none).unwrap_or(self.args.len()) as u32
    }

    /// Bind a positional argument.
    ///
    /// `index` may re-bind any bound argument or bind the next unbound one.
    pub fn set_arg(&mut self, index: u32, arg: KernelArg<'_, 'ctx>) -> ComputeResult<()> {
        trace!(kernel = %self.entry.name, index, "Kernel::set_arg");

        let arity = self.arity();
        if index >= arity {
            return Err(ComputeError::InvalidArgumentIndex {
                kernel: self.entry.name.clone(),
                index,
                arity,
            });
        }
        let next = self.next_unbound();
        if index > next {
            return Err(ComputeError::ArgumentOutOfOrder {
                kernel: self.entry.name.clone(),
                index,
                next,
            });
        }

        let binding = &self.program.reflection.bindings[index as usize];
        let mismatch = |reason: String| ComputeError::ArgumentMismatch {
            kernel: self.entry.name.clone(),
            index,
            reason,
        };

        let bound = match arg {
            KernelArg::Scalar(value) => {
                if binding.space != AddressSpace::Uniform {
                    return Err(mismatch(format!(
                        "scalar {} bound to '{}' (var<{}>)",
                        value.type_name(),
                        binding.name,
                        binding.space.name()
                    )));
                }
                Bound::Scalar(value)
            }
            KernelArg::Buffer(buffer) => {
                if !binding.space.is_storage() {
                    return Err(mismatch(format!("buffer bound to uniform '{}'", binding.name)));
                }
                if !std::ptr::eq(buffer.queue(), self.program.queue) {
                    return Err(mismatch(format!(
                        "buffer belongs to queue {}, kernel to queue {}",
                        buffer.queue().index(),
                        self.program.queue.index()
                    )));
                }
                match (buffer.mode(), binding.space) {
                    (AccessMode::ReadOnly, AddressSpace::StorageReadWrite) => {
                        return Err(mismatch(format!("read-only buffer bound to writable '{}'", binding.name)));
                    }
                    (AccessMode::WriteOnly, AddressSpace::Storage) => {
                        return Err(mismatch(format!("write-only buffer bound to read-only '{}'", binding.name)));
                    }
                    _ => {}
                }
                Bound::Buffer(buffer.handle().clone())
            }
        };

        self.args[index as usize] = Some(bound);
        Ok(())
    }

    pub fn set_buffer(&mut self, index: u32, buffer: &DeviceBuffer<'ctx>) -> ComputeResult<()> {
        self.set_arg(index, KernelArg::Buffer(buffer))
    }

    pub fn set_scalar(&mut self, index: u32, value: impl Into<ScalarValue>) -> ComputeResult<()> {
        self.set_arg(index, KernelArg::Scalar(value.into()))
    }

    /// Drop every binding (releases bound buffers).
    pub fn clear_args(&mut self) {
        self.args.iter_mut().for_each(|a| *a = None);
    }

    /// Dispatch over `shape`.
    ///
    /// Blocking dispatch returns a completed event; non-blocking dispatch
    /// returns an event to wait on. Either way the queue stays in order.
    pub fn dispatch(&self, shape: &WorkShape, blocking: Blocking) -> ComputeResult<Event<'ctx>> {
        let queue = self.program.queue;
        trace!(kernel = %self.entry.name, queue = queue.index(), global = ?shape.global, ?blocking, "Kernel::dispatch");

        if let Some(index) = self.args.iter().position(Option::is_none) {
            return Err(ComputeError::UnboundArgument {
                kernel: self.entry.name.clone(),
                index: index as u32,
            });
        }

        let resolved = shape.resolve(
            &self.entry,
            queue.device().limits(),
            queue.backend().uses_declared_workgroup_size(),
        )?;

        let args: Vec<BoundArg<'_>> = self
            .args
            .iter()
            .flatten()
            .map(|a| match a {
                Bound::Buffer(handle) => BoundArg::Buffer(handle.as_ref()),
                Bound::Scalar(value) => BoundArg::Scalar(*value),
            })
            .collect();

        queue.submit(
            self.program.compiled.as_ref(),
            &Launch {
                entry_point: &self.entry.name,
                args: &args,
                shape: &resolved,
                precision: self.program.precision,
                blocking: blocking == Blocking::Yes,
            },
        )
    }

    /// Blocking dispatch.
    pub fn run(&self, shape: &WorkShape) -> ComputeResult<()> {
        self.dispatch(shape, Blocking::Yes).map(|_| ())
    }
}

impl fmt::Debug for Kernel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.entry.name)
            .field("program", &self.program.name)
            .field("bound", &self.args.iter().filter(|a| a.is_some()).count())
            .field("arity", &self.args.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(wg: [u32; 3]) -> EntryPointInfo {
        EntryPointInfo {
            name: "k".into(),
            workgroup_size: wg,
        }
    }

    fn limits() -> DeviceLimits {
        DeviceLimits {
            max_work_group_size: 256,
            preferred_work_group_multiple: 16,
            ..Default::default()
        }
    }

    #[test]
    fn test_uniform_bytes() {
        assert_eq!(&ScalarValue::U32(7).to_uniform_bytes()[..4], &7u32.to_le_bytes());
        let v = ScalarValue::UVec4([1, 2, 3, 4]).to_uniform_bytes();
        assert_eq!(&v[12..], &4u32.to_le_bytes());
        assert_eq!(&ScalarValue::F64(1.5).to_uniform_bytes()[8..], &[0u8; 8]);
    }

    #[test]
    fn test_preferred_multiple() {
        let r = WorkShape::one_d(10240).resolve(&entry([64, 1, 1]), &limits(), false).unwrap();
        assert_eq!(r.local, Some([16, 1, 1]));
        assert_eq!(r.group_counts(), [640, 1, 1]);

        let r = WorkShape::one_d(13).resolve(&entry([64, 1, 1]), &limits(), false).unwrap();
        assert_eq!(r.local, None);
        assert_eq!(r.group_counts(), [13, 1, 1]);
    }

    #[test]
    fn test_declared_size() {
        let r = WorkShape::one_d(13).resolve(&entry([64, 1, 1]), &limits(), true).unwrap();
        assert_eq!(r.local, Some([64, 1, 1]));
        assert_eq!(r.group_counts(), [1, 1, 1]);

        let err = WorkShape::one_d(128)
            .with_local(&[32])
            .resolve(&entry([64, 1, 1]), &limits(), true)
            .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidWorkShape(_)));
    }

    #[test]
    fn test_explicit_local() {
        let ok = WorkShape::two_d(64, 32).with_local(&[8, 8]).resolve(&entry([1, 1, 1]), &limits(), false);
        assert_eq!(ok.unwrap().group_counts(), [8, 4, 1]);

        let not_divisible = WorkShape::one_d(100).with_local(&[16]).resolve(&entry([1, 1, 1]), &limits(), false);
        assert!(matches!(not_divisible, Err(ComputeError::InvalidWorkShape(_))));

        let too_big = WorkShape::one_d(1024).with_local(&[512]).resolve(&entry([1, 1, 1]), &limits(), false);
        assert!(matches!(too_big, Err(ComputeError::InvalidWorkShape(_))));
    }

    #[test]
    fn test_zero_global() {
        let err = WorkShape::two_d(0, 4).resolve(&entry([1, 1, 1]), &limits(), false).unwrap_err();
        assert!(matches!(err, ComputeError::InvalidGlobalWorkSize(_)));
        assert_eq!(err.status().code(), -63);
    }
}
