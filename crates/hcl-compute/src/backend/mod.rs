//! Device backends.
//!
//! Provides a software (rayon) backend and a wgpu backend behind one
//! object-safe trait.
//!
//! # Architecture
//!
//! ```text
//! Queue ── Arc<dyn DeviceBackend>
//!     +-- SoftwareBackend (host memory, rayon, registry-resolved kernels)
//!     +-- WgpuBackend     (Vulkan/Metal/DX12 compute pipelines)
//! ```
//!
//! Core types above this layer never see backend-specific handles; they hold
//! `dyn BufferHandle` / `dyn CompiledProgram` and the backend downcasts.

pub(crate) mod cpu_backend;
mod detect;

#[cfg(feature = "wgpu")]
pub(crate) mod wgpu_backend;

pub use cpu_backend::{KernelRegistry, SoftwareBackend, SoftwareKernel, SoftwareLaunch};
pub use detect::{BackendInfo, describe_backends, detect_backends, select_best_backend};

#[cfg(feature = "wgpu")]
pub use wgpu_backend::WgpuBackend;

use std::sync::Arc;

use crate::device::{Device, DeviceSource};
use crate::kernel::{ResolvedShape, ScalarValue};
use crate::program::Precision;
use crate::reflect::ProgramReflection;
use crate::{ComputeError, ComputeResult};

/// Helper trait for downcasting.
pub trait AsAny: 'static {
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Handle to a buffer in device memory.
pub trait BufferHandle: Send + Sync + AsAny {
    /// Usable size in bytes.
    fn size_bytes(&self) -> u64;
}

/// A program built for one backend.
pub trait CompiledProgram: Send + Sync + AsAny {
    /// Entry points the backend can launch.
    fn entry_points(&self) -> Vec<&str>;
}

/// Work submitted to a device that may still be running.
pub trait PendingWork: Send {
    /// Block until the work completes.
    fn wait(self: Box<Self>) -> ComputeResult<()>;

    /// Non-blocking completion check.
    fn is_complete(&self) -> bool;
}

/// Work that finished before the launch call returned.
pub(crate) struct CompletedWork;

impl PendingWork for CompletedWork {
    fn wait(self: Box<Self>) -> ComputeResult<()> {
        Ok(())
    }

    fn is_complete(&self) -> bool {
        true
    }
}

/// Argument value as seen by a backend.
pub enum BoundArg<'a> {
    Buffer(&'a dyn BufferHandle),
    Scalar(ScalarValue),
}

/// Program build request.
pub struct BuildRequest<'a> {
    /// Program name, used in diagnostics.
    pub name: &'a str,
    /// Full source text including the build-option preamble.
    pub source: &'a str,
    pub reflection: &'a ProgramReflection,
    /// Host implementations for software devices.
    pub registry: &'a KernelRegistry,
}

/// One kernel launch.
pub struct Launch<'a> {
    pub entry_point: &'a str,
    /// Positional arguments, one per reflected binding.
    pub args: &'a [BoundArg<'a>],
    pub shape: &'a ResolvedShape,
    pub precision: Precision,
    /// Run to completion before returning.
    pub blocking: bool,
}

/// Core device operations abstraction.
pub trait DeviceBackend: Send + Sync {
    /// Backend name.
    fn name(&self) -> &'static str;

    /// Whether dispatch must use the work-group size declared in the source.
    fn uses_declared_workgroup_size(&self) -> bool;

    /// Allocate a zero-initialized buffer.
    fn allocate(&self, size_bytes: u64) -> ComputeResult<Box<dyn BufferHandle>>;

    /// Blocking host -> device copy starting at offset 0.
    fn write(&self, buffer: &dyn BufferHandle, bytes: &[u8]) -> ComputeResult<()>;

    /// Blocking device -> host copy starting at offset 0.
    fn read(&self, buffer: &dyn BufferHandle, out: &mut [u8]) -> ComputeResult<()>;

    /// Build a program; failures carry the diagnostic log.
    fn build(&self, request: &BuildRequest<'_>) -> ComputeResult<Box<dyn CompiledProgram>>;

    /// Launch one entry point.
    fn launch(&self, program: &dyn CompiledProgram, launch: &Launch<'_>) -> ComputeResult<Box<dyn PendingWork>>;
}

/// Open a device, creating its backend instance.
pub(crate) fn open(device: &Device) -> ComputeResult<Arc<dyn DeviceBackend>> {
    match &device.source {
        DeviceSource::Software => Ok(Arc::new(SoftwareBackend::new(device.limits().clone()))),
        #[cfg(feature = "wgpu")]
        DeviceSource::Wgpu(adapter) => Ok(Arc::new(WgpuBackend::open(adapter, device.limits().clone())?)),
    }
}

/// Downcast a buffer handle to a backend type.
pub(crate) fn downcast_buffer<'a, T: 'static>(handle: &'a dyn BufferHandle, backend: &str) -> ComputeResult<&'a T> {
    handle
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ComputeError::Transfer(format!("buffer does not belong to a {backend} device")))
}

/// Downcast a compiled program to a backend type.
pub(crate) fn downcast_program<'a, T: 'static>(program: &'a dyn CompiledProgram, backend: &str) -> ComputeResult<&'a T> {
    program
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ComputeError::Dispatch(format!("program was not built for a {backend} device")))
}
