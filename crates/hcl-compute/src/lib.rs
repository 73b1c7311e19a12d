//! Host-side compute orchestration.
//!
//! Discovers compute devices, owns the compute context and its queues,
//! builds kernel programs, moves data between host and device buffers and
//! dispatches kernels over a work shape.
//!
//! # Architecture
//!
//! ```text
//! Platform ── select_device() ──> Device
//!     └── ComputeContext (one Queue per selected device)
//!             ├── Program::build()   ──> Program ── kernel() ──> Kernel
//!             ├── DeviceBuffer       (allocate / write / read)
//!             └── Kernel::dispatch() ──> Event
//!                     └── DeviceBackend trait
//!                             ├── SoftwareBackend (rayon)
//!                             └── WgpuBackend     (compute shaders)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use hcl_compute::*;
//!
//! let platform = Platform::software(1);
//! let ctx = ComputeContext::initialize(&platform, &ContextConfig::default())?;
//! let program = Program::build(ctx.queue(), &source, &BuildOptions::default())?;
//! let mut kernel = program.kernel("sine")?;
//! let buf = DeviceBuffer::from_slice(ctx.queue(), &data, AccessMode::ReadWrite, BufferLifetime::Transient)?;
//! kernel.set_buffer(0, &buf)?;
//! kernel.set_scalar(1, ScalarValue::U32(data.len() as u32))?;
//! kernel.run(&WorkShape::one_d(data.len() as u32))?;
//! buf.read(&mut data)?;
//! ```

pub mod backend;
pub mod buffer;
pub mod context;
pub mod device;
pub mod error;
pub mod kernel;
pub mod program;
pub mod reflect;

pub use backend::{
    BackendInfo, KernelRegistry, SoftwareKernel, SoftwareLaunch, describe_backends, detect_backends,
    select_best_backend,
};
pub use buffer::{AccessMode, BufferLifetime, DeviceBuffer};
pub use context::{ComputeContext, ComputeRuntime, ContextConfig, Event, Queue};
pub use device::{
    Backend, Device, DeviceKind, DeviceLimits, Platform, PlatformConfig, describe_devices,
    select_device, select_devices,
};
pub use error::{ComputeError, ComputeResult, StageFailure, Status, StatusCode, StatusSum};
pub use kernel::{Blocking, Kernel, KernelArg, ResolvedShape, ScalarValue, WorkShape};
pub use program::{BuildOptions, MAX_SOURCE_SIZE, Precision, Program, ProgramSource};
