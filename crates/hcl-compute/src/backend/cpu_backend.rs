//! Software backend using rayon for parallelization.
//!
//! Buffers live in host memory. Programs are built by resolving every
//! reflected entry point against a [`KernelRegistry`] of host kernels, so a
//! program only builds for software devices when each of its entry points has
//! a registered implementation.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use bytemuck::Pod;
use rayon::prelude::*;
use tracing::{debug, trace};

use super::{
    AsAny, BoundArg, BufferHandle, BuildRequest, CompiledProgram, CompletedWork, DeviceBackend,
    Launch, PendingWork, downcast_buffer, downcast_program,
};
use crate::device::{
    Backend, CAP_SHADER_F64, CAP_SOFTWARE, Device, DeviceKind, DeviceLimits, DeviceSource,
};
use crate::kernel::{ResolvedShape, ScalarValue};
use crate::program::Precision;
use crate::{ComputeError, ComputeResult};

const BACKEND_NAME: &str = "software";

/// Enumerate `count` software devices sharing the host's memory.
pub(crate) fn enumerate(count: usize) -> Vec<Device> {
    // Available RAM (fallback to 4GB if detection fails)
    let available = sys_info::mem_info()
        .map(|m| m.avail * 1024)
        .unwrap_or(4 * 1024 * 1024 * 1024);
    let cpus = sys_info::cpu_num().unwrap_or(1);

    let limits = DeviceLimits {
        max_buffer_bytes: available.max(1),
        max_work_group_size: 1024,
        preferred_work_group_multiple: 16,
        max_work_groups_per_dimension: u32::MAX,
        global_memory: available,
    };

    (0..count)
        .map(|i| {
            Device::new(
                format!("Software Device {i} ({cpus} threads)"),
                DeviceKind::Software,
                Backend::Software,
                [CAP_SOFTWARE.to_string(), CAP_SHADER_F64.to_string()],
                limits.clone(),
                DeviceSource::Software,
            )
        })
        .collect()
}

// =============================================================================
// Host kernels
// =============================================================================

/// Host implementation of a program entry point.
pub trait SoftwareKernel: Send + Sync {
    fn run(&self, launch: &SoftwareLaunch) -> ComputeResult<()>;
}

impl<F> SoftwareKernel for F
where
    F: Fn(&SoftwareLaunch) -> ComputeResult<()> + Send + Sync,
{
    fn run(&self, launch: &SoftwareLaunch) -> ComputeResult<()> {
        self(launch)
    }
}

/// Entry-point name -> host kernel table consulted by software builds.
#[derive(Default)]
pub struct KernelRegistry {
    kernels: RwLock<HashMap<String, Arc<dyn SoftwareKernel>>>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the host kernel for an entry point.
    pub fn register(&self, entry_point: impl Into<String>, kernel: impl SoftwareKernel + 'static) {
        let entry_point = entry_point.into();
        trace!(entry_point = %entry_point, "KernelRegistry::register");
        self.write_lock().insert(entry_point, Arc::new(kernel));
    }

    pub fn get(&self, entry_point: &str) -> Option<Arc<dyn SoftwareKernel>> {
        self.read_lock().get(entry_point).cloned()
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.read_lock().contains_key(entry_point)
    }

    /// Registered entry points, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<dyn SoftwareKernel>>> {
        self.kernels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<dyn SoftwareKernel>>> {
        self.kernels.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for KernelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelRegistry").field("kernels", &self.names()).finish()
    }
}

/// Argument as seen by a host kernel.
#[derive(Clone)]
enum SoftwareArg {
    Buffer(Arc<Mutex<Vec<u8>>>),
    Scalar(ScalarValue),
}

/// Everything a host kernel needs for one launch.
///
/// Arguments are addressed by binding index, the same way the device source
/// addresses them.
pub struct SoftwareLaunch {
    entry_point: String,
    args: Vec<SoftwareArg>,
    shape: ResolvedShape,
    precision: Precision,
}

impl SoftwareLaunch {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn shape(&self) -> &ResolvedShape {
        &self.shape
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    fn arg(&self, index: usize) -> ComputeResult<&SoftwareArg> {
        self.args.get(index).ok_or_else(|| {
            ComputeError::Dispatch(format!(
                "{}: argument {index} missing (have {})",
                self.entry_point,
                self.args.len()
            ))
        })
    }

    fn scalar(&self, index: usize) -> ComputeResult<ScalarValue> {
        match self.arg(index)? {
            SoftwareArg::Scalar(value) => Ok(*value),
            SoftwareArg::Buffer(_) => Err(ComputeError::Dispatch(format!(
                "{}: argument {index} is a buffer, expected a scalar",
                self.entry_point
            ))),
        }
    }

    fn buffer(&self, index: usize) -> ComputeResult<MutexGuard<'_, Vec<u8>>> {
        match self.arg(index)? {
            SoftwareArg::Buffer(data) => Ok(data.lock().unwrap_or_else(|e| e.into_inner())),
            SoftwareArg::Scalar(_) => Err(ComputeError::Dispatch(format!(
                "{}: argument {index} is a scalar, expected a buffer",
                self.entry_point
            ))),
        }
    }

    pub fn scalar_u32(&self, index: usize) -> ComputeResult<u32> {
        match self.scalar(index)? {
            ScalarValue::U32(v) => Ok(v),
            ScalarValue::I32(v) => Ok(v as u32),
            ScalarValue::UVec4(v) => Ok(v[0]),
            other => Err(self.scalar_mismatch(index, "u32", other)),
        }
    }

    pub fn scalar_f32(&self, index: usize) -> ComputeResult<f32> {
        match self.scalar(index)? {
            ScalarValue::F32(v) => Ok(v),
            ScalarValue::F64(v) => Ok(v as f32),
            other => Err(self.scalar_mismatch(index, "f32", other)),
        }
    }

    pub fn scalar_f64(&self, index: usize) -> ComputeResult<f64> {
        match self.scalar(index)? {
            ScalarValue::F64(v) => Ok(v),
            ScalarValue::F32(v) => Ok(v as f64),
            other => Err(self.scalar_mismatch(index, "f64", other)),
        }
    }

    pub fn scalar_uvec4(&self, index: usize) -> ComputeResult<[u32; 4]> {
        match self.scalar(index)? {
            ScalarValue::UVec4(v) => Ok(v),
            other => Err(self.scalar_mismatch(index, "vec4<u32>", other)),
        }
    }

    fn scalar_mismatch(&self, index: usize, expected: &str, actual: ScalarValue) -> ComputeError {
        ComputeError::Dispatch(format!(
            "{}: argument {index} is {actual:?}, expected {expected}",
            self.entry_point
        ))
    }

    /// Copy a buffer argument out as elements of `T`.
    pub fn read<T: Pod>(&self, index: usize) -> ComputeResult<Vec<T>> {
        let data = self.buffer(index)?;
        Ok(bytemuck::pod_collect_to_vec(&data[..]))
    }

    /// Overwrite the start of a buffer argument with `values`.
    pub fn write<T: Pod>(&self, index: usize, values: &[T]) -> ComputeResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let mut data = self.buffer(index)?;
        if bytes.len() > data.len() {
            return Err(ComputeError::BufferSizeMismatch {
                expected: data.len(),
                actual: bytes.len(),
            });
        }
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Evaluate `f` for every work item, in parallel.
    ///
    /// Results are ordered by linear item index (x fastest). Work-group size
    /// bounds the minimum chunk a rayon task processes.
    pub fn map_items<T, F>(&self, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn([u32; 3]) -> T + Sync + Send,
    {
        let [gx, gy, gz] = self.shape.global;
        let total = gx as usize * gy as usize * gz as usize;
        let plane = gx as usize * gy as usize;

        (0..total)
            .into_par_iter()
            .with_min_len(self.shape.local_items().max(1))
            .map(|i| {
                let x = (i % gx as usize) as u32;
                let y = ((i % plane) / gx as usize) as u32;
                let z = (i / plane) as u32;
                f([x, y, z])
            })
            .collect()
    }
}

// =============================================================================
// Buffers and programs
// =============================================================================

/// Host-memory buffer.
pub struct CpuBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    size: u64,
}

impl CpuBuffer {
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AsAny for CpuBuffer {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl BufferHandle for CpuBuffer {
    fn size_bytes(&self) -> u64 {
        self.size
    }
}

/// Program resolved to host kernels.
pub struct CpuProgram {
    kernels: HashMap<String, Arc<dyn SoftwareKernel>>,
}

impl AsAny for CpuProgram {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl CompiledProgram for CpuProgram {
    fn entry_points(&self) -> Vec<&str> {
        self.kernels.keys().map(String::as_str).collect()
    }
}

/// Launch running on the rayon pool.
struct CpuPending {
    rx: Mutex<Receiver<ComputeResult<()>>>,
    done: Mutex<Option<ComputeResult<()>>>,
}

impl PendingWork for CpuPending {
    fn wait(self: Box<Self>) -> ComputeResult<()> {
        let this = *self;
        if let Some(result) = this.done.into_inner().unwrap_or_else(|e| e.into_inner()) {
            return result;
        }
        let rx = this.rx.into_inner().unwrap_or_else(|e| e.into_inner());
        rx.recv()
            .map_err(|_| ComputeError::Dispatch("software kernel panicked".into()))?
    }

    fn is_complete(&self) -> bool {
        let mut done = self.done.lock().unwrap_or_else(|e| e.into_inner());
        if done.is_some() {
            return true;
        }
        let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
        match rx.try_recv() {
            Ok(result) => {
                *done = Some(result);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                *done = Some(Err(ComputeError::Dispatch("software kernel panicked".into())));
                true
            }
        }
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Software device backend.
pub struct SoftwareBackend {
    limits: DeviceLimits,
}

impl SoftwareBackend {
    pub fn new(limits: DeviceLimits) -> Self {
        Self { limits }
    }
}

impl DeviceBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn uses_declared_workgroup_size(&self) -> bool {
        false
    }

    fn allocate(&self, size_bytes: u64) -> ComputeResult<Box<dyn BufferHandle>> {
        if size_bytes == 0 {
            return Err(ComputeError::Allocation("zero-sized buffer".into()));
        }
        if size_bytes > self.limits.max_buffer_bytes {
            return Err(ComputeError::Allocation(format!(
                "{size_bytes} bytes exceeds device limit of {} bytes",
                self.limits.max_buffer_bytes
            )));
        }

        let len = usize::try_from(size_bytes)
            .map_err(|_| ComputeError::Allocation(format!("{size_bytes} bytes is not addressable")))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| ComputeError::Allocation(format!("{size_bytes} bytes: {e}")))?;
        data.resize(len, 0);

        Ok(Box::new(CpuBuffer {
            data: Arc::new(Mutex::new(data)),
            size: size_bytes,
        }))
    }

    fn write(&self, buffer: &dyn BufferHandle, bytes: &[u8]) -> ComputeResult<()> {
        let buffer = downcast_buffer::<CpuBuffer>(buffer, BACKEND_NAME)?;
        let mut data = buffer.lock();
        if bytes.len() > data.len() {
            return Err(ComputeError::Transfer(format!(
                "write of {} bytes into {} byte buffer",
                bytes.len(),
                data.len()
            )));
        }
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read(&self, buffer: &dyn BufferHandle, out: &mut [u8]) -> ComputeResult<()> {
        let buffer = downcast_buffer::<CpuBuffer>(buffer, BACKEND_NAME)?;
        let data = buffer.lock();
        if out.len() > data.len() {
            return Err(ComputeError::Transfer(format!(
                "read of {} bytes from {} byte buffer",
                out.len(),
                data.len()
            )));
        }
        out.copy_from_slice(&data[..out.len()]);
        Ok(())
    }

    fn build(&self, request: &BuildRequest<'_>) -> ComputeResult<Box<dyn CompiledProgram>> {
        let mut kernels = HashMap::new();
        let mut log = String::new();

        for entry in &request.reflection.entry_points {
            match request.registry.get(&entry.name) {
                Some(kernel) => {
                    kernels.insert(entry.name.clone(), kernel);
                }
                None => log.push_str(&format!(
                    "error: entry point '{}' has no host implementation\n",
                    entry.name
                )),
            }
        }

        if !log.is_empty() {
            return Err(ComputeError::Build {
                program: request.name.to_string(),
                log,
            });
        }

        debug!(program = request.name, entry_points = kernels.len(), "Built software program");
        Ok(Box::new(CpuProgram { kernels }))
    }

    fn launch(&self, program: &dyn CompiledProgram, launch: &Launch<'_>) -> ComputeResult<Box<dyn PendingWork>> {
        let program = downcast_program::<CpuProgram>(program, BACKEND_NAME)?;
        let kernel = program
            .kernels
            .get(launch.entry_point)
            .cloned()
            .ok_or_else(|| ComputeError::EntryPointNotFound(launch.entry_point.to_string()))?;

        let args = launch
            .args
            .iter()
            .map(|arg| match arg {
                BoundArg::Buffer(handle) => {
                    downcast_buffer::<CpuBuffer>(*handle, BACKEND_NAME).map(|b| SoftwareArg::Buffer(b.data.clone()))
                }
                BoundArg::Scalar(value) => Ok(SoftwareArg::Scalar(*value)),
            })
            .collect::<ComputeResult<Vec<_>>>()?;

        let work = SoftwareLaunch {
            entry_point: launch.entry_point.to_string(),
            args,
            shape: launch.shape.clone(),
            precision: launch.precision,
        };

        trace!(entry_point = launch.entry_point, global = ?launch.shape.global, blocking = launch.blocking, "software launch");

        if launch.blocking {
            kernel.run(&work)?;
            return Ok(Box::new(CompletedWork));
        }

        let (tx, rx) = mpsc::channel();
        rayon::spawn(move || {
            let _ = tx.send(kernel.run(&work));
        });
        Ok(Box::new(CpuPending {
            rx: Mutex::new(rx),
            done: Mutex::new(None),
        }))
    }
}
