//! wgpu backend: WGSL compute pipelines on Vulkan/Metal/DX12 adapters.
//!
//! Each program becomes one shader module, one explicit bind-group layout
//! built from reflection (so bindings an entry point never touches are not
//! dropped) and one compute pipeline per entry point. Scalars are uploaded as
//! 16-byte uniform buffers. Validation errors are captured with error scopes
//! and surface as build or dispatch logs.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc;

use tracing::{debug, trace, warn};
use wgpu::util::DeviceExt;

use super::{
    AsAny, BoundArg, BufferHandle, BuildRequest, CompiledProgram, CompletedWork, DeviceBackend,
    Launch, PendingWork, downcast_buffer, downcast_program,
};
use crate::device::{
    Backend, CAP_SHADER_F16, CAP_SHADER_F64, CAP_SUBGROUP, CAP_TIMESTAMP_QUERY, CAP_WGPU, Device,
    DeviceKind, DeviceLimits, DeviceSource,
};
use crate::reflect::AddressSpace;
use crate::{ComputeError, ComputeResult};

const BACKEND_NAME: &str = "wgpu";

/// Override for the estimated device memory, in MiB.
pub const GPU_MEMORY_ENV: &str = "HELLOCL_GPU_MEMORY_MB";

fn create_instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

/// Enumerate every wgpu adapter as a device.
pub(crate) fn enumerate() -> Vec<Device> {
    create_instance()
        .enumerate_adapters(wgpu::Backends::all())
        .into_iter()
        .map(|adapter| {
            let info = adapter.get_info();
            let features = adapter.features();
            let adapter_limits = adapter.limits();

            let mut caps = vec![CAP_WGPU.to_string()];
            for (feature, cap) in [
                (wgpu::Features::SHADER_F64, CAP_SHADER_F64),
                (wgpu::Features::SHADER_F16, CAP_SHADER_F16),
                (wgpu::Features::TIMESTAMP_QUERY, CAP_TIMESTAMP_QUERY),
                (wgpu::Features::SUBGROUP, CAP_SUBGROUP),
            ] {
                if features.contains(feature) {
                    caps.push(cap.to_string());
                }
            }

            let kind = match info.device_type {
                wgpu::DeviceType::DiscreteGpu => DeviceKind::DiscreteGpu,
                wgpu::DeviceType::IntegratedGpu => DeviceKind::IntegratedGpu,
                wgpu::DeviceType::VirtualGpu => DeviceKind::VirtualGpu,
                wgpu::DeviceType::Cpu => DeviceKind::Cpu,
                wgpu::DeviceType::Other => DeviceKind::Other,
            };

            let limits = DeviceLimits {
                max_buffer_bytes: adapter_limits
                    .max_buffer_size
                    .min(adapter_limits.max_storage_buffer_binding_size as u64),
                max_work_group_size: adapter_limits.max_compute_invocations_per_workgroup,
                preferred_work_group_multiple: 64,
                max_work_groups_per_dimension: adapter_limits.max_compute_workgroups_per_dimension,
                global_memory: estimate_memory(&info, &adapter_limits),
            };

            trace!(name = %info.name, backend = ?info.backend, ?kind, "wgpu adapter");
            Device::new(
                format!("{} ({:?})", info.name, info.backend),
                kind,
                Backend::Wgpu,
                caps,
                limits,
                DeviceSource::Wgpu(Arc::new(adapter)),
            )
        })
        .collect()
}

/// Device memory estimate.
///
/// wgpu doesn't expose total VRAM, so this is derived from buffer limits
/// unless `HELLOCL_GPU_MEMORY_MB` says otherwise.
fn estimate_memory(info: &wgpu::AdapterInfo, limits: &wgpu::Limits) -> u64 {
    if let Some(mb) = std::env::var(GPU_MEMORY_ENV).ok().and_then(|v| v.trim().parse::<u64>().ok()) {
        return mb * 1024 * 1024;
    }
    if is_software_renderer(info) {
        return sys_info::mem_info().map(|m| m.avail * 1024).unwrap_or(limits.max_buffer_size);
    }
    limits.max_buffer_size.max(2 * 1024 * 1024 * 1024)
}

/// Check if a wgpu adapter is a software renderer.
pub fn is_software_renderer(info: &wgpu::AdapterInfo) -> bool {
    let name = info.name.to_lowercase();

    name.contains("llvmpipe")
        || name.contains("softpipe")
        || name.contains("swiftshader")
        || name.contains("lavapipe")
        || name.contains("software")
        || name.contains("microsoft basic render")
        || info.device_type == wgpu::DeviceType::Cpu
}

// =============================================================================
// Buffers and programs
// =============================================================================

/// Round up to the 4-byte copy alignment.
fn padded(size: u64) -> u64 {
    size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT
}

pub struct WgpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

impl AsAny for WgpuBuffer {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl BufferHandle for WgpuBuffer {
    fn size_bytes(&self) -> u64 {
        self.size
    }
}

pub struct WgpuProgram {
    layout: wgpu::BindGroupLayout,
    pipelines: HashMap<String, wgpu::ComputePipeline>,
    /// Address space per binding, in binding order.
    spaces: Vec<AddressSpace>,
}

impl AsAny for WgpuProgram {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl CompiledProgram for WgpuProgram {
    fn entry_points(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }
}

/// Submission still running on the GPU.
struct WgpuPending {
    device: Arc<wgpu::Device>,
    index: wgpu::SubmissionIndex,
}

impl PendingWork for WgpuPending {
    fn wait(self: Box<Self>) -> ComputeResult<()> {
        self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(self.index));
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.device.poll(wgpu::Maintain::Poll).is_queue_empty()
    }
}

// =============================================================================
// Backend
// =============================================================================

/// An opened wgpu device and its queue.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    limits: DeviceLimits,
}

impl WgpuBackend {
    /// Check if any wgpu adapter is present.
    pub fn is_available() -> bool {
        !create_instance().enumerate_adapters(wgpu::Backends::all()).is_empty()
    }

    pub(crate) fn open(adapter: &wgpu::Adapter, limits: DeviceLimits) -> ComputeResult<Self> {
        let info = adapter.get_info();
        trace!(adapter = %info.name, "WgpuBackend::open");

        // Request every optional feature the adapter has
        let adapter_features = adapter.features();
        let mut required_features = wgpu::Features::empty();
        for feature in [
            wgpu::Features::SHADER_F64,
            wgpu::Features::SHADER_F16,
            wgpu::Features::TIMESTAMP_QUERY,
            wgpu::Features::SUBGROUP,
        ] {
            if adapter_features.contains(feature) {
                required_features |= feature;
            }
        }

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("hellocl compute device"),
                required_features,
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| ComputeError::ContextCreation(format!("{}: {e}", info.name)))?;

        debug!(adapter = %info.name, features = ?required_features, "Opened wgpu device");
        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            limits,
        })
    }

    /// Run `f` inside a validation error scope.
    fn scoped<T>(&self, filter: wgpu::ErrorFilter, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(filter);
        let value = f();
        let error = pollster::block_on(self.device.pop_error_scope());
        (value, error)
    }

    fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

impl DeviceBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn uses_declared_workgroup_size(&self) -> bool {
        true
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

        let (buffer, error) = self.scoped(wgpu::ErrorFilter::OutOfMemory, || {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("hellocl buffer"),
                size: padded(size_bytes),
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        if let Some(e) = error {
            return Err(ComputeError::Allocation(format!("{size_bytes} bytes: {e}")));
        }

        Ok(Box::new(WgpuBuffer {
            buffer,
            size: size_bytes,
        }))
    }

    fn write(&self, buffer: &dyn BufferHandle, bytes: &[u8]) -> ComputeResult<()> {
        let buffer = downcast_buffer::<WgpuBuffer>(buffer, BACKEND_NAME)?;
        if bytes.len() as u64 > buffer.size {
            return Err(ComputeError::Transfer(format!(
                "write of {} bytes into {} byte buffer",
                bytes.len(),
                buffer.size
            )));
        }

        let aligned = padded(bytes.len() as u64) as usize;
        let data: Cow<'_, [u8]> = if aligned == bytes.len() {
            Cow::Borrowed(bytes)
        } else {
            let mut v = bytes.to_vec();
            v.resize(aligned, 0);
            Cow::Owned(v)
        };

        self.queue.write_buffer(&buffer.buffer, 0, &data);
        self.queue.submit(std::iter::empty());
        self.wait_idle();
        Ok(())
    }

    fn read(&self, buffer: &dyn BufferHandle, out: &mut [u8]) -> ComputeResult<()> {
        let buffer = downcast_buffer::<WgpuBuffer>(buffer, BACKEND_NAME)?;
        if out.len() as u64 > buffer.size {
            return Err(ComputeError::Transfer(format!(
                "read of {} bytes from {} byte buffer",
                out.len(),
                buffer.size
            )));
        }
        let copy_size = padded(out.len() as u64);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("hellocl readback"),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback"),
        });
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging, 0, copy_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.wait_idle();
        receiver
            .recv()
            .map_err(|_| ComputeError::Transfer("map callback: channel recv failed".into()))?
            .map_err(|e| ComputeError::Transfer(format!("buffer mapping: {e}")))?;

        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(&mapped[..out.len()]);
        }
        staging.unmap();
        Ok(())
    }

    fn build(&self, request: &BuildRequest<'_>) -> ComputeResult<Box<dyn CompiledProgram>> {
        trace!(program = request.name, "WgpuBackend::build");

        let ((module, built), error) = self.scoped(wgpu::ErrorFilter::Validation, || {
            let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(request.name),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(request.source)),
            });

            let entries: Vec<wgpu::BindGroupLayoutEntry> = request
                .reflection
                .bindings
                .iter()
                .map(|b| wgpu::BindGroupLayoutEntry {
                    binding: b.binding,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: match b.space {
                            AddressSpace::Uniform => wgpu::BufferBindingType::Uniform,
                            AddressSpace::Storage => wgpu::BufferBindingType::Storage { read_only: true },
                            AddressSpace::StorageReadWrite => wgpu::BufferBindingType::Storage { read_only: false },
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            let layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(request.name),
                entries: &entries,
            });
            let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(request.name),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });

            let pipelines: HashMap<String, wgpu::ComputePipeline> = request
                .reflection
                .entry_points
                .iter()
                .map(|entry| {
                    let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                        label: Some(entry.name.as_str()),
                        layout: Some(&pipeline_layout),
                        module: &module,
                        entry_point: Some(entry.name.as_str()),
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                        cache: None,
                    });
                    (entry.name.clone(), pipeline)
                })
                .collect();

            (module, (layout, pipelines))
        });

        let mut log = String::new();
        let info = pollster::block_on(module.get_compilation_info());
        for message in &info.messages {
            let kind = match message.message_type {
                wgpu::CompilationMessageType::Error => "error",
                wgpu::CompilationMessageType::Warning => "warning",
                wgpu::CompilationMessageType::Info => "info",
            };
            match &message.location {
                Some(loc) => log.push_str(&format!(
                    "{}:{}:{}: {kind}: {}\n",
                    request.name, loc.line_number, loc.line_position, message.message
                )),
                None => log.push_str(&format!("{}: {kind}: {}\n", request.name, message.message)),
            }
        }

        if let Some(e) = error {
            log.push_str(&format!("{e}\n"));
            return Err(ComputeError::Build {
                program: request.name.to_string(),
                log,
            });
        }
        if !log.is_empty() {
            warn!(program = request.name, "Shader compiled with diagnostics:\n{log}");
        }

        let (layout, pipelines) = built;
        debug!(program = request.name, pipelines = pipelines.len(), "Built wgpu program");
        Ok(Box::new(WgpuProgram {
            layout,
            pipelines,
            spaces: request.reflection.bindings.iter().map(|b| b.space).collect(),
        }))
    }

    fn launch(&self, program: &dyn CompiledProgram, launch: &Launch<'_>) -> ComputeResult<Box<dyn PendingWork>> {
        let program = downcast_program::<WgpuProgram>(program, BACKEND_NAME)?;
        let pipeline = program
            .pipelines
            .get(launch.entry_point)
            .ok_or_else(|| ComputeError::EntryPointNotFound(launch.entry_point.to_string()))?;

        if launch.args.len() != program.spaces.len() {
            return Err(ComputeError::Dispatch(format!(
                "{}: {} arguments for {} bindings",
                launch.entry_point,
                launch.args.len(),
                program.spaces.len()
            )));
        }

        // Uniforms must outlive the bind group creation below.
        let uniforms: Vec<Option<wgpu::Buffer>> = launch
            .args
            .iter()
            .map(|arg| match arg {
                BoundArg::Scalar(value) => Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("hellocl scalar"),
                    contents: &value.to_uniform_bytes(),
                    usage: wgpu::BufferUsages::UNIFORM,
                })),
                BoundArg::Buffer(_) => None,
            })
            .collect();

        let mut entries = Vec::with_capacity(launch.args.len());
        for (i, (arg, uniform)) in launch.args.iter().zip(&uniforms).enumerate() {
            let resource = match (arg, uniform) {
                (BoundArg::Buffer(handle), _) => downcast_buffer::<WgpuBuffer>(*handle, BACKEND_NAME)?
                    .buffer
                    .as_entire_binding(),
                (BoundArg::Scalar(_), Some(buffer)) => buffer.as_entire_binding(),
                (BoundArg::Scalar(_), None) => {
                    return Err(ComputeError::Dispatch(format!("{}: scalar {i} not uploaded", launch.entry_point)));
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32,
                resource,
            });
        }

        let groups = launch.shape.group_counts();
        trace!(entry_point = launch.entry_point, ?groups, blocking = launch.blocking, "wgpu launch");

        let (index, error) = self.scoped(wgpu::ErrorFilter::Validation, || {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(launch.entry_point),
                layout: &program.layout,
                entries: &entries,
            });

            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(launch.entry_point),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(launch.entry_point),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
            }
            self.queue.submit(std::iter::once(encoder.finish()))
        });

        if let Some(e) = error {
            return Err(ComputeError::Dispatch(format!("{}: {e}", launch.entry_point)));
        }

        if launch.blocking {
            self.device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
            return Ok(Box::new(CompletedWork));
        }
        Ok(Box::new(WgpuPending {
            device: self.device.clone(),
            index,
        }))
    }
}
