//! Device enumeration and selection.
//!
//! A [`Platform`] enumerates every device the enabled backends expose, in a
//! stable order: wgpu adapters first (when the `wgpu` feature is on), then
//! software devices. Selection never allocates device resources; that
//! happens when a [`ComputeContext`](crate::ComputeContext) opens the device.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::backend;
use crate::{ComputeError, ComputeResult};

/// Capability advertised by every software device.
pub const CAP_SOFTWARE: &str = "software";
/// Capability advertised by every wgpu device.
pub const CAP_WGPU: &str = "wgpu";
/// 64-bit floats in kernels (required for double precision builds).
pub const CAP_SHADER_F64: &str = "shader-f64";
/// 16-bit floats in kernels.
pub const CAP_SHADER_F16: &str = "shader-f16";
/// GPU timestamp queries.
pub const CAP_TIMESTAMP_QUERY: &str = "timestamp-query";
/// Subgroup operations.
pub const CAP_SUBGROUP: &str = "subgroup";

/// Environment override for the enumerated backend set.
pub const BACKEND_ENV: &str = "HELLOCL_BACKEND";

/// Compute backends a platform can enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Every available backend (wgpu > software).
    #[default]
    Auto,
    /// Host devices executing kernels with rayon.
    Software,
    /// wgpu adapters (Vulkan/Metal/DX12).
    Wgpu,
}

impl Backend {
    /// Check if this backend is available on current system.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Auto | Self::Software => true,
            #[cfg(feature = "wgpu")]
            Self::Wgpu => backend::WgpuBackend::is_available(),
            #[cfg(not(feature = "wgpu"))]
            Self::Wgpu => false,
        }
    }

    /// Get human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Software => "software",
            Self::Wgpu => "wgpu",
        }
    }

    /// Backend requested through `HELLOCL_BACKEND`, if set and valid.
    pub fn from_env() -> Option<Self> {
        std::env::var(BACKEND_ENV).ok()?.parse().ok()
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "software" | "cpu" => Ok(Self::Software),
            "wgpu" | "gpu" => Ok(Self::Wgpu),
            other => Err(format!("unknown backend '{other}' (expected auto, software or wgpu)")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical kind of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Software,
    DiscreteGpu,
    IntegratedGpu,
    VirtualGpu,
    Cpu,
    Other,
}

impl DeviceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Software => "software",
            Self::DiscreteGpu => "discrete gpu",
            Self::IntegratedGpu => "integrated gpu",
            Self::VirtualGpu => "virtual gpu",
            Self::Cpu => "cpu",
            Self::Other => "other",
        }
    }
}

/// Device resource limits.
#[derive(Debug, Clone)]
pub struct DeviceLimits {
    /// Largest single buffer in bytes.
    pub max_buffer_bytes: u64,
    /// Largest work group (product of local extents).
    pub max_work_group_size: u32,
    /// Preferred multiple for local work-group sizes.
    pub preferred_work_group_multiple: u32,
    /// Largest number of work groups per dimension.
    pub max_work_groups_per_dimension: u32,
    /// Device memory in bytes (detected or estimated).
    pub global_memory: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 256 * 1024 * 1024, // 256 MB
            max_work_group_size: 256,
            preferred_work_group_multiple: 64,
            max_work_groups_per_dimension: 65535,
            global_memory: 2 * 1024 * 1024 * 1024, // 2 GB
        }
    }
}

/// Backend-specific handle used to open a device.
#[derive(Clone)]
pub(crate) enum DeviceSource {
    Software,
    #[cfg(feature = "wgpu")]
    Wgpu(std::sync::Arc<wgpu::Adapter>),
}

/// A compute-capable device exposed by the platform.
#[derive(Clone)]
pub struct Device {
    index: usize,
    name: String,
    kind: DeviceKind,
    backend: Backend,
    capabilities: BTreeSet<String>,
    limits: DeviceLimits,
    pub(crate) source: DeviceSource,
}

impl Device {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: DeviceKind,
        backend: Backend,
        capabilities: impl IntoIterator<Item = String>,
        limits: DeviceLimits,
        source: DeviceSource,
    ) -> Self {
        Self {
            index: 0,
            name: name.into(),
            kind,
            backend,
            capabilities: capabilities.into_iter().collect(),
            limits,
            source,
        }
    }

    /// Position in platform enumeration order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Advertised capability strings, sorted.
    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(String::as_str)
    }

    /// Check for a capability (exact, case-sensitive match).
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("backend", &self.backend)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

// =============================================================================
// Platform
// =============================================================================

/// Platform enumeration settings.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Which backends to enumerate.
    pub backend: Backend,
    /// Number of software devices to expose.
    pub software_devices: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            backend: Backend::from_env().unwrap_or_default(),
            software_devices: 1,
        }
    }
}

/// The set of enumerated compute devices.
#[derive(Debug, Clone)]
pub struct Platform {
    devices: Vec<Device>,
}

impl Platform {
    /// Enumerate devices for the given configuration.
    pub fn new(config: &PlatformConfig) -> Self {
        trace!(backend = %config.backend, software_devices = config.software_devices, "Platform::new");

        let mut devices = Vec::new();

        #[cfg(feature = "wgpu")]
        {
            if matches!(config.backend, Backend::Auto | Backend::Wgpu) {
                devices.extend(backend::wgpu_backend::enumerate());
            }
        }

        if matches!(config.backend, Backend::Auto | Backend::Software) {
            devices.extend(backend::cpu_backend::enumerate(config.software_devices));
        }

        Self::from_devices(devices)
    }

    /// Platform exposing only `count` software devices.
    pub fn software(count: usize) -> Self {
        Self::new(&PlatformConfig {
            backend: Backend::Software,
            software_devices: count,
        })
    }

    fn from_devices(mut devices: Vec<Device>) -> Self {
        for (i, device) in devices.iter_mut().enumerate() {
            device.index = i;
        }
        debug!(count = devices.len(), "Enumerated compute devices");
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Select the first enumerated device advertising `required`.
///
/// With no requirement the first device wins.
pub fn select_device(platform: &Platform, required: Option<&str>) -> ComputeResult<Device> {
    select_devices(platform, required, 1).map(|mut devices| devices.remove(0))
}

/// Select up to `count` matching devices in enumeration order.
///
/// Fails with `NoDeviceFound` only when nothing matches; callers asking for
/// more devices than exist get fewer back.
pub fn select_devices(
    platform: &Platform,
    required: Option<&str>,
    count: usize,
) -> ComputeResult<Vec<Device>> {
    trace!(?required, count, "select_devices");

    let selected: Vec<Device> = platform
        .devices()
        .iter()
        .filter(|d| required.is_none_or(|cap| d.has_capability(cap)))
        .take(count.max(1))
        .cloned()
        .collect();

    if selected.is_empty() {
        return Err(ComputeError::NoDeviceFound {
            capability: required.map(str::to_string),
        });
    }

    debug!(
        devices = ?selected.iter().map(Device::name).collect::<Vec<_>>(),
        "Selected compute devices"
    );
    Ok(selected)
}

/// Human-readable listing of every enumerated device.
pub fn describe_devices(platform: &Platform) -> String {
    let mut desc = String::new();

    for device in platform.devices() {
        let caps: Vec<&str> = device.capabilities().collect();
        desc.push_str(&format!(
            "[{}] {} ({}, {}) max_buffer={} MB wg={}/{} caps: {}\n",
            device.index(),
            device.name(),
            device.kind().name(),
            device.backend(),
            device.limits().max_buffer_bytes / (1024 * 1024),
            device.limits().preferred_work_group_multiple,
            device.limits().max_work_group_size,
            caps.join(" "),
        ));
    }

    desc
}
