//! Per-backend summary of an enumerated platform.

use crate::device::{Backend, CAP_SHADER_F64, Device, Platform};

/// Backends a platform can enumerate, in enumeration order.
const ENUMERATED: [Backend; 2] = [Backend::Wgpu, Backend::Software];

/// What one backend contributes to a platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub backend: Backend,
    /// Support for the backend is part of this build.
    pub compiled: bool,
    /// Devices the platform enumerated for it.
    pub devices: usize,
    /// Of those, devices able to build double-precision programs.
    pub double_precision: usize,
}

impl BackendInfo {
    pub fn is_usable(&self) -> bool {
        self.devices > 0
    }
}

/// Summarize `platform` per backend, in enumeration order.
pub fn detect_backends(platform: &Platform) -> Vec<BackendInfo> {
    ENUMERATED
        .into_iter()
        .map(|backend| {
            let devices: Vec<&Device> = platform.devices().iter().filter(|d| d.backend() == backend).collect();
            BackendInfo {
                backend,
                compiled: backend != Backend::Wgpu || cfg!(feature = "wgpu"),
                devices: devices.len(),
                double_precision: devices.iter().filter(|d| d.has_capability(CAP_SHADER_F64)).count(),
            }
        })
        .collect()
}

/// Backend of the device an unfiltered selection would pick.
pub fn select_best_backend(platform: &Platform) -> Option<Backend> {
    platform.devices().first().map(Device::backend)
}

/// One line per backend: `[+]` when it has devices.
pub fn describe_backends(platform: &Platform) -> String {
    let mut desc = String::new();

    for info in detect_backends(platform) {
        let mark = if info.is_usable() { "+" } else { "-" };
        let detail = if !info.compiled {
            "not built (enable the `wgpu` feature)".to_string()
        } else {
            format!("{} device(s), {} with {CAP_SHADER_F64}", info.devices, info.double_precision)
        };
        desc.push_str(&format!("[{mark}] {}: {detail}\n", info.backend));
    }

    desc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_follow_enumeration() {
        let platform = Platform::software(3);
        let infos = detect_backends(&platform);
        assert_eq!(infos.len(), 2);

        let software = infos.iter().find(|i| i.backend == Backend::Software).unwrap();
        assert_eq!(software.devices, 3);
        assert_eq!(software.double_precision, 3);

        let wgpu = infos.iter().find(|i| i.backend == Backend::Wgpu).unwrap();
        assert_eq!(wgpu.devices, 0);
        assert!(!wgpu.is_usable());
    }

    #[test]
    fn test_best_backend() {
        assert_eq!(select_best_backend(&Platform::software(1)), Some(Backend::Software));
        assert_eq!(select_best_backend(&Platform::software(0)), None);
    }

    #[test]
    fn test_describe() {
        let desc = describe_backends(&Platform::software(2));
        assert!(desc.contains("[+] software: 2 device(s), 2 with shader-f64"));
        assert!(desc.contains("[-] wgpu"));
    }
}
