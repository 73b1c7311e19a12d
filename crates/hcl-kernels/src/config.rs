//! Runtime configuration.
//!
//! Every toggle the algorithm modules honour lives in [`Config`]. Values
//! come from defaults, then an optional YAML file, then CLI overrides
//! applied by the caller.
//!
//! ```yaml
//! precision: double
//! gpu_count: 2
//! software_devices: 2
//! software_mandelbrot: false
//! kernel_dir: ./kernels
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use hcl_compute::{Backend, BuildOptions, ContextConfig, PlatformConfig, Precision};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{KernelError, KernelResult};

/// Algorithm and device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Floating-point precision of Mandelbrot coordinates.
    pub precision: Precision,
    /// Run the sine stage in the reference sequence.
    pub enable_sine: bool,
    /// Print a sample of sine results.
    pub verbose_sine: bool,
    /// Number of queues the Mandelbrot renderer splits rows across.
    pub gpu_count: usize,
    /// Render Mandelbrot frames on the host instead of a device.
    pub software_mandelbrot: bool,
    /// Which backends to enumerate.
    pub backend: Backend,
    /// Number of software devices to expose.
    pub software_devices: usize,
    /// Only devices advertising this capability are selected.
    pub required_capability: Option<String>,
    /// Directory whose `<name>.wgsl` files replace the embedded sources.
    pub kernel_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            precision: Precision::Single,
            enable_sine: true,
            verbose_sine: false,
            gpu_count: 1,
            software_mandelbrot: false,
            backend: Backend::from_env().unwrap_or_default(),
            software_devices: 1,
            required_capability: None,
            kernel_dir: None,
        }
    }
}

impl Config {
    /// Load and validate a YAML config file.
    pub fn from_file(path: impl AsRef<Path>) -> KernelResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading config");
        let text = fs::read_to_string(path).map_err(|source| KernelError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(text: &str) -> KernelResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> KernelResult<()> {
        if self.gpu_count == 0 {
            return Err(KernelError::InvalidConfig("gpu_count must be at least 1".into()));
        }
        if self.software_devices == 0 && self.backend == Backend::Software {
            return Err(KernelError::InvalidConfig(
                "software backend needs at least one software device".into(),
            ));
        }
        Ok(())
    }

    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            backend: self.backend,
            software_devices: self.software_devices,
        }
    }

    /// Context settings; one queue per Mandelbrot band.
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            required_capability: self.required_capability.clone(),
            device_count: self.gpu_count,
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions::new(self.precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config.precision, Precision::Single);
        assert!(config.enable_sine);
        assert!(!config.verbose_sine);
        assert_eq!(config.gpu_count, 1);
        assert_eq!(config.software_devices, 1);
    }

    #[test]
    fn test_parse_fields() {
        let yaml = r#"
precision: double
gpu_count: 2
software_devices: 3
software_mandelbrot: true
backend: software
required_capability: shader-f64
kernel_dir: /tmp/kernels
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.precision, Precision::Double);
        assert_eq!(config.gpu_count, 2);
        assert_eq!(config.software_devices, 3);
        assert!(config.software_mandelbrot);
        assert_eq!(config.backend, Backend::Software);
        assert_eq!(config.required_capability.as_deref(), Some("shader-f64"));
        assert_eq!(config.kernel_dir, Some(PathBuf::from("/tmp/kernels")));
        assert_eq!(config.context_config().device_count, 2);
        assert_eq!(config.platform_config().software_devices, 3);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(Config::from_yaml_str("gpu_cnt: 2"), Err(KernelError::Yaml(_))));
    }

    #[test]
    fn test_zero_gpu_count_rejected() {
        assert!(matches!(
            Config::from_yaml_str("gpu_count: 0"),
            Err(KernelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file("/nonexistent/hellocl.yaml"),
            Err(KernelError::ConfigRead { .. })
        ));
    }
}
