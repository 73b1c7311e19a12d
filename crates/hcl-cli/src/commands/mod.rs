//! CLI command implementations

pub mod devices;
pub mod mandelbrot;
pub mod modulo;
pub mod rot13;
pub mod run;
pub mod sine;

use anyhow::{Context, Result};
use hcl_compute::{
    ComputeContext, ComputeError, ComputeResult, ComputeRuntime, Platform, StageFailure, StatusCode,
};
use hcl_kernels::{Config, KernelError};

/// Enumerate devices and open the configured context in `runtime`.
pub fn open_context<'rt>(runtime: &'rt mut ComputeRuntime, config: &Config) -> ComputeResult<&'rt ComputeContext> {
    let platform = Platform::new(&config.platform_config());
    runtime.initialize(&platform, &config.context_config())
}

/// Like [`open_context`], for commands that abort on failure.
pub fn require_context<'rt>(runtime: &'rt mut ComputeRuntime, config: &Config) -> Result<&'rt ComputeContext> {
    open_context(runtime, config).context("Failed to initialize compute context")
}

/// Status code carried by an error chain, if any link has one.
pub fn status_of(err: &anyhow::Error) -> StatusCode {
    err.chain()
        .find_map(|cause| {
            cause
                .downcast_ref::<KernelError>()
                .map(KernelError::status)
                .or_else(|| cause.downcast_ref::<ComputeError>().map(ComputeError::status))
        })
        .unwrap_or(StatusCode::INVALID_VALUE)
}

/// Print a failed stage, including its build log.
pub fn print_failure(failure: &StageFailure) {
    eprintln!("[{}] {}: {}", failure.stage, failure.status, failure.message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcl_compute::Backend;

    fn software_config() -> Config {
        Config {
            backend: Backend::Software,
            ..Default::default()
        }
    }

    #[test]
    fn test_open_context_once() {
        let mut runtime = ComputeRuntime::new();
        let config = software_config();
        open_context(&mut runtime, &config).unwrap();
        assert!(matches!(open_context(&mut runtime, &config), Err(ComputeError::AlreadyInitialized)));
        assert!(runtime.teardown().unwrap());
        assert!(require_context(&mut runtime, &config).is_ok());
    }

    #[test]
    fn test_commands_release_runtime() {
        let mut runtime = ComputeRuntime::new();
        let args = crate::Rot13Args { text: "Hello".into() };
        assert_eq!(rot13::run(&mut runtime, args, &software_config()).unwrap(), StatusCode::SUCCESS);
        assert!(!runtime.is_initialized());

        let args = crate::RunArgs {
            no_sine: true,
            verbose_sine: false,
            software_mandelbrot: false,
            frames: 1,
        };
        assert_eq!(run::run(&mut runtime, args, software_config()).unwrap(), StatusCode::SUCCESS);
        assert!(!runtime.is_initialized());
    }

    #[test]
    fn test_status_of_chain() {
        let err = anyhow::Error::new(ComputeError::AlreadyInitialized).context("outer");
        assert_eq!(status_of(&err), ComputeError::AlreadyInitialized.status());
        assert_eq!(status_of(&anyhow::anyhow!("plain")), StatusCode::INVALID_VALUE);
    }
}
