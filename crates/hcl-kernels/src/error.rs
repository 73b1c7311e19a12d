//! Error types for the algorithm modules.

use std::path::PathBuf;

use hcl_compute::{ComputeError, Status, StatusCode};
use thiserror::Error;

/// Result type for algorithm modules.
pub type KernelResult<T> = Result<T, KernelError>;

/// Errors raised by algorithm modules and their configuration.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Failure inside the compute layer.
    #[error(transparent)]
    Compute(#[from] ComputeError),

    /// Config file could not be read.
    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration value out of range or unknown.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Host data that the kernel cannot accept.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Call made before the module was ready for it.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl KernelError {
    /// Status code reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Compute(e) => e.status(),
            Self::ConfigRead { .. } | Self::Yaml(_) | Self::InvalidConfig(_) | Self::InvalidInput(_) => {
                StatusCode::INVALID_VALUE
            }
            Self::InvalidState(_) => StatusCode::INVALID_OPERATION,
        }
    }
}

impl Status for KernelError {
    fn status(&self) -> StatusCode {
        KernelError::status(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_status_passes_through() {
        let err: KernelError = ComputeError::EntryPointNotFound("sine".into()).into();
        assert_eq!(err.status(), StatusCode::INVALID_KERNEL_NAME);
        assert_eq!(err.to_string(), "entry point not found: sine");
    }

    #[test]
    fn test_config_errors_are_invalid_value() {
        let err = KernelError::InvalidConfig("gpu_count must be at least 1".into());
        assert_eq!(err.status(), StatusCode::INVALID_VALUE);
    }
}
