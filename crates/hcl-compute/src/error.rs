//! Compute errors, status codes and additive status aggregation.
//!
//! Every [`ComputeError`] maps onto a [`StatusCode`] using the classic
//! compute-runtime numbering (zero is success, failures are negative).
//! Callers that chain several stages can fold results into a
//! [`StatusSum`], which keeps the additive "anything non-zero" signal while
//! still remembering which stage failed and why.

use std::fmt;
use std::ops::{Add, AddAssign};
use std::path::PathBuf;

use thiserror::Error;

/// Result type for compute operations.
pub type ComputeResult<T> = Result<T, ComputeError>;

/// Compute operation errors.
#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("no compute device found{}", .capability.as_deref().map(|c| format!(" with capability '{c}'")).unwrap_or_default())]
    NoDeviceFound { capability: Option<String> },

    #[error("failed to create compute context: {0}")]
    ContextCreation(String),

    #[error("compute context already initialized")]
    AlreadyInitialized,

    #[error("compute context not initialized")]
    NotInitialized,

    #[error("kernel source '{name}' is {size} bytes, exceeds limit of {limit} bytes")]
    SourceTooLarge { name: String, size: u64, limit: u64 },

    #[error("failed to read kernel source {}: {source}", .path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build program '{program}':\n{log}")]
    Build { program: String, log: String },

    #[error("entry point not found: {0}")]
    EntryPointNotFound(String),

    #[error("buffer allocation failed: {0}")]
    Allocation(String),

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("kernel '{kernel}' has {arity} arguments, index {index} is out of range")]
    InvalidArgumentIndex { kernel: String, index: u32, arity: u32 },

    #[error("kernel '{kernel}': argument {index} bound before argument {next}")]
    ArgumentOutOfOrder { kernel: String, index: u32, next: u32 },

    #[error("kernel '{kernel}': argument {index} is not bound")]
    UnboundArgument { kernel: String, index: u32 },

    #[error("kernel '{kernel}': argument {index}: {reason}")]
    ArgumentMismatch { kernel: String, index: u32, reason: String },

    #[error("invalid work-group size: {0}")]
    InvalidWorkShape(String),

    #[error("invalid global work size: {0}")]
    InvalidGlobalWorkSize(String),

    #[error("buffer transfer failed: {0}")]
    Transfer(String),

    #[error("kernel dispatch failed: {0}")]
    Dispatch(String),
}

impl ComputeError {
    /// Status code reported for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoDeviceFound { .. } => StatusCode::DEVICE_NOT_FOUND,
            Self::ContextCreation(_) => StatusCode::DEVICE_NOT_AVAILABLE,
            Self::AlreadyInitialized => StatusCode::INVALID_OPERATION,
            Self::NotInitialized => StatusCode::INVALID_CONTEXT,
            Self::SourceTooLarge { .. } => StatusCode::INVALID_VALUE,
            Self::SourceRead { .. } => StatusCode::INVALID_PROGRAM,
            Self::Build { .. } => StatusCode::BUILD_PROGRAM_FAILURE,
            Self::EntryPointNotFound(_) => StatusCode::INVALID_KERNEL_NAME,
            Self::Allocation(_) => StatusCode::MEM_OBJECT_ALLOCATION_FAILURE,
            Self::BufferSizeMismatch { .. } => StatusCode::INVALID_BUFFER_SIZE,
            Self::InvalidArgumentIndex { .. } | Self::ArgumentOutOfOrder { .. } => {
                StatusCode::INVALID_ARG_INDEX
            }
            Self::UnboundArgument { .. } => StatusCode::INVALID_KERNEL_ARGS,
            Self::ArgumentMismatch { .. } => StatusCode::INVALID_ARG_VALUE,
            Self::InvalidWorkShape(_) => StatusCode::INVALID_WORK_GROUP_SIZE,
            Self::InvalidGlobalWorkSize(_) => StatusCode::INVALID_GLOBAL_WORK_SIZE,
            Self::Transfer(_) => StatusCode::INVALID_MEM_OBJECT,
            Self::Dispatch(_) => StatusCode::OUT_OF_RESOURCES,
        }
    }

    /// Full compiler diagnostic log, for build failures.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Self::Build { log, .. } => Some(log),
            _ => None,
        }
    }
}

/// Anything that can be reduced to a status code.
pub trait Status {
    fn status(&self) -> StatusCode;
}

impl Status for ComputeError {
    fn status(&self) -> StatusCode {
        ComputeError::status(self)
    }
}

// =============================================================================
// Status codes
// =============================================================================

/// Integer outcome of a device operation. Zero means success.
///
/// Codes compose additively: `a + b` is non-zero when either failed, but the
/// sum no longer identifies the failing stage. Use [`StatusSum`] to keep both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SUCCESS: Self = Self(0);
    pub const DEVICE_NOT_FOUND: Self = Self(-1);
    pub const DEVICE_NOT_AVAILABLE: Self = Self(-2);
    pub const COMPILER_NOT_AVAILABLE: Self = Self(-3);
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Self = Self(-4);
    pub const OUT_OF_RESOURCES: Self = Self(-5);
    pub const OUT_OF_HOST_MEMORY: Self = Self(-6);
    pub const PROFILING_INFO_NOT_AVAILABLE: Self = Self(-7);
    pub const MEM_COPY_OVERLAP: Self = Self(-8);
    pub const IMAGE_FORMAT_MISMATCH: Self = Self(-9);
    pub const IMAGE_FORMAT_NOT_SUPPORTED: Self = Self(-10);
    pub const BUILD_PROGRAM_FAILURE: Self = Self(-11);
    pub const MAP_FAILURE: Self = Self(-12);
    pub const INVALID_VALUE: Self = Self(-30);
    pub const INVALID_DEVICE_TYPE: Self = Self(-31);
    pub const INVALID_PLATFORM: Self = Self(-32);
    pub const INVALID_DEVICE: Self = Self(-33);
    pub const INVALID_CONTEXT: Self = Self(-34);
    pub const INVALID_QUEUE_PROPERTIES: Self = Self(-35);
    pub const INVALID_COMMAND_QUEUE: Self = Self(-36);
    pub const INVALID_HOST_PTR: Self = Self(-37);
    pub const INVALID_MEM_OBJECT: Self = Self(-38);
    pub const INVALID_BINARY: Self = Self(-42);
    pub const INVALID_BUILD_OPTIONS: Self = Self(-43);
    pub const INVALID_PROGRAM: Self = Self(-44);
    pub const INVALID_PROGRAM_EXECUTABLE: Self = Self(-45);
    pub const INVALID_KERNEL_NAME: Self = Self(-46);
    pub const INVALID_KERNEL_DEFINITION: Self = Self(-47);
    pub const INVALID_KERNEL: Self = Self(-48);
    pub const INVALID_ARG_INDEX: Self = Self(-49);
    pub const INVALID_ARG_VALUE: Self = Self(-50);
    pub const INVALID_ARG_SIZE: Self = Self(-51);
    pub const INVALID_KERNEL_ARGS: Self = Self(-52);
    pub const INVALID_WORK_DIMENSION: Self = Self(-53);
    pub const INVALID_WORK_GROUP_SIZE: Self = Self(-54);
    pub const INVALID_WORK_ITEM_SIZE: Self = Self(-55);
    pub const INVALID_GLOBAL_OFFSET: Self = Self(-56);
    pub const INVALID_EVENT_WAIT_LIST: Self = Self(-57);
    pub const INVALID_EVENT: Self = Self(-58);
    pub const INVALID_OPERATION: Self = Self(-59);
    pub const INVALID_BUFFER_SIZE: Self = Self(-61);
    pub const INVALID_GLOBAL_WORK_SIZE: Self = Self(-63);

    /// Raw integer value.
    pub fn code(self) -> i32 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Human-readable message for this code.
    ///
    /// Sums of several codes usually land on an unrelated entry or on
    /// "Unknown error"; look up individual stage codes instead.
    pub fn message(self) -> &'static str {
        match self.0 {
            0 => "Success",
            -1 => "Device not found",
            -2 => "Device not available",
            -3 => "Compiler not available",
            -4 => "Memory object allocation failure",
            -5 => "Out of resources",
            -6 => "Out of host memory",
            -7 => "Profiling information not available",
            -8 => "Memory copy overlap",
            -9 => "Image format mismatch",
            -10 => "Image format not supported",
            -11 => "Program build failure",
            -12 => "Map failure",
            -30 => "Invalid value",
            -31 => "Invalid device type",
            -32 => "Invalid platform",
            -33 => "Invalid device",
            -34 => "Invalid context",
            -35 => "Invalid queue properties",
            -36 => "Invalid command queue",
            -37 => "Invalid host pointer",
            -38 => "Invalid memory object",
            -39 => "Invalid image format descriptor",
            -40 => "Invalid image size",
            -41 => "Invalid sampler",
            -42 => "Invalid binary",
            -43 => "Invalid build options",
            -44 => "Invalid program",
            -45 => "Invalid program executable",
            -46 => "Invalid kernel name",
            -47 => "Invalid kernel definition",
            -48 => "Invalid kernel",
            -49 => "Invalid argument index",
            -50 => "Invalid argument value",
            -51 => "Invalid argument size",
            -52 => "Invalid kernel arguments",
            -53 => "Invalid work dimension",
            -54 => "Invalid work group size",
            -55 => "Invalid work item size",
            -56 => "Invalid global offset",
            -57 => "Invalid event wait list",
            -58 => "Invalid event",
            -59 => "Invalid operation",
            -60 => "Invalid GL object",
            -61 => "Invalid buffer size",
            -62 => "Invalid mip level",
            -63 => "Invalid global work size",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message(), self.0)
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl From<StatusCode> for i32 {
    fn from(code: StatusCode) -> Self {
        code.0
    }
}

impl Add for StatusCode {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for StatusCode {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<T, E: Status> From<&Result<T, E>> for StatusCode {
    fn from(result: &Result<T, E>) -> Self {
        match result {
            Ok(_) => StatusCode::SUCCESS,
            Err(e) => e.status(),
        }
    }
}

// =============================================================================
// Additive aggregation
// =============================================================================

/// A failed stage recorded by [`StatusSum`].
#[derive(Debug, Clone)]
pub struct StageFailure {
    /// Stage label supplied by the caller.
    pub stage: String,
    /// Individual status of that stage.
    pub status: StatusCode,
    /// Rendered error, including the full build log for build failures.
    pub message: String,
}

/// Additive status accumulator for callers chaining several stages.
///
/// `total()` is the plain sum of every recorded status; `message()` reports
/// the last non-zero individual code, which the sum alone cannot recover.
#[derive(Debug, Clone, Default)]
pub struct StatusSum {
    total: StatusCode,
    failures: Vec<StageFailure>,
}

impl StatusSum {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stage result and return its individual status.
    pub fn record<T, E>(&mut self, stage: &str, result: &Result<T, E>) -> StatusCode
    where
        E: Status + fmt::Display,
    {
        match result {
            Ok(_) => StatusCode::SUCCESS,
            Err(e) => self.record_error(stage, e),
        }
    }

    /// Record a stage failure.
    pub fn record_error<E>(&mut self, stage: &str, error: &E) -> StatusCode
    where
        E: Status + fmt::Display,
    {
        let status = error.status();
        self.total += status;
        self.failures.push(StageFailure {
            stage: stage.to_string(),
            status,
            message: error.to_string(),
        });
        status
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: StatusSum) {
        self.total += other.total;
        self.failures.extend(other.failures);
    }

    /// Additive sum of every recorded status.
    pub fn total(&self) -> StatusCode {
        self.total
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Last non-zero individual status.
    pub fn last_failure(&self) -> Option<&StageFailure> {
        self.failures.last()
    }

    /// Message for the last non-zero individual status, or "Success".
    pub fn message(&self) -> &'static str {
        self.last_failure()
            .map(|f| f.status.message())
            .unwrap_or(StatusCode::SUCCESS.message())
    }

    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }
}
