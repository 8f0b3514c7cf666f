//! Error types

use crate::backend::DeviceStatus;
use thiserror::Error;

/// Result alias used throughout kite
pub type Result<T> = std::result::Result<T, KiteError>;

/// Errors surfaced to callers of kite
///
/// Nothing is retried or silently defaulted: every failure below reaches the
/// caller.
#[derive(Debug, Error)]
pub enum KiteError {
    /// Kernel source failed to build; `log` is the backend's build log verbatim
    #[error("kernel source failed to build:\n{log}")]
    Compile { log: String },

    /// A kernel was invoked on a program that has no compiled module
    #[error("program has not been compiled")]
    NotCompiled,

    /// The type tag is not in the registry
    #[error("unknown type tag `{0}`")]
    UnknownType(String),

    /// No type could be inferred for a value or sequence
    #[error("cannot infer element type: {0}")]
    TypeInference(String),

    /// A value cannot be represented in the native slot of its type
    #[error("value {value} cannot be encoded as `{tag}`")]
    Encode { tag: &'static str, value: String },

    /// The compiled program has no kernel with this name
    #[error("no kernel named `{0}` in program")]
    KernelNotFound(String),

    /// The backend (or the binder) rejected an argument
    #[error("invalid kernel argument #{index} ({argument}): {reason}")]
    ArgumentBinding {
        index: usize,
        argument: String,
        reason: String,
    },

    /// The trailing options map is malformed
    #[error("invalid dispatch options: {0}")]
    InvalidOptions(String),

    /// The requested geometry is not executable on this device
    #[error("invalid work size: {0}")]
    InvalidWorkSize(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Device memory allocation or transfer failed
    #[error("device memory operation failed: {0}")]
    Memory(DeviceStatus),

    #[error("index {index} out of bounds for buffer of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Platform, device or context acquisition failed
    #[error("failed to initialize accelerator backend: {0}")]
    BackendInit(String),
}

/// Failures of an enqueued kernel
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The device refused the argument set (caller-correctable)
    #[error("kernel `{kernel}` rejected its arguments: {status}")]
    InvalidArguments { kernel: String, status: DeviceStatus },

    /// Any other device-side failure, with the raw backend status
    #[error("kernel `{kernel}` failed on device: {status}")]
    Device { kernel: String, status: DeviceStatus },
}

impl ExecutionError {
    /// Raw backend status code
    pub fn code(&self) -> i32 {
        match self {
            ExecutionError::InvalidArguments { status, .. } => status.code,
            ExecutionError::Device { status, .. } => status.code,
        }
    }
}
