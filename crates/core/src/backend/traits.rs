//! Native compute backend contract
//!
//! Everything kite needs from an OpenCL-style API, expressed as one trait.
//! Handles are plain associated types released by `Drop`, so a handle that
//! goes out of scope on an error path is released like any other.

use crate::planner::WorkGeometry;
use std::fmt;

/// OpenCL status codes kite reacts to or reports by name
pub mod status {
    pub const SUCCESS: i32 = 0;
    pub const DEVICE_NOT_FOUND: i32 = -1;
    pub const MEM_OBJECT_ALLOCATION_FAILURE: i32 = -4;
    pub const OUT_OF_RESOURCES: i32 = -5;
    pub const BUILD_PROGRAM_FAILURE: i32 = -11;
    pub const INVALID_VALUE: i32 = -30;
    pub const INVALID_DEVICE: i32 = -33;
    pub const INVALID_MEM_OBJECT: i32 = -38;
    pub const INVALID_PROGRAM_EXECUTABLE: i32 = -45;
    pub const INVALID_KERNEL_NAME: i32 = -46;
    pub const INVALID_KERNEL: i32 = -48;
    pub const INVALID_ARG_INDEX: i32 = -49;
    pub const INVALID_ARG_VALUE: i32 = -50;
    pub const INVALID_ARG_SIZE: i32 = -51;
    pub const INVALID_KERNEL_ARGS: i32 = -52;
    pub const INVALID_WORK_DIMENSION: i32 = -53;
    pub const INVALID_WORK_GROUP_SIZE: i32 = -54;
    pub const INVALID_WORK_ITEM_SIZE: i32 = -55;
    pub const INVALID_BUFFER_SIZE: i32 = -61;
    pub const INVALID_GLOBAL_WORK_SIZE: i32 = -63;
    /// Failure that carried no API status
    pub const UNKNOWN: i32 = -9999;

    /// Symbolic name of a status code, if kite knows it
    pub fn name(code: i32) -> Option<&'static str> {
        Some(match code {
            SUCCESS => "CL_SUCCESS",
            DEVICE_NOT_FOUND => "CL_DEVICE_NOT_FOUND",
            MEM_OBJECT_ALLOCATION_FAILURE => "CL_MEM_OBJECT_ALLOCATION_FAILURE",
            OUT_OF_RESOURCES => "CL_OUT_OF_RESOURCES",
            BUILD_PROGRAM_FAILURE => "CL_BUILD_PROGRAM_FAILURE",
            INVALID_VALUE => "CL_INVALID_VALUE",
            INVALID_DEVICE => "CL_INVALID_DEVICE",
            INVALID_MEM_OBJECT => "CL_INVALID_MEM_OBJECT",
            INVALID_PROGRAM_EXECUTABLE => "CL_INVALID_PROGRAM_EXECUTABLE",
            INVALID_KERNEL_NAME => "CL_INVALID_KERNEL_NAME",
            INVALID_KERNEL => "CL_INVALID_KERNEL",
            INVALID_ARG_INDEX => "CL_INVALID_ARG_INDEX",
            INVALID_ARG_VALUE => "CL_INVALID_ARG_VALUE",
            INVALID_ARG_SIZE => "CL_INVALID_ARG_SIZE",
            INVALID_KERNEL_ARGS => "CL_INVALID_KERNEL_ARGS",
            INVALID_WORK_DIMENSION => "CL_INVALID_WORK_DIMENSION",
            INVALID_WORK_GROUP_SIZE => "CL_INVALID_WORK_GROUP_SIZE",
            INVALID_WORK_ITEM_SIZE => "CL_INVALID_WORK_ITEM_SIZE",
            INVALID_BUFFER_SIZE => "CL_INVALID_BUFFER_SIZE",
            INVALID_GLOBAL_WORK_SIZE => "CL_INVALID_GLOBAL_WORK_SIZE",
            _ => return None,
        })
    }
}

/// Failure reported by a backend call: raw status code plus backend text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub code: i32,
    pub message: String,
}

impl DeviceStatus {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Status without an API code (e.g. a wrapper-level failure)
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(status::UNKNOWN, message)
    }

    pub fn is(&self, code: i32) -> bool {
        self.code == code
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match status::name(self.code) {
            Some(name) => write!(f, "{} ({})", self.message, name),
            None => write!(f, "{} (status {})", self.message, self.code),
        }
    }
}

impl std::error::Error for DeviceStatus {}

/// Execution limits reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum number of work items in one work group
    pub max_work_group_size: usize,
    /// Maximum work items per dimension of one work group
    pub max_work_item_sizes: [usize; 3],
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_work_group_size: 256,
            max_work_item_sizes: [256, 256, 64],
        }
    }
}

/// Native compute API
///
/// All calls are blocking. Implementations are not required to be
/// thread-safe; kite drives one invocation at a time.
pub trait Backend {
    /// Device memory region
    type Memory;
    /// Compiled program module
    type Module;
    /// Kernel handle with its bound arguments
    type Kernel;
    /// Command queue
    type Queue;

    /// Human-readable device description
    fn describe(&self) -> String;

    fn limits(&self) -> &DeviceLimits;

    /// Compiles source text; on failure `message` is the build log verbatim
    fn build_module(&self, source: &str, options: &str) -> Result<Self::Module, DeviceStatus>;

    /// Names of the kernels defined in a module
    fn kernel_names(&self, module: &Self::Module) -> Result<Vec<String>, DeviceStatus>;

    /// Allocates `byte_len` bytes of read-write device memory
    fn allocate(&self, byte_len: usize) -> Result<Self::Memory, DeviceStatus>;

    /// Blocking host → device copy of the whole region
    fn write(
        &self,
        queue: &Self::Queue,
        memory: &mut Self::Memory,
        data: &[u8],
    ) -> Result<(), DeviceStatus>;

    /// Blocking device → host copy of the whole region
    fn read(
        &self,
        queue: &Self::Queue,
        memory: &Self::Memory,
        out: &mut [u8],
    ) -> Result<(), DeviceStatus>;

    fn create_kernel(&self, module: &Self::Module, name: &str)
        -> Result<Self::Kernel, DeviceStatus>;

    /// Number of parameters the kernel declares
    fn parameter_count(&self, kernel: &Self::Kernel) -> Result<usize, DeviceStatus>;

    fn set_arg_memory(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        memory: &Self::Memory,
    ) -> Result<(), DeviceStatus>;

    /// Binds a by-value parameter; `bytes.len()` is the slot width
    fn set_arg_scalar(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        bytes: &[u8],
    ) -> Result<(), DeviceStatus>;

    /// Work-group size the device prefers for this kernel
    fn preferred_work_group_size(&self, kernel: &Self::Kernel) -> Result<usize, DeviceStatus>;

    fn create_queue(&self) -> Result<Self::Queue, DeviceStatus>;

    fn enqueue(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        geometry: &WorkGeometry,
    ) -> Result<(), DeviceStatus>;

    /// Blocks until every command on the queue has completed
    fn finish(&self, queue: &Self::Queue) -> Result<(), DeviceStatus>;
}
