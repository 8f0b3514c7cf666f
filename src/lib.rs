//! Kite: typed buffers and kernel-argument dispatch for OpenCL
//!
//! Kite compiles OpenCL C source once and lets host code call its kernels
//! by name with ordinary Rust collections and scalars. Buffers are written
//! to the device only when they changed, work sizes are derived from the
//! arguments, and output buffers are read back after the kernel finishes.
//!
//! Backend-independent machinery lives in [`kite_core`]; the OpenCL device
//! context lives in [`kite_backend_opencl`]. This crate ties them together
//! with aliases fixed to the process-wide OpenCL context.
//!
//! # Example
//!
//! ```ignore
//! use kite::prelude::*;
//!
//! let program = kite::compile(
//!     "__kernel void add(__global int *out, __global int *in, int x) {
//!          int i = get_global_id(0);
//!          out[i] = in[i] + x;
//!      }",
//! )?;
//! let mut out = Buffer::output(4)?;
//! program.invoke("add", kite::args![&mut out, vec![1, 2, 3, 4], 10])?;
//! assert_eq!(out.values_as::<i32>()?, vec![11, 12, 13, 14]);
//! ```

pub use kite_backend_opencl::{
    ensure_initialized, ensure_initialized_with, ContextConfig, DeviceType, OpenClContext,
};
pub use kite_core;
pub use kite_core::args;
pub use kite_core::backend::{status, DeviceLimits, DeviceStatus};
pub use kite_core::{
    DispatchOptions, DispatchState, ExecutionError, Extent, KiteError, OptionValue, ProgramConfig,
    Result, TypeDescriptor, TypeRegistry, TypedValue, Value, WorkGeometry, WorkSizePolicy,
};

/// Typed buffer on the OpenCL context
pub type Buffer = kite_core::TypedBuffer<OpenClContext>;

/// Program compiled on the process-wide OpenCL context
pub type Program = kite_core::Program<'static, OpenClContext>;

pub type Arg<'a> = kite_core::Arg<'a, OpenClContext>;

pub type Returned<'a> = kite_core::Returned<'a, OpenClContext>;

/// Compiles `source` on the process-wide context with default settings
pub fn compile(source: &str) -> Result<Program> {
    compile_with(source, ProgramConfig::default())
}

pub fn compile_with(source: &str, config: ProgramConfig) -> Result<Program> {
    let context = ensure_initialized()?;
    log::debug!("compiling program on {}", context.device_name());
    Program::with_config(context, source, config)
}

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::{compile, Arg, Buffer, Program, Returned};
    pub use kite_core::{DispatchOptions, KiteError, ProgramConfig, Result, Value, WorkSizePolicy};
}
