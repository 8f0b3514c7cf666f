//! OpenCL backend for kite
//!
//! This crate implements [`kite_core::Backend`] with the `ocl` crate.
//!
//! # Usage
//!
//! ```ignore
//! use kite_backend_opencl::ensure_initialized;
//! use kite_core::prelude::*;
//!
//! let context = ensure_initialized()?;
//! let program = Program::new(
//!     context,
//!     "__kernel void inc(__global int *x) { x[get_global_id(0)]++; }",
//! )?;
//! let mut data = TypedBuffer::from_slice(&[1, 2, 3])?.into_output();
//! program.invoke("inc", kite_core::args![&mut data])?;
//! ```

mod backend;
mod compiler;
mod device;
mod kernel;

pub use device::{
    ensure_initialized, ensure_initialized_with, ContextConfig, DeviceType, OpenClContext,
    DEVICE_ENV, DEVICE_TYPE_ENV, PLATFORM_ENV,
};
pub use kernel::OpenClKernel;
