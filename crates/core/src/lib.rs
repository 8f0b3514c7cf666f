//! Kite Core: typed buffers and kernel dispatch for accelerator backends
//!
//! Host code hands kite plain numeric collections and scalars; kite picks
//! native widths, stages the data in device memory, binds kernel arguments,
//! plans work sizes, runs the kernel and reads the results back.
//!
//! # Basic usage
//!
//! ```
//! use kite_core::prelude::*;
//! use kite_core::backend::host::HostBackend;
//!
//! let backend = HostBackend::new().with_kernel("inc", |launch| {
//!     let data: Vec<i32> = launch.buffer::<i32>(0)?.iter().map(|v| v + 1).collect();
//!     launch.store(0, &data)
//! });
//! let program = Program::new(&backend, "__kernel void inc(__global int *data) { }").unwrap();
//!
//! let mut data = TypedBuffer::from_slice(&[1, 2, 3]).unwrap().into_output();
//! let result = program.invoke("inc", kite_core::args![&mut data]).unwrap();
//! assert_eq!(result.len(), 1);
//! assert_eq!(data.values_as::<i32>().unwrap(), vec![2, 3, 4]);
//! ```

pub mod args;
pub mod backend;
pub mod binder;
pub mod buffer;
pub mod dispatch;
pub mod error;
pub mod planner;
pub mod program;
pub mod types;
pub mod value;

pub use args::{Arg, DispatchOptions, OptionValue, TypedValue};
pub use backend::{Backend, DeviceLimits, DeviceStatus};
pub use buffer::TypedBuffer;
pub use dispatch::{DispatchState, Invocation, Returned};
pub use error::{ExecutionError, KiteError, Result};
pub use planner::{Extent, WorkGeometry, WorkSizePlanner, WorkSizePolicy};
pub use program::{Program, ProgramConfig};
pub use types::{TypeDescriptor, TypeRegistry};
pub use value::Value;

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::args::{Arg, DispatchOptions, TypedValue};
    pub use crate::backend::Backend;
    pub use crate::buffer::TypedBuffer;
    pub use crate::dispatch::Returned;
    pub use crate::error::{KiteError, Result};
    pub use crate::planner::WorkSizePolicy;
    pub use crate::program::{Program, ProgramConfig};
    pub use crate::value::Value;
}
