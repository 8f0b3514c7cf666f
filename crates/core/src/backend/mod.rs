//! Backend module
//!
//! ## Architecture
//!
//! - [`Backend`]: the native compute API kite drives (implemented for OpenCL
//!   by the `kite-backend-opencl` crate)
//! - [`host::HostBackend`]: in-process implementation on host memory

pub mod host;
mod signature;
pub mod traits;

pub use traits::{status, Backend, DeviceLimits, DeviceStatus};
