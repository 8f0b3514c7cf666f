//! OpenCL kernel handles

use super::device::{device_status, OpenClContext};
use kite_core::backend::{status, DeviceStatus};
use kite_core::planner::WorkGeometry;
use ocl::core::{
    self, ArgVal, KernelInfo, KernelInfoResult, KernelWorkGroupInfo, KernelWorkGroupInfoResult,
};
use ocl::{Buffer, Queue};
use std::ffi::c_void;
use std::fmt;

/// A kernel created from a compiled program
///
/// Arguments set on the handle stay bound until it is dropped.
pub struct OpenClKernel {
    kernel: core::Kernel,
    name: String,
}

impl OpenClKernel {
    pub(crate) fn new(program: &core::Program, name: &str) -> Result<Self, DeviceStatus> {
        let kernel = core::create_kernel(program, name).map_err(|e| device_status(e.into()))?;
        Ok(Self {
            kernel,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn num_args(&self) -> Result<usize, DeviceStatus> {
        match core::get_kernel_info(&self.kernel, KernelInfo::NumArgs) {
            Ok(KernelInfoResult::NumArgs(n)) => Ok(n as usize),
            Ok(other) => Err(DeviceStatus::unknown(format!(
                "unexpected kernel info: {other:?}"
            ))),
            Err(e) => Err(device_status(e.into())),
        }
    }

    pub(crate) fn set_memory(
        &mut self,
        index: u32,
        memory: &Buffer<u8>,
    ) -> Result<(), DeviceStatus> {
        core::set_kernel_arg(&self.kernel, index, ArgVal::mem(memory.as_core()))
            .map_err(|e| device_status(e.into()))
    }

    pub(crate) fn set_bytes(&mut self, index: u32, bytes: &[u8]) -> Result<(), DeviceStatus> {
        if bytes.is_empty() {
            return Err(DeviceStatus::new(
                status::INVALID_ARG_SIZE,
                format!("empty value for argument {index} of {}", self.name),
            ));
        }
        // Safety: the driver copies `bytes.len()` bytes before returning
        let value =
            unsafe { ArgVal::from_raw(bytes.len(), bytes.as_ptr() as *const c_void, false) };
        core::set_kernel_arg(&self.kernel, index, value).map_err(|e| device_status(e.into()))
    }

    pub(crate) fn work_group_size(&self, context: &OpenClContext) -> Result<usize, DeviceStatus> {
        match core::get_kernel_work_group_info(
            &self.kernel,
            *context.device.as_core(),
            KernelWorkGroupInfo::WorkGroupSize,
        ) {
            Ok(KernelWorkGroupInfoResult::WorkGroupSize(n)) => Ok(n),
            Ok(other) => Err(DeviceStatus::unknown(format!(
                "unexpected work-group info: {other:?}"
            ))),
            Err(e) => Err(device_status(e.into())),
        }
    }

    pub(crate) fn enqueue(
        &self,
        queue: &Queue,
        geometry: &WorkGeometry,
    ) -> Result<(), DeviceStatus> {
        // Safety: every argument was bound through the checked setters above
        unsafe {
            core::enqueue_kernel(
                queue.as_core(),
                &self.kernel,
                geometry.dimensions,
                None,
                &geometry.global,
                geometry.local,
                None::<core::Event>,
                None::<&mut core::Event>,
            )
        }
        .map_err(|e| device_status(e.into()))
    }
}

impl fmt::Debug for OpenClKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClKernel").field("name", &self.name).finish()
    }
}
