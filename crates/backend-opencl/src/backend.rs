//! [`Backend`] implementation over the OpenCL context

use super::device::{device_status, OpenClContext};
use super::kernel::OpenClKernel;
use kite_core::backend::{Backend, DeviceLimits, DeviceStatus};
use kite_core::planner::WorkGeometry;
use log::trace;
use ocl::{flags, Buffer, Queue};

impl Backend for OpenClContext {
    type Memory = Buffer<u8>;
    type Module = ocl::core::Program;
    type Kernel = OpenClKernel;
    type Queue = Queue;

    fn describe(&self) -> String {
        format!("OpenCL device {}", self.device_name())
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn build_module(&self, source: &str, options: &str) -> Result<Self::Module, DeviceStatus> {
        self.compile_program(source, options)
    }

    fn kernel_names(&self, module: &Self::Module) -> Result<Vec<String>, DeviceStatus> {
        self.program_kernel_names(module)
    }

    fn allocate(&self, byte_len: usize) -> Result<Self::Memory, DeviceStatus> {
        trace!("allocating {byte_len} bytes");
        Buffer::<u8>::builder()
            .context(&self.context)
            .flags(flags::MEM_READ_WRITE)
            .len(byte_len)
            .build()
            .map_err(device_status)
    }

    fn write(
        &self,
        queue: &Self::Queue,
        memory: &mut Self::Memory,
        data: &[u8],
    ) -> Result<(), DeviceStatus> {
        memory
            .write(data)
            .queue(queue)
            .enq()
            .map_err(device_status)
    }

    fn read(
        &self,
        queue: &Self::Queue,
        memory: &Self::Memory,
        out: &mut [u8],
    ) -> Result<(), DeviceStatus> {
        memory
            .read(out)
            .queue(queue)
            .enq()
            .map_err(device_status)
    }

    fn create_kernel(
        &self,
        module: &Self::Module,
        name: &str,
    ) -> Result<Self::Kernel, DeviceStatus> {
        OpenClKernel::new(module, name)
    }

    fn parameter_count(&self, kernel: &Self::Kernel) -> Result<usize, DeviceStatus> {
        kernel.num_args()
    }

    fn set_arg_memory(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        memory: &Self::Memory,
    ) -> Result<(), DeviceStatus> {
        kernel.set_memory(index, memory)
    }

    fn set_arg_scalar(
        &self,
        kernel: &mut Self::Kernel,
        index: u32,
        bytes: &[u8],
    ) -> Result<(), DeviceStatus> {
        kernel.set_bytes(index, bytes)
    }

    fn preferred_work_group_size(&self, kernel: &Self::Kernel) -> Result<usize, DeviceStatus> {
        kernel.work_group_size(self)
    }

    fn create_queue(&self) -> Result<Self::Queue, DeviceStatus> {
        self.new_queue()
    }

    fn enqueue(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        geometry: &WorkGeometry,
    ) -> Result<(), DeviceStatus> {
        trace!("enqueue {} with {geometry:?}", kernel.name());
        kernel.enqueue(queue, geometry)
    }

    fn finish(&self, queue: &Self::Queue) -> Result<(), DeviceStatus> {
        queue.finish().map_err(device_status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ContextConfig;
    use kite_core::backend::status;

    fn context() -> Option<OpenClContext> {
        let _ = env_logger::builder().is_test(true).try_init();
        if !OpenClContext::is_available() {
            println!("OpenCL not available, skipping test");
            return None;
        }
        OpenClContext::with_config(&ContextConfig::default()).ok()
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let Some(context) = context() else { return };
        let queue = context.create_queue().unwrap();

        let mut memory = context.allocate(16).unwrap();
        let data: Vec<u8> = (0..16).collect();
        context.write(&queue, &mut memory, &data).unwrap();

        let mut out = vec![0u8; 16];
        context.read(&queue, &memory, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_kernel_runs_and_reports_parameters() {
        let Some(context) = context() else { return };
        let module = context
            .build_module(
                "__kernel void add(__global int *data, int x) {
                    int i = get_global_id(0);
                    data[i] += x;
                }",
                "",
            )
            .unwrap();
        let queue = context.create_queue().unwrap();
        let mut kernel = context.create_kernel(&module, "add").unwrap();
        assert_eq!(context.parameter_count(&kernel).unwrap(), 2);
        assert!(context.preferred_work_group_size(&kernel).unwrap() > 0);

        let mut memory = context.allocate(16).unwrap();
        let input: Vec<u8> = [1i32, 2, 3, 4].iter().flat_map(|v| v.to_le_bytes()).collect();
        context.write(&queue, &mut memory, &input).unwrap();
        context.set_arg_memory(&mut kernel, 0, &memory).unwrap();
        context.set_arg_scalar(&mut kernel, 1, &10i32.to_le_bytes()).unwrap();

        let geometry = WorkGeometry {
            dimensions: 1,
            global: [4, 1, 1],
            local: None,
        };
        context.enqueue(&queue, &kernel, &geometry).unwrap();
        context.finish(&queue).unwrap();

        let mut out = vec![0u8; 16];
        context.read(&queue, &memory, &mut out).unwrap();
        let values: Vec<i32> = out
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(values, vec![11, 12, 13, 14]);
    }

    #[test]
    fn test_unknown_kernel_name() {
        let Some(context) = context() else { return };
        let module = context.build_module("__kernel void a(int x) { }", "").unwrap();
        let err = context.create_kernel(&module, "b").unwrap_err();
        assert_eq!(err.code, status::INVALID_KERNEL_NAME);
    }
}
