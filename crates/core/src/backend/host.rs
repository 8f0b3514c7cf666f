//! In-process reference backend
//!
//! `HostBackend` implements [`Backend`] on host memory. It understands just
//! enough OpenCL C to find kernel definitions and their parameter lists, so
//! argument binding behaves like a real driver: widths are checked, unset
//! arguments are refused at enqueue time, and unknown kernel names fail.
//!
//! Kernel bodies are not interpreted. A test registers a Rust closure under
//! the kernel's name; the closure reads and writes the bound arguments
//! through a [`HostLaunch`]. Kernels without a registered body do nothing.
//!
//! Every handle carries a live counter, so tests can check that nothing
//! leaks on any path.

use super::signature::{parse_kernels, KernelDecl, ParamDecl, ParamKind};
use super::traits::{status, Backend, DeviceLimits, DeviceStatus};
use crate::planner::WorkGeometry;
use crate::types::{NativeScalar, TypeRegistry};
use log::trace;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Simulated kernel body
pub type KernelBody = Rc<dyn Fn(&HostLaunch<'_>) -> Result<(), DeviceStatus>>;

/// Width of a memory handle as seen by `set_arg_scalar`
const POINTER_WIDTH: usize = 8;

/// Counters shared by a backend and every handle it hands out
#[derive(Debug, Default)]
pub struct HostStats {
    builds: Cell<usize>,
    allocations: Cell<usize>,
    writes: Cell<usize>,
    reads: Cell<usize>,
    enqueues: Cell<usize>,
    live_modules: Cell<usize>,
    live_memories: Cell<usize>,
    live_kernels: Cell<usize>,
    live_queues: Cell<usize>,
}

impl HostStats {
    pub fn builds(&self) -> usize {
        self.builds.get()
    }

    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    pub fn enqueues(&self) -> usize {
        self.enqueues.get()
    }

    pub fn live_modules(&self) -> usize {
        self.live_modules.get()
    }

    pub fn live_memories(&self) -> usize {
        self.live_memories.get()
    }

    pub fn live_kernels(&self) -> usize {
        self.live_kernels.get()
    }

    pub fn live_queues(&self) -> usize {
        self.live_queues.get()
    }

    /// Kernel and queue handles that have not been dropped
    pub fn live_dispatch_handles(&self) -> usize {
        self.live_kernels() + self.live_queues()
    }
}

#[derive(Debug, Clone, Copy)]
enum Resource {
    Module,
    Memory,
    Kernel,
    Queue,
}

/// Keeps one live counter raised for as long as the owning handle exists
struct Live {
    stats: Rc<HostStats>,
    resource: Resource,
}

impl Live {
    fn new(stats: &Rc<HostStats>, resource: Resource) -> Self {
        let counter = Self::counter(stats, resource);
        counter.set(counter.get() + 1);
        Self {
            stats: Rc::clone(stats),
            resource,
        }
    }

    fn counter(stats: &HostStats, resource: Resource) -> &Cell<usize> {
        match resource {
            Resource::Module => &stats.live_modules,
            Resource::Memory => &stats.live_memories,
            Resource::Kernel => &stats.live_kernels,
            Resource::Queue => &stats.live_queues,
        }
    }
}

impl Drop for Live {
    fn drop(&mut self) {
        let counter = Self::counter(&self.stats, self.resource);
        counter.set(counter.get().saturating_sub(1));
    }
}

fn bump(counter: &Cell<usize>) {
    counter.set(counter.get() + 1);
}

pub struct HostModule {
    kernels: Vec<KernelDecl>,
    _live: Live,
}

pub struct HostMemory {
    data: Rc<RefCell<Vec<u8>>>,
    _live: Live,
}

impl HostMemory {
    pub fn byte_len(&self) -> usize {
        self.data.borrow().len()
    }
}

#[derive(Clone)]
enum HostArg {
    Memory(Rc<RefCell<Vec<u8>>>),
    Scalar(Vec<u8>),
}

pub struct HostKernel {
    decl: KernelDecl,
    args: Vec<Option<HostArg>>,
    body: Option<KernelBody>,
    _live: Live,
}

pub struct HostQueue {
    _live: Live,
}

/// View of one kernel launch handed to a [`KernelBody`]
pub struct HostLaunch<'a> {
    kernel: &'a str,
    geometry: WorkGeometry,
    args: &'a [Option<HostArg>],
}

impl<'a> HostLaunch<'a> {
    pub fn kernel(&self) -> &str {
        self.kernel
    }

    pub fn geometry(&self) -> &WorkGeometry {
        &self.geometry
    }

    /// Total number of work items
    pub fn global_size(&self) -> usize {
        self.geometry.total()
    }

    fn arg(&self, index: usize) -> Result<&HostArg, DeviceStatus> {
        self.args
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| {
                DeviceStatus::new(
                    status::INVALID_ARG_INDEX,
                    format!("kernel `{}` has no argument {index}", self.kernel),
                )
            })
    }

    fn memory(&self, index: usize) -> Result<&Rc<RefCell<Vec<u8>>>, DeviceStatus> {
        match self.arg(index)? {
            HostArg::Memory(data) => Ok(data),
            HostArg::Scalar(_) => Err(DeviceStatus::new(
                status::INVALID_MEM_OBJECT,
                format!("argument {index} is not a buffer"),
            )),
        }
    }

    /// Contents of a buffer argument
    pub fn buffer<T: NativeScalar>(&self, index: usize) -> Result<Vec<T>, DeviceStatus> {
        let data = self.memory(index)?.borrow();
        Ok(data.chunks_exact(T::WIDTH).map(T::read_le).collect())
    }

    /// Overwrites the leading elements of a buffer argument
    pub fn store<T: NativeScalar>(&self, index: usize, values: &[T]) -> Result<(), DeviceStatus> {
        let mut data = self.memory(index)?.borrow_mut();
        if values.len() * T::WIDTH > data.len() {
            return Err(DeviceStatus::new(
                status::OUT_OF_RESOURCES,
                format!("store of {} elements overruns argument {index}", values.len()),
            ));
        }
        for (value, slot) in values.iter().zip(data.chunks_exact_mut(T::WIDTH)) {
            value.write_le(slot);
        }
        Ok(())
    }

    /// By-value argument
    pub fn scalar<T: NativeScalar>(&self, index: usize) -> Result<T, DeviceStatus> {
        match self.arg(index)? {
            HostArg::Scalar(bytes) if bytes.len() == T::WIDTH => Ok(T::read_le(bytes)),
            HostArg::Scalar(bytes) => Err(DeviceStatus::new(
                status::INVALID_ARG_SIZE,
                format!("argument {index} is {} bytes wide", bytes.len()),
            )),
            HostArg::Memory(_) => Err(DeviceStatus::new(
                status::INVALID_ARG_VALUE,
                format!("argument {index} is a buffer"),
            )),
        }
    }
}

pub struct HostBackend {
    registry: &'static TypeRegistry,
    limits: DeviceLimits,
    preferred_work_group_size: usize,
    bodies: HashMap<String, KernelBody>,
    stats: Rc<HostStats>,
    last_geometry: Cell<Option<WorkGeometry>>,
    fail_next_enqueue: Cell<Option<i32>>,
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBackend {
    pub fn new() -> Self {
        Self {
            registry: TypeRegistry::global(),
            limits: DeviceLimits::default(),
            preferred_work_group_size: 32,
            bodies: HashMap::new(),
            stats: Rc::new(HostStats::default()),
            last_geometry: Cell::new(None),
            fail_next_enqueue: Cell::new(None),
        }
    }

    /// Registers the body run when the named kernel is enqueued
    pub fn with_kernel<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&HostLaunch<'_>) -> Result<(), DeviceStatus> + 'static,
    {
        self.bodies.insert(name.to_string(), Rc::new(body));
        self
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_preferred_work_group_size(mut self, size: usize) -> Self {
        self.preferred_work_group_size = size;
        self
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    /// Geometry of the most recent successful enqueue
    pub fn last_geometry(&self) -> Option<WorkGeometry> {
        self.last_geometry.get()
    }

    /// Makes the next enqueue fail with `code`
    pub fn fail_next_enqueue(&self, code: i32) {
        self.fail_next_enqueue.set(Some(code));
    }

    fn parse(&self, source: &str) -> Result<Vec<KernelDecl>, DeviceStatus> {
        parse_kernels(source, self.registry)
            .map_err(|e| DeviceStatus::new(status::BUILD_PROGRAM_FAILURE, e.to_string()))
    }
}

impl fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBackend")
            .field("limits", &self.limits)
            .field("bodies", &self.bodies.keys().collect::<Vec<_>>())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Backend for HostBackend {
    type Memory = HostMemory;
    type Module = HostModule;
    type Kernel = HostKernel;
    type Queue = HostQueue;

    fn describe(&self) -> String {
        "host reference backend".to_string()
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn build_module(&self, source: &str, _options: &str) -> Result<HostModule, DeviceStatus> {
        let kernels = self.parse(source)?;
        bump(&self.stats.builds);
        trace!("host build found {} kernels", kernels.len());
        Ok(HostModule {
            kernels,
            _live: Live::new(&self.stats, Resource::Module),
        })
    }

    fn kernel_names(&self, module: &HostModule) -> Result<Vec<String>, DeviceStatus> {
        Ok(module.kernels.iter().map(|k| k.name.clone()).collect())
    }

    fn allocate(&self, byte_len: usize) -> Result<HostMemory, DeviceStatus> {
        if byte_len == 0 {
            return Err(DeviceStatus::new(
                status::INVALID_BUFFER_SIZE,
                "cannot allocate an empty region",
            ));
        }
        bump(&self.stats.allocations);
        Ok(HostMemory {
            data: Rc::new(RefCell::new(vec![0; byte_len])),
            _live: Live::new(&self.stats, Resource::Memory),
        })
    }

    fn write(
        &self,
        _queue: &HostQueue,
        memory: &mut HostMemory,
        data: &[u8],
    ) -> Result<(), DeviceStatus> {
        let mut region = memory.data.borrow_mut();
        if data.len() > region.len() {
            return Err(DeviceStatus::new(
                status::INVALID_VALUE,
                format!("write of {} bytes into {} byte region", data.len(), region.len()),
            ));
        }
        region[..data.len()].copy_from_slice(data);
        bump(&self.stats.writes);
        Ok(())
    }

    fn read(
        &self,
        _queue: &HostQueue,
        memory: &HostMemory,
        out: &mut [u8],
    ) -> Result<(), DeviceStatus> {
        let region = memory.data.borrow();
        if out.len() > region.len() {
            return Err(DeviceStatus::new(
                status::INVALID_VALUE,
                format!("read of {} bytes from {} byte region", out.len(), region.len()),
            ));
        }
        out.copy_from_slice(&region[..out.len()]);
        bump(&self.stats.reads);
        Ok(())
    }

    fn create_kernel(&self, module: &HostModule, name: &str) -> Result<HostKernel, DeviceStatus> {
        let decl = module
            .kernels
            .iter()
            .find(|k| k.name == name)
            .cloned()
            .ok_or_else(|| {
                DeviceStatus::new(status::INVALID_KERNEL_NAME, format!("no kernel `{name}`"))
            })?;
        Ok(HostKernel {
            args: vec![None; decl.params.len()],
            body: self.bodies.get(name).cloned(),
            decl,
            _live: Live::new(&self.stats, Resource::Kernel),
        })
    }

    fn parameter_count(&self, kernel: &HostKernel) -> Result<usize, DeviceStatus> {
        Ok(kernel.decl.params.len())
    }

    fn set_arg_memory(
        &self,
        kernel: &mut HostKernel,
        index: u32,
        memory: &HostMemory,
    ) -> Result<(), DeviceStatus> {
        let slot = index as usize;
        let param = param_at(&kernel.decl, slot)?;
        if param.kind != ParamKind::Pointer {
            return Err(DeviceStatus::new(
                status::INVALID_ARG_SIZE,
                format!("parameter `{}` is not a pointer", param.text),
            ));
        }
        kernel.args[slot] = Some(HostArg::Memory(Rc::clone(&memory.data)));
        Ok(())
    }

    fn set_arg_scalar(
        &self,
        kernel: &mut HostKernel,
        index: u32,
        bytes: &[u8],
    ) -> Result<(), DeviceStatus> {
        let slot = index as usize;
        let param = param_at(&kernel.decl, slot)?;
        let expected = match param.kind {
            ParamKind::Pointer => POINTER_WIDTH,
            ParamKind::Scalar(width) => width,
        };
        if param.kind == ParamKind::Pointer || bytes.len() != expected {
            return Err(DeviceStatus::new(
                status::INVALID_ARG_SIZE,
                format!(
                    "{} byte value for parameter `{}` ({expected} bytes)",
                    bytes.len(),
                    param.text
                ),
            ));
        }
        kernel.args[slot] = Some(HostArg::Scalar(bytes.to_vec()));
        Ok(())
    }

    fn preferred_work_group_size(&self, _kernel: &HostKernel) -> Result<usize, DeviceStatus> {
        Ok(self.preferred_work_group_size)
    }

    fn create_queue(&self) -> Result<HostQueue, DeviceStatus> {
        Ok(HostQueue {
            _live: Live::new(&self.stats, Resource::Queue),
        })
    }

    fn enqueue(
        &self,
        _queue: &HostQueue,
        kernel: &HostKernel,
        geometry: &WorkGeometry,
    ) -> Result<(), DeviceStatus> {
        if let Some(code) = self.fail_next_enqueue.take() {
            return Err(DeviceStatus::new(code, "injected enqueue failure"));
        }
        if let Some(unset) = kernel.args.iter().position(Option::is_none) {
            return Err(DeviceStatus::new(
                status::INVALID_KERNEL_ARGS,
                format!("argument {unset} of `{}` is not set", kernel.decl.name),
            ));
        }
        if geometry.dimensions == 0 || geometry.dimensions > 3 {
            return Err(DeviceStatus::new(
                status::INVALID_WORK_DIMENSION,
                format!("{} dimensions", geometry.dimensions),
            ));
        }
        let dims = geometry.dimensions as usize;
        if geometry.global[..dims].contains(&0) {
            return Err(DeviceStatus::new(
                status::INVALID_GLOBAL_WORK_SIZE,
                format!("global size {:?}", geometry.global),
            ));
        }
        if let Some(local) = geometry.local {
            let divides = geometry.global[..dims]
                .iter()
                .zip(&local[..dims])
                .all(|(&g, &l)| l > 0 && g % l == 0);
            let group: usize = local[..dims].iter().product();
            if !divides || group > self.limits.max_work_group_size {
                return Err(DeviceStatus::new(
                    status::INVALID_WORK_GROUP_SIZE,
                    format!("local size {local:?} for global size {:?}", geometry.global),
                ));
            }
        }

        bump(&self.stats.enqueues);
        self.last_geometry.set(Some(*geometry));
        trace!("host enqueue of `{}` over {:?}", kernel.decl.name, geometry.global);

        match &kernel.body {
            Some(body) => body(&HostLaunch {
                kernel: &kernel.decl.name,
                geometry: *geometry,
                args: &kernel.args,
            }),
            None => Ok(()),
        }
    }

    fn finish(&self, _queue: &HostQueue) -> Result<(), DeviceStatus> {
        Ok(())
    }
}

fn param_at(decl: &KernelDecl, index: usize) -> Result<&ParamDecl, DeviceStatus> {
    decl.params.get(index).ok_or_else(|| {
        DeviceStatus::new(
            status::INVALID_ARG_INDEX,
            format!("kernel `{}` has {} parameters", decl.name, decl.params.len()),
        )
    })
}
