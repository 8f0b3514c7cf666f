//! Kernel dispatcher
//!
//! One [`Invocation`] drives one kernel call through
//! `Resolve → Bind → Enqueue → Wait → Readback → Released`. Any step may
//! fail, which moves the invocation to `Failed`. The kernel and queue
//! handles are owned by the invocation and dropped when it finishes, fails,
//! or is itself dropped.

use crate::args::Arg;
use crate::backend::{status, Backend, DeviceStatus};
use crate::binder::ArgumentBinder;
use crate::buffer::TypedBuffer;
use crate::error::{ExecutionError, KiteError, Result};
use crate::planner::WorkSizePlanner;
use log::{debug, trace};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Resolve,
    Bind,
    Enqueue,
    Wait,
    Readback,
    Released,
    Failed,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DispatchState::Resolve => "resolve",
            DispatchState::Bind => "bind",
            DispatchState::Enqueue => "enqueue",
            DispatchState::Wait => "wait",
            DispatchState::Readback => "readback",
            DispatchState::Released => "released",
            DispatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Output buffers of an invocation, in call order
pub enum Returned<'a, B: Backend> {
    Nothing,
    One(&'a TypedBuffer<B>),
    Many(Vec<&'a TypedBuffer<B>>),
}

impl<'a, B: Backend> Returned<'a, B> {
    fn from_outputs(mut outputs: Vec<&'a TypedBuffer<B>>) -> Self {
        match outputs.len() {
            0 => Returned::Nothing,
            1 => match outputs.pop() {
                Some(buffer) => Returned::One(buffer),
                None => Returned::Nothing,
            },
            _ => Returned::Many(outputs),
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, Returned::Nothing)
    }

    pub fn len(&self) -> usize {
        match self {
            Returned::Nothing => 0,
            Returned::One(_) => 1,
            Returned::Many(buffers) => buffers.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single returned buffer, if exactly one was returned
    pub fn one(&self) -> Option<&'a TypedBuffer<B>> {
        match self {
            Returned::One(buffer) => Some(*buffer),
            _ => None,
        }
    }

    /// Every returned buffer, in call order
    pub fn buffers(&self) -> Vec<&'a TypedBuffer<B>> {
        match self {
            Returned::Nothing => Vec::new(),
            Returned::One(buffer) => vec![*buffer],
            Returned::Many(buffers) => buffers.clone(),
        }
    }
}

impl<'a, B: Backend> fmt::Debug for Returned<'a, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Returned::Nothing => write!(f, "Nothing"),
            Returned::One(buffer) => f.debug_tuple("One").field(buffer).finish(),
            Returned::Many(buffers) => f.debug_tuple("Many").field(buffers).finish(),
        }
    }
}

pub struct Invocation<'p, B: Backend> {
    backend: &'p B,
    module: &'p B::Module,
    kernel_names: &'p [String],
    name: String,
    planner: WorkSizePlanner,
    state: DispatchState,
    kernel: Option<B::Kernel>,
    queue: Option<B::Queue>,
}

impl<'p, B: Backend> Invocation<'p, B> {
    /// `kernel_names` is the name registry of `module`
    pub fn new(
        backend: &'p B,
        module: &'p B::Module,
        kernel_names: &'p [String],
        name: &str,
        planner: WorkSizePlanner,
    ) -> Self {
        Self {
            backend,
            module,
            kernel_names,
            name: name.to_string(),
            planner,
            state: DispatchState::Resolve,
            kernel: None,
            queue: None,
        }
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn kernel_name(&self) -> &str {
        &self.name
    }

    /// Whether the kernel or queue handle is still held
    pub fn holds_handles(&self) -> bool {
        self.kernel.is_some() || self.queue.is_some()
    }

    /// Runs the kernel once with `args`
    ///
    /// Handles are released before this returns, whatever the outcome.
    pub fn run<'a>(&mut self, args: Vec<Arg<'a, B>>) -> Result<Returned<'a, B>> {
        let outcome = self.drive(args);
        self.release();
        match outcome {
            Ok(returned) => {
                enter(&mut self.state, DispatchState::Released, &self.name);
                Ok(returned)
            }
            Err(err) => {
                debug!("invocation of `{}` failed: {err}", self.name);
                enter(&mut self.state, DispatchState::Failed, &self.name);
                Err(err)
            }
        }
    }

    fn drive<'a>(&mut self, args: Vec<Arg<'a, B>>) -> Result<Returned<'a, B>> {
        let backend = self.backend;
        let name = self.name.as_str();

        enter(&mut self.state, DispatchState::Resolve, name);
        if !self.kernel_names.iter().any(|k| k == name) {
            return Err(KiteError::KernelNotFound(name.to_string()));
        }
        let kernel = backend
            .create_kernel(self.module, name)
            .map_err(|e| match e.code {
                status::INVALID_KERNEL_NAME => KiteError::KernelNotFound(name.to_string()),
                _ => device_error(name, e),
            })?;
        let kernel = self.kernel.insert(kernel);

        enter(&mut self.state, DispatchState::Bind, name);
        let queue = backend
            .create_queue()
            .map_err(|e| device_error(name, e))?;
        let queue = &*self.queue.insert(queue);
        let parameter_count = backend
            .parameter_count(kernel)
            .map_err(|e| device_error(name, e))?;
        let bound = ArgumentBinder::new(backend).bind(name, parameter_count, queue, args)?;
        bound.apply(backend, kernel)?;

        enter(&mut self.state, DispatchState::Enqueue, name);
        let preferred = if self.planner.needs_preferred_size() {
            Some(
                backend
                    .preferred_work_group_size(kernel)
                    .map_err(|e| device_error(name, e))?,
            )
        } else {
            None
        };
        let geometry = self
            .planner
            .plan(bound.request(), backend.limits(), preferred)?;
        backend
            .enqueue(queue, kernel, &geometry)
            .map_err(|e| match e.code {
                status::INVALID_KERNEL_ARGS => ExecutionError::InvalidArguments {
                    kernel: name.to_string(),
                    status: e,
                }
                .into(),
                _ => device_error(name, e),
            })?;

        enter(&mut self.state, DispatchState::Wait, name);
        backend
            .finish(queue)
            .map_err(|e| device_error(name, e))?;

        enter(&mut self.state, DispatchState::Readback, name);
        let outputs = bound.read_back(backend, queue)?;
        Ok(Returned::from_outputs(outputs))
    }

    fn release(&mut self) {
        let kernel = self.kernel.take();
        let queue = self.queue.take();
        if kernel.is_some() || queue.is_some() {
            trace!("releasing handles of `{}`", self.name);
        }
    }
}

impl<'p, B: Backend> Drop for Invocation<'p, B> {
    fn drop(&mut self) {
        self.release();
    }
}

fn enter(state: &mut DispatchState, next: DispatchState, kernel: &str) {
    trace!("`{kernel}`: {state} -> {next}");
    *state = next;
}

fn device_error(kernel: &str, status: DeviceStatus) -> KiteError {
    ExecutionError::Device {
        kernel: kernel.to_string(),
        status,
    }
    .into()
}
