//! Argument binder
//!
//! Turns the positional argument list of one invocation into device
//! bindings. Binding happens in two steps:
//!
//! 1. [`ArgumentBinder::bind`] classifies every argument, wraps raw
//!    sequences, encodes scalars and writes dirty buffers through to the
//!    device. Nothing touches the kernel yet.
//! 2. [`BoundArguments::apply`] sets every kernel argument.
//!
//! A failure in step 1 leaves the kernel untouched. Buffer syncs that already
//! happened are not rolled back.

use crate::args::Arg;
use crate::backend::Backend;
use crate::buffer::TypedBuffer;
use crate::error::{KiteError, Result};
use crate::planner::WorkSizeRequest;
use crate::types::TypeRegistry;
use log::{trace, warn};

enum Binding<'a, B: Backend> {
    Borrowed(&'a mut TypedBuffer<B>),
    Owned(TypedBuffer<B>),
    Scalar(Vec<u8>),
}

impl<'a, B: Backend> Binding<'a, B> {
    fn buffer(&self) -> Option<&TypedBuffer<B>> {
        match self {
            Binding::Borrowed(buffer) => Some(buffer),
            Binding::Owned(buffer) => Some(buffer),
            Binding::Scalar(_) => None,
        }
    }

    fn buffer_mut(&mut self) -> Option<&mut TypedBuffer<B>> {
        match self {
            Binding::Borrowed(buffer) => Some(buffer),
            Binding::Owned(buffer) => Some(buffer),
            Binding::Scalar(_) => None,
        }
    }
}

struct BoundArgument<'a, B: Backend> {
    /// Printable form, kept for error messages
    shown: String,
    binding: Binding<'a, B>,
}

/// Arguments of one invocation, ready to be applied to a kernel
pub struct BoundArguments<'a, B: Backend> {
    arguments: Vec<BoundArgument<'a, B>>,
    request: WorkSizeRequest,
}

impl<'a, B: Backend> BoundArguments<'a, B> {
    /// Geometry inputs gathered while binding
    pub fn request(&self) -> &WorkSizeRequest {
        &self.request
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// Sets every kernel argument in order
    pub fn apply(&self, backend: &B, kernel: &mut B::Kernel) -> Result<()> {
        for (index, argument) in self.arguments.iter().enumerate() {
            let slot = u32::try_from(index)
                .map_err(|_| binding_error(index, argument, "index overflow"))?;
            let applied = match &argument.binding {
                Binding::Scalar(bytes) => Some(backend.set_arg_scalar(kernel, slot, bytes)),
                binding => binding
                    .buffer()
                    .and_then(TypedBuffer::device_memory)
                    .map(|memory| backend.set_arg_memory(kernel, slot, memory)),
            };
            match applied {
                Some(Ok(())) => trace!("bound argument #{index} {}", argument.shown),
                Some(Err(status)) => {
                    return Err(binding_error(index, argument, status.to_string()))
                }
                None => return Err(binding_error(index, argument, "null handle")),
            }
        }
        Ok(())
    }

    /// Reads output buffers back, in argument order, and hands them out
    pub fn read_back(self, backend: &B, queue: &B::Queue) -> Result<Vec<&'a TypedBuffer<B>>> {
        let mut outputs = Vec::new();
        for argument in self.arguments {
            if let Binding::Borrowed(buffer) = argument.binding {
                if buffer.is_output() {
                    buffer.sync_from_device(backend, queue)?;
                    outputs.push(&*buffer);
                }
            }
        }
        Ok(outputs)
    }
}

fn binding_error<B: Backend>(
    index: usize,
    argument: &BoundArgument<'_, B>,
    reason: impl Into<String>,
) -> KiteError {
    KiteError::ArgumentBinding {
        index,
        argument: argument.shown.clone(),
        reason: reason.into(),
    }
}

pub struct ArgumentBinder<'b, B: Backend> {
    backend: &'b B,
    registry: &'static TypeRegistry,
}

impl<'b, B: Backend> ArgumentBinder<'b, B> {
    pub fn new(backend: &'b B) -> Self {
        Self {
            backend,
            registry: TypeRegistry::global(),
        }
    }

    /// Classifies, encodes and syncs the arguments of one invocation
    ///
    /// `parameter_count` is the number of parameters the kernel declares; a
    /// trailing [`Arg::Options`] does not count as a positional argument.
    pub fn bind<'a>(
        &self,
        kernel: &str,
        parameter_count: usize,
        queue: &B::Queue,
        mut args: Vec<Arg<'a, B>>,
    ) -> Result<BoundArguments<'a, B>> {
        if let Some(pos) = args.iter().position(Arg::is_options) {
            if pos + 1 != args.len() {
                return Err(KiteError::InvalidOptions(format!(
                    "options map must be the last argument, found at position {pos} of {}",
                    args.len()
                )));
            }
        }
        let options = match args.last() {
            Some(Arg::Options(_)) => match args.pop() {
                Some(Arg::Options(options)) => Some(options),
                _ => None,
            },
            _ => None,
        };

        if args.len() != parameter_count {
            let index = args.len().min(parameter_count);
            let argument = args
                .get(index)
                .map_or_else(|| "nothing".to_string(), ToString::to_string);
            return Err(KiteError::ArgumentBinding {
                index,
                argument,
                reason: format!(
                    "kernel `{kernel}` takes {parameter_count} arguments, got {}",
                    args.len()
                ),
            });
        }

        let mut request = WorkSizeRequest::default();
        if let Some(options) = &options {
            let (global, local) = options.work_size()?;
            request.global = global;
            request.local = local;
        }

        let mut arguments = Vec::with_capacity(args.len());
        for (index, arg) in args.into_iter().enumerate() {
            let shown = arg.to_string();
            let binding = match arg {
                Arg::Buffer(buffer) => Binding::Borrowed(buffer),
                Arg::Owned(buffer) => Binding::Owned(buffer),
                Arg::Sequence(items) => Binding::Owned(TypedBuffer::wrap(items)?),
                Arg::Scalar(value) => {
                    Binding::Scalar(self.registry.infer(&value)?.encode(&value)?)
                }
                Arg::Typed(value) => Binding::Scalar(value.encode()?),
                Arg::Options(_) => {
                    return Err(KiteError::InvalidOptions(format!(
                        "more than one options map, second at position {index}"
                    )))
                }
            };
            let argument = BoundArgument { shown, binding };
            if argument.binding.buffer().is_some_and(TypedBuffer::is_empty) {
                return Err(binding_error(index, &argument, "null handle"));
            }
            if let Binding::Owned(buffer) = &argument.binding {
                if buffer.is_placeholder() {
                    return Err(binding_error(
                        index,
                        &argument,
                        "output placeholder passed by value is never read back, \
                         pass a borrowed buffer",
                    ));
                }
                if buffer.is_output() {
                    warn!("output buffer #{index} passed by value, its results are discarded");
                }
            }
            arguments.push(argument);
        }

        for argument in &mut arguments {
            if let Some(buffer) = argument.binding.buffer_mut() {
                request.candidate = request.candidate.max(buffer.len());
                buffer.sync_to_device(self.backend, queue)?;
            }
        }
        trace!(
            "bound {} arguments for `{kernel}`, longest buffer {}",
            arguments.len(),
            request.candidate
        );

        Ok(BoundArguments { arguments, request })
    }
}
