//! Compiled programs
//!
//! A [`Program`] owns at most one compiled module and the names of the
//! kernels it defines. Kernels are invoked by name; kernel handles are
//! created per invocation and never cached.

use crate::args::Arg;
use crate::backend::Backend;
use crate::dispatch::{Invocation, Returned};
use crate::error::{KiteError, Result};
use crate::planner::{WorkSizePlanner, WorkSizePolicy};
use log::{debug, warn};

/// Build options that trade accuracy for speed
pub const FAST_MATH_OPTIONS: &str =
    "-cl-fast-relaxed-math -cl-mad-enable -cl-unsafe-math-optimizations";

/// Program build settings
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgramConfig {
    /// Options passed verbatim to the device compiler
    pub build_options: String,
    pub work_size_policy: WorkSizePolicy,
}

impl ProgramConfig {
    /// Default policy with fast-math build options
    pub fn fast_math() -> Self {
        Self {
            build_options: FAST_MATH_OPTIONS.to_string(),
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: WorkSizePolicy) -> Self {
        self.work_size_policy = policy;
        self
    }

    pub fn with_build_options(mut self, options: impl Into<String>) -> Self {
        self.build_options = options.into();
        self
    }
}

struct CompiledModule<B: Backend> {
    module: B::Module,
    source: String,
    kernel_names: Vec<String>,
}

pub struct Program<'c, B: Backend> {
    backend: &'c B,
    config: ProgramConfig,
    compiled: Option<CompiledModule<B>>,
}

impl<'c, B: Backend> Program<'c, B> {
    /// Compiles `source` with the default configuration
    pub fn new(backend: &'c B, source: &str) -> Result<Self> {
        Self::with_config(backend, source, ProgramConfig::default())
    }

    pub fn with_config(backend: &'c B, source: &str, config: ProgramConfig) -> Result<Self> {
        let mut program = Self::empty_with_config(backend, config);
        program.compile(source)?;
        Ok(program)
    }

    /// Program with nothing compiled yet
    pub fn empty(backend: &'c B) -> Self {
        Self::empty_with_config(backend, ProgramConfig::default())
    }

    pub fn empty_with_config(backend: &'c B, config: ProgramConfig) -> Self {
        Self {
            backend,
            config,
            compiled: None,
        }
    }

    pub fn config(&self) -> &ProgramConfig {
        &self.config
    }

    pub fn backend(&self) -> &'c B {
        self.backend
    }

    /// Builds `source` and installs it as the program's module
    ///
    /// On failure the previously compiled module, if any, stays installed
    /// and usable.
    pub fn compile(&mut self, source: &str) -> Result<()> {
        let module = self
            .backend
            .build_module(source, &self.config.build_options)
            .map_err(|status| {
                warn!("program build failed ({})", status.code);
                KiteError::Compile {
                    log: status.message,
                }
            })?;
        let kernel_names = self
            .backend
            .kernel_names(&module)
            .map_err(|status| KiteError::Compile {
                log: status.message,
            })?;
        debug!(
            "compiled program on {} with kernels {:?}",
            self.backend.describe(),
            kernel_names
        );

        // the old module is released before the new one is installed
        self.compiled = None;
        self.compiled = Some(CompiledModule {
            module,
            source: source.to_string(),
            kernel_names,
        });
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Source text of the installed module
    pub fn source(&self) -> Option<&str> {
        self.compiled.as_ref().map(|c| c.source.as_str())
    }

    pub fn kernel_names(&self) -> &[String] {
        self.compiled
            .as_ref()
            .map(|c| c.kernel_names.as_slice())
            .unwrap_or_default()
    }

    pub fn has_kernel(&self, name: &str) -> bool {
        self.kernel_names().iter().any(|k| k == name)
    }

    /// Runs the named kernel once
    ///
    /// Output buffers among `args` are read back and returned in call order.
    pub fn invoke<'a>(&self, name: &str, args: Vec<Arg<'a, B>>) -> Result<Returned<'a, B>> {
        let compiled = self.compiled.as_ref().ok_or(KiteError::NotCompiled)?;
        let planner = WorkSizePlanner::new(self.config.work_size_policy);
        let mut invocation = Invocation::new(
            self.backend,
            &compiled.module,
            &compiled.kernel_names,
            name,
            planner,
        );
        invocation.run(args)
    }
}
