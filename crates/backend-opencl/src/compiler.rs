//! OpenCL program compilation

use super::device::{device_status, OpenClContext};
use kite_core::backend::{status, DeviceStatus};
use log::debug;
use ocl::core::{
    self, Program, ProgramBuildInfo, ProgramBuildInfoResult, ProgramInfo, ProgramInfoResult,
};
use std::ffi::CString;

fn c_string(text: &str, what: &str) -> Result<CString, DeviceStatus> {
    CString::new(text).map_err(|_| {
        DeviceStatus::new(status::INVALID_VALUE, format!("{what} contains a NUL byte"))
    })
}

impl OpenClContext {
    /// Builds `source` for this context's device
    ///
    /// A failed build reports the compiler's log verbatim as the message.
    pub(crate) fn compile_program(
        &self,
        source: &str,
        options: &str,
    ) -> Result<Program, DeviceStatus> {
        let src = c_string(source, "program source")?;
        let opts = c_string(options, "build options")?;
        let device = *self.device.as_core();

        let program = core::create_program_with_source(self.context.as_core(), &[src])
            .map_err(|e| device_status(e.into()))?;

        if let Err(e) = core::build_program(&program, Some(&[device][..]), &opts, None, None) {
            let code = e.api_status().map_or(status::BUILD_PROGRAM_FAILURE, |s| s as i32);
            let log = match core::get_program_build_info(
                &program,
                device,
                ProgramBuildInfo::BuildLog,
            ) {
                Ok(ProgramBuildInfoResult::BuildLog(log)) if !log.trim().is_empty() => log,
                _ => e.to_string(),
            };
            return Err(DeviceStatus::new(code, log));
        }

        debug!("built OpenCL program ({} bytes of source)", source.len());
        Ok(program)
    }

    pub(crate) fn program_kernel_names(
        &self,
        program: &Program,
    ) -> Result<Vec<String>, DeviceStatus> {
        match core::get_program_info(program, ProgramInfo::KernelNames) {
            Ok(ProgramInfoResult::KernelNames(names)) => Ok(split_kernel_names(&names)),
            Ok(other) => Err(DeviceStatus::unknown(format!(
                "unexpected program info: {other:?}"
            ))),
            Err(e) => Err(device_status(e.into())),
        }
    }
}

/// Splits the `;`-separated list the driver reports
fn split_kernel_names(names: &str) -> Vec<String> {
    names
        .split(';')
        .map(|name| name.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ContextConfig;

    #[test]
    fn test_split_kernel_names() {
        assert_eq!(split_kernel_names("copy;sum\0"), ["copy", "sum"]);
        assert!(split_kernel_names("").is_empty());
    }

    #[test]
    fn test_nul_in_source_is_rejected() {
        let err = c_string("a\0b", "program source").unwrap_err();
        assert_eq!(err.code, status::INVALID_VALUE);
    }

    #[test]
    fn test_compile_and_list_kernels() {
        if !OpenClContext::is_available() {
            println!("OpenCL not available, skipping test");
            return;
        }
        let Ok(context) = OpenClContext::with_config(&ContextConfig::default()) else {
            println!("OpenCL context could not be created, skipping test");
            return;
        };

        let program = context
            .compile_program(
                "__kernel void a(__global int *x) { x[0] = 1; }\n__kernel void b(int y) { }",
                "",
            )
            .unwrap();
        let mut names = context.program_kernel_names(&program).unwrap();
        names.sort();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn test_build_failure_returns_log() {
        if !OpenClContext::is_available() {
            println!("OpenCL not available, skipping test");
            return;
        }
        let Ok(context) = OpenClContext::with_config(&ContextConfig::default()) else {
            println!("OpenCL context could not be created, skipping test");
            return;
        };

        let err = context.compile_program("fib { SYNTAXERROR }", "").unwrap_err();
        assert!(!err.message.is_empty());
    }
}
