//! OpenCL device context
//!
//! The process-wide [`OpenClContext`] is created on first use by
//! [`ensure_initialized`] and lives for the rest of the process. A failed
//! initialization is remembered: later calls report the same error instead of
//! retrying.

use kite_core::backend::{status, DeviceLimits, DeviceStatus};
use kite_core::error::{KiteError, Result};
use log::{debug, info, warn};
use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::{flags, Context as OclContext, Device as OclDevice, Platform, Queue};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Environment variable selecting the platform index
pub const PLATFORM_ENV: &str = "KITE_PLATFORM";
/// Environment variable selecting the device index within the platform
pub const DEVICE_ENV: &str = "KITE_DEVICE";
/// Environment variable selecting the device type (`all`, `gpu`, `cpu`, `accelerator`)
pub const DEVICE_TYPE_ENV: &str = "KITE_DEVICE_TYPE";

/// Kind of device to pick from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceType {
    #[default]
    All,
    Gpu,
    Cpu,
    Accelerator,
}

impl DeviceType {
    fn flags(self) -> Option<flags::DeviceType> {
        match self {
            DeviceType::All => None,
            DeviceType::Gpu => Some(flags::DEVICE_TYPE_GPU),
            DeviceType::Cpu => Some(flags::DEVICE_TYPE_CPU),
            DeviceType::Accelerator => Some(flags::DEVICE_TYPE_ACCELERATOR),
        }
    }
}

impl FromStr for DeviceType {
    type Err = KiteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(DeviceType::All),
            "gpu" => Ok(DeviceType::Gpu),
            "cpu" => Ok(DeviceType::Cpu),
            "accelerator" => Ok(DeviceType::Accelerator),
            other => Err(KiteError::BackendInit(format!(
                "unknown device type `{other}` (expected all, gpu, cpu or accelerator)"
            ))),
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceType::All => "all",
            DeviceType::Gpu => "gpu",
            DeviceType::Cpu => "cpu",
            DeviceType::Accelerator => "accelerator",
        };
        f.write_str(name)
    }
}

/// Which platform and device a context is created on
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContextConfig {
    pub platform_index: usize,
    pub device_index: usize,
    pub device_type: DeviceType,
}

impl ContextConfig {
    /// Defaults overridden by `KITE_PLATFORM`, `KITE_DEVICE` and `KITE_DEVICE_TYPE`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = read_env(PLATFORM_ENV) {
            config.platform_index = parse_index(PLATFORM_ENV, &value)?;
        }
        if let Some(value) = read_env(DEVICE_ENV) {
            config.device_index = parse_index(DEVICE_ENV, &value)?;
        }
        if let Some(value) = read_env(DEVICE_TYPE_ENV) {
            config.device_type = value.parse()?;
        }
        Ok(config)
    }

    pub fn with_device(mut self, device_index: usize) -> Self {
        self.device_index = device_index;
        self
    }

    pub fn with_platform(mut self, platform_index: usize) -> Self {
        self.platform_index = platform_index;
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }
}

fn read_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_index(name: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        KiteError::BackendInit(format!("{name} must be a device index, got `{value}`"))
    })
}

/// Converts an `ocl` error into a backend status, keeping the API code if any
pub(crate) fn device_status(err: ocl::Error) -> DeviceStatus {
    let code = err.api_status().map_or(status::UNKNOWN, |s| s as i32);
    DeviceStatus::new(code, err.to_string())
}

/// OpenCL platform, device and context with the device's limits
pub struct OpenClContext {
    pub(crate) platform: Platform,
    pub(crate) device: OclDevice,
    pub(crate) context: OclContext,
    pub(crate) limits: DeviceLimits,
    name: String,
}

impl OpenClContext {
    /// Whether any OpenCL platform is installed
    pub fn is_available() -> bool {
        !Platform::list().is_empty()
    }

    /// Creates a context that is not the process-wide one
    pub fn with_config(config: &ContextConfig) -> Result<Self> {
        let platforms = Platform::list();
        let platform = platforms
            .get(config.platform_index)
            .copied()
            .ok_or_else(|| {
                KiteError::BackendInit(format!(
                    "platform index {} out of range (available: {})",
                    config.platform_index,
                    platforms.len()
                ))
            })?;

        let devices = match config.device_type.flags() {
            Some(kind) => OclDevice::list(platform, Some(kind)),
            None => OclDevice::list_all(platform),
        }
        .map_err(|e| KiteError::BackendInit(format!("failed to list devices: {e}")))?;
        if devices.is_empty() {
            return Err(KiteError::BackendInit(format!(
                "no OpenCL devices of type {} found",
                config.device_type
            )));
        }

        let device = devices.get(config.device_index).copied().ok_or_else(|| {
            KiteError::BackendInit(format!(
                "device index {} out of range (available: {})",
                config.device_index,
                devices.len()
            ))
        })?;

        let context = OclContext::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(|e| KiteError::BackendInit(format!("failed to create context: {e}")))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let limits = query_limits(&device);
        info!("OpenCL context created on {name}");
        debug!("device limits: {limits:?}");

        Ok(Self {
            platform,
            device,
            context,
            limits,
            name,
        })
    }

    /// Get the device name
    pub fn device_name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn ocl_device(&self) -> OclDevice {
        self.device
    }

    pub fn ocl_context(&self) -> &OclContext {
        &self.context
    }

    pub(crate) fn new_queue(&self) -> std::result::Result<Queue, DeviceStatus> {
        Queue::new(&self.context, self.device, None).map_err(device_status)
    }

    /// Names of every device on every platform
    pub fn list_devices() -> Result<Vec<String>> {
        let mut names = Vec::new();
        for platform in Platform::list() {
            let devices = OclDevice::list_all(platform)
                .map_err(|e| KiteError::BackendInit(format!("failed to list devices: {e}")))?;
            for device in devices {
                match device.name() {
                    Ok(name) => names.push(name),
                    Err(e) => warn!("skipping device without a name: {e}"),
                }
            }
        }
        Ok(names)
    }
}

impl fmt::Debug for OpenClContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenClContext")
            .field("device", &self.name)
            .field("limits", &self.limits)
            .finish()
    }
}

fn query_limits(device: &OclDevice) -> DeviceLimits {
    let mut limits = DeviceLimits::default();
    match device.info(DeviceInfo::MaxWorkGroupSize) {
        Ok(DeviceInfoResult::MaxWorkGroupSize(n)) => limits.max_work_group_size = n,
        _ => warn!("could not query max work-group size, using {}", limits.max_work_group_size),
    }
    match device.info(DeviceInfo::MaxWorkItemSizes) {
        Ok(DeviceInfoResult::MaxWorkItemSizes(sizes)) => {
            for (slot, size) in limits.max_work_item_sizes.iter_mut().zip(sizes) {
                *slot = size;
            }
        }
        _ => warn!("could not query max work-item sizes, using {:?}", limits.max_work_item_sizes),
    }
    limits
}

// Safety: OpenCL contexts and device ids are thread-safe handles
unsafe impl Send for OpenClContext {}
unsafe impl Sync for OpenClContext {}

static CONTEXT: OnceLock<std::result::Result<OpenClContext, String>> = OnceLock::new();

/// The process-wide context, configured from the environment on first use
pub fn ensure_initialized() -> Result<&'static OpenClContext> {
    init_with(ContextConfig::from_env)
}

/// The process-wide context, created with `config` if it does not exist yet
///
/// Once the context exists, `config` is ignored.
pub fn ensure_initialized_with(config: ContextConfig) -> Result<&'static OpenClContext> {
    init_with(move || Ok(config))
}

fn init_with(config: impl FnOnce() -> Result<ContextConfig>) -> Result<&'static OpenClContext> {
    CONTEXT
        .get_or_init(|| {
            config()
                .and_then(|config| OpenClContext::with_config(&config))
                .map_err(|e| {
                    warn!("OpenCL initialization failed: {e}");
                    e.to_string()
                })
        })
        .as_ref()
        .map_err(|msg| KiteError::BackendInit(msg.clone()))
}
