//! Device and backend selection.

use std::fmt;
use std::sync::{Mutex, OnceLock};

/// Compute device for array operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Device {
    /// CPU backend (reference interpreter, debugging)
    Cpu,
    /// WebGPU backend (primary accelerator)
    WebGpu,
}

impl Device {
    /// Returns the name of this device as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Cpu => "cpu",
            Device::WebGpu => "webgpu",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Device::Cpu),
            "webgpu" => Ok(Device::WebGpu),
            _ => Err(format!("Unknown device: {}", s)),
        }
    }
}

/// Global default device for array operations.
static DEFAULT_DEVICE: Mutex<Device> = Mutex::new(Device::Cpu);

/// Probed device list.
static AVAILABLE: OnceLock<Vec<Device>> = OnceLock::new();

/// Get the current default device (CPU unless overridden).
pub fn default_device() -> Device {
    *DEFAULT_DEVICE.lock().unwrap()
}

/// Set the default device, returning the previous one.
///
/// # Examples
///
/// ```
/// # use lazyjax::{set_default_device, default_device, Device};
/// let prior = set_default_device(Device::Cpu);
/// assert_eq!(default_device(), Device::Cpu);
/// set_default_device(prior);
/// ```
pub fn set_default_device(device: Device) -> Device {
    let mut current = DEFAULT_DEVICE.lock().unwrap();
    std::mem::replace(&mut *current, device)
}

/// The list of available devices, probed once on first use.
///
/// CPU is always present; WebGPU is listed when an adapter can be
/// acquired.
pub fn available_devices() -> &'static [Device] {
    AVAILABLE.get_or_init(|| {
        let mut devices = vec![Device::Cpu];
        if crate::backend::webgpu::WebGpuContext::probe() {
            devices.push(Device::WebGpu);
        }
        devices
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "cpu");
        assert_eq!(Device::WebGpu.to_string(), "webgpu");
    }

    #[test]
    fn test_device_from_str() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("webgpu".parse::<Device>().unwrap(), Device::WebGpu);
        assert!("unknown".parse::<Device>().is_err());
    }

    #[test]
    fn test_set_default_returns_prior() {
        let prior = set_default_device(Device::Cpu);
        let prev = set_default_device(prior);
        assert_eq!(prev, Device::Cpu);
    }
}
