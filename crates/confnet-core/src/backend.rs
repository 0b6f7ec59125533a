//! Compute device selection.
//!
//! The CPU (ndarray) backend is always available. GPUs are reached through
//! the wgpu backend, which the `train` tool only links when built with its
//! `wgpu` feature.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Error, Result};

/// Device type for backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Device {
    /// CPU backend
    #[default]
    Cpu,
    /// GPU backend with adapter index
    Gpu(usize),
}

impl Device {
    /// Map the numeric device selector: negative means CPU
    pub fn from_index(index: i32) -> Self {
        match usize::try_from(index) {
            Ok(id) => Device::Gpu(id),
            Err(_) => Device::Cpu,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu(id) => write!(f, "GPU:{}", id),
        }
    }
}

/// Check the requested device against what this build can drive
pub fn init_device(index: i32, gpu_support: bool) -> Result<Device> {
    let device = Device::from_index(index);
    match device {
        Device::Cpu => info!("Using CPU backend"),
        Device::Gpu(id) if gpu_support => info!("Using GPU backend (adapter {})", id),
        Device::Gpu(id) => {
            return Err(Error::Device(format!(
                "GPU {id} requested but this build has no GPU backend; \
                 rebuild with `--features wgpu` or pass `--device -1`"
            )));
        }
    }
    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_from_index() {
        assert_eq!(Device::from_index(-1), Device::Cpu);
        assert_eq!(Device::from_index(0), Device::Gpu(0));
        assert_eq!(Device::from_index(2), Device::Gpu(2));
    }

    #[test]
    fn test_default_device_is_cpu() {
        assert_eq!(Device::default(), Device::Cpu);
    }

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "CPU");
        assert_eq!(Device::Gpu(1).to_string(), "GPU:1");
    }

    #[test]
    fn test_init_device() {
        assert_eq!(init_device(-1, false).unwrap(), Device::Cpu);
        assert_eq!(init_device(0, true).unwrap(), Device::Gpu(0));
        assert!(matches!(init_device(0, false), Err(Error::Device(_))));
    }
}
