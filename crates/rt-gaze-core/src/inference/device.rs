//! Device selection for training and inference.

use candle_core::Device;
use tracing::{info, warn};

/// Returns the best available device.
///
/// Uses GPU 0 (Metal on macOS, CUDA elsewhere) when the matching feature is
/// enabled and the device opens, falling back to CPU.
#[must_use]
pub fn get_device() -> Device {
    select_device(&[0])
}

/// Picks a device from a list of requested GPU ordinals.
///
/// Only the first ordinal is used; candle runs a model on a single device.
/// An empty list selects the CPU.
#[must_use]
pub fn select_device(gpus: &[usize]) -> Device {
    let Some(&ordinal) = gpus.first() else {
        info!("Using CPU");
        return Device::Cpu;
    };
    if gpus.len() > 1 {
        warn!("Multiple GPUs requested ({gpus:?}); using ordinal {ordinal} only");
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(ordinal) {
            info!("Using Metal device {ordinal}");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(ordinal) {
            info!("Using CUDA device {ordinal}");
            return device;
        }
    }

    info!("GPU {ordinal} unavailable, using CPU");
    Device::Cpu
}
