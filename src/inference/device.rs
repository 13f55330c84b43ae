use anyhow::{anyhow, Result};
use candle::{DType, Device};
use tracing::{info, warn};

const MAX_PROBED_CUDA_DEVICES: usize = 16;

/// Device the generator runs on, plus what was discovered while picking it.
#[derive(Debug, Clone)]
pub struct ExecutionDevice {
    pub device: Device,
    pub cuda_available: bool,
    pub cuda_devices: usize,
}

impl ExecutionDevice {
    /// Pick a device from an optional preference (`cpu`, `cuda`, `cuda:N`).
    pub fn select(preference: Option<&str>) -> Result<Self> {
        let (cuda_available, cuda_devices) = probe_cuda();

        let device = match preference.map(str::trim).filter(|s| !s.is_empty()) {
            Some(pref) => parse_device_preference(pref)?,
            None => auto_device(),
        };

        info!(device = descriptor(&device), "execution device selected");
        if cuda_available {
            info!(cuda_devices, "CUDA devices detected");
        }

        Ok(Self {
            device,
            cuda_available,
            cuda_devices,
        })
    }

    #[cfg(test)]
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            cuda_available: false,
            cuda_devices: 0,
        }
    }

    /// CPU device that still reports what the CUDA probe found.
    pub fn cpu_fallback() -> Self {
        let (cuda_available, cuda_devices) = probe_cuda();
        Self {
            device: Device::Cpu,
            cuda_available,
            cuda_devices,
        }
    }

    pub fn descriptor(&self) -> &'static str {
        descriptor(&self.device)
    }
}

/// Weight dtype for a device. CPU kernels are only fast in F32.
pub fn dtype_for(device: &Device) -> DType {
    if device.is_cuda() {
        DType::BF16
    } else {
        DType::F32
    }
}

pub fn descriptor(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else {
        "cpu"
    }
}

fn parse_device_preference(value: &str) -> Result<Device> {
    let lower = value.to_ascii_lowercase();
    if lower == "cpu" {
        Ok(Device::Cpu)
    } else if lower.starts_with("cuda") || lower.starts_with("gpu") {
        let ordinal = value
            .split(':')
            .nth(1)
            .and_then(|part| part.parse::<usize>().ok())
            .unwrap_or(0);
        Device::new_cuda(ordinal).map_err(|err| {
            anyhow!(
                "requested CUDA device {} but initialization failed: {err}",
                ordinal
            )
        })
    } else {
        warn!("unrecognized MODEL_DEVICE value '{}', defaulting to auto", value);
        Ok(auto_device())
    }
}

fn auto_device() -> Device {
    Device::cuda_if_available(0).unwrap_or(Device::Cpu)
}

fn probe_cuda() -> (bool, usize) {
    if candle::utils::cuda_is_available() {
        (true, cuda_device_count())
    } else {
        (false, 0)
    }
}

fn cuda_device_count() -> usize {
    (0..MAX_PROBED_CUDA_DEVICES)
        .take_while(|&ordinal| Device::new_cuda(ordinal).is_ok())
        .count()
}
