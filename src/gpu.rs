//! GPU and driver probing via NVML
//!
//! The communication path under test is the one GPU workloads use, so the
//! check reports whether the NVIDIA runtime is actually usable on this
//! node. Probing never aborts the process: when NVML cannot be loaded the
//! report says so and the caller decides whether that is fatal.

use nvml_wrapper::Nvml;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Snapshot of the local GPU environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuReport {
    /// NVML loaded and at least one device enumerated
    pub available: bool,

    /// NVIDIA driver version (e.g. "550.54.14")
    pub driver_version: Option<String>,

    /// CUDA driver version (e.g. "12.4")
    pub cuda_version: Option<String>,

    /// Number of devices visible to the driver
    pub device_count: u32,

    /// Per-device details
    pub devices: Vec<GpuDevice>,

    /// Why the probe came up empty, when it did
    pub error: Option<String>,
}

/// One enumerated GPU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
}

impl GpuReport {
    fn unavailable(reason: String) -> Self {
        Self {
            available: false,
            driver_version: None,
            cuda_version: None,
            device_count: 0,
            devices: Vec::new(),
            error: Some(reason),
        }
    }

    /// Report for a run where GPU probing was turned off
    pub fn skipped() -> Self {
        Self::unavailable("GPU probing disabled in configuration".to_string())
    }
}

/// Probe the local GPU environment.
pub fn probe() -> GpuReport {
    let nvml = match Nvml::init() {
        Ok(nvml) => nvml,
        Err(e) => {
            debug!(error = %e, "NVML init failed");
            return GpuReport::unavailable(format!("NVML not available: {}", e));
        }
    };

    let driver_version = nvml.sys_driver_version().ok();
    let cuda_version = nvml.sys_cuda_driver_version().ok().map(|v| {
        format!(
            "{}.{}",
            nvml_wrapper::cuda_driver_version_major(v),
            nvml_wrapper::cuda_driver_version_minor(v)
        )
    });

    let device_count = match nvml.device_count() {
        Ok(count) => count,
        Err(e) => {
            return GpuReport::unavailable(format!("failed to enumerate devices: {}", e));
        }
    };

    let mut devices = Vec::with_capacity(device_count as usize);
    for index in 0..device_count {
        if let Ok(device) = nvml.device_by_index(index) {
            let name = device.name().unwrap_or_else(|_| format!("GPU {}", index));
            let (total, used) = device
                .memory_info()
                .map(|m| (m.total / (1024 * 1024), m.used / (1024 * 1024)))
                .unwrap_or((0, 0));
            devices.push(GpuDevice {
                index,
                name,
                memory_total_mb: total,
                memory_used_mb: used,
            });
        }
    }

    GpuReport {
        available: device_count > 0,
        driver_version,
        cuda_version,
        device_count,
        devices,
        error: if device_count == 0 {
            Some("driver loaded but no devices enumerated".to_string())
        } else {
            None
        },
    }
}

/// Probe, returning an error when a usable GPU is required but absent.
pub fn probe_required() -> Result<GpuReport> {
    let report = probe();
    if report.available {
        Ok(report)
    } else {
        Err(Error::GpuUnavailable {
            message: report
                .error
                .clone()
                .unwrap_or_else(|| "no GPU detected".to_string()),
        })
    }
}
