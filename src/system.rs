//! Host information for the environment check report

use serde::{Deserialize, Serialize};

/// System information collected at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Hostname
    pub hostname: String,

    /// Number of CPU cores
    pub cpu_count: usize,

    /// Total system memory (MB)
    pub total_memory_mb: u64,

    /// Operating system name
    pub os_name: String,

    /// OS version / distribution
    pub os_version: String,

    /// CPU architecture
    pub arch: String,
}

impl SystemInfo {
    /// Collect system information
    pub fn collect() -> Self {
        Self {
            hostname: get_hostname(),
            cpu_count: num_cpus::get(),
            total_memory_mb: get_total_memory_mb(),
            os_name: std::env::consts::OS.to_string(),
            os_version: get_os_version(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Get the local hostname
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Get total system memory in MB from /proc/meminfo
fn get_total_memory_mb() -> u64 {
    if let Ok(content) = std::fs::read_to_string("/proc/meminfo") {
        for line in content.lines() {
            if line.starts_with("MemTotal:") {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 2 {
                    if let Ok(kb) = parts[1].parse::<u64>() {
                        return kb / 1024;
                    }
                }
            }
        }
    }
    0
}

/// Get OS version string from /etc/os-release
fn get_os_version() -> String {
    if let Ok(content) = std::fs::read_to_string("/etc/os-release") {
        for line in content.lines() {
            if let Some(value) = line.strip_prefix("PRETTY_NAME=") {
                return value.trim_matches('"').to_string();
            }
        }
    }
    "unknown".to_string()
}
