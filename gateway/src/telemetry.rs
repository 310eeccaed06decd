//! System telemetry collection

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// System properties reported by the gateway and sampled by health checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemProperties {
    /// CPU model string
    pub cpu_model: String,

    /// Number of CPU cores
    pub cpu_cores: usize,

    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,

    /// Operating system name
    pub os_name: String,

    /// Total memory in KiB
    pub total_memory_kb: u64,

    /// Free memory in KiB
    pub free_memory_kb: u64,

    /// Hostname
    pub hostname: String,
}

/// Source of system properties.
///
/// Health aggregation reads through this trait so tests can substitute a
/// fixed probe.
pub trait SystemProbe: Send + Sync {
    fn collect(&self) -> SystemProperties;
}

/// Probe backed by sysinfo
#[derive(Debug, Default)]
pub struct SysinfoProbe;

impl SystemProbe for SysinfoProbe {
    fn collect(&self) -> SystemProperties {
        let mut sys = System::new_all();
        sys.refresh_all();

        let cpu_model = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().to_string())
            .unwrap_or_else(|| "unknown".to_string());

        SystemProperties {
            cpu_model,
            cpu_cores: sys.cpus().len(),
            cpu_usage: sys.global_cpu_usage(),
            os_name: System::name().unwrap_or_else(|| "unknown".to_string()),
            total_memory_kb: sys.total_memory() / 1024,
            free_memory_kb: sys.free_memory() / 1024,
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        }
    }
}
