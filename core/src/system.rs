//! Host system probes
//!
//! Resource numbers feed registration and heartbeat payloads. Sampling is
//! best-effort: anything the host refuses to report degrades to zero.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

/// Point-in-time host resource usage, in percent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_usage: f32,
    pub memory_usage: f32,
    pub disk_usage: f32,
}

/// OS name and version, e.g. "Ubuntu 24.04".
pub fn os_info() -> String {
    let name = System::name().unwrap_or_else(|| "unknown".to_string());
    match System::os_version() {
        Some(version) if !version.is_empty() => format!("{} {}", name, version),
        _ => name,
    }
}

/// Sample current CPU, memory and disk usage.
///
/// Blocks for a short interval so the CPU delta is meaningful; async callers
/// should wrap this in `spawn_blocking`.
pub fn resource_usage() -> ResourceUsage {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();

    let memory_usage = if sys.total_memory() > 0 {
        sys.used_memory() as f32 / sys.total_memory() as f32 * 100.0
    } else {
        0.0
    };

    let disks = Disks::new_with_refreshed_list();
    let root = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .or_else(|| disks.list().first());
    let disk_usage = match root {
        Some(disk) if disk.total_space() > 0 => {
            (disk.total_space() - disk.available_space()) as f32 / disk.total_space() as f32
                * 100.0
        }
        _ => 0.0,
    };

    ResourceUsage {
        cpu_usage,
        memory_usage,
        disk_usage,
    }
}
