//! Host resource snapshot reported next to the engine inventory.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

use crate::{AppError, Result};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Capacity and utilisation of one resource.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ResourceUsage {
    /// Total capacity in GiB, one decimal.
    pub total_gb: f64,
    /// Share in use, percent with one decimal.
    pub used_percent: f64,
}

impl ResourceUsage {
    /// Usage from raw byte counts; a zero total reports 0 %.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_bytes(total: u64, used: u64) -> Self {
        let used_percent = if total == 0 {
            0.0
        } else {
            round1(used.min(total) as f64 * 100.0 / total as f64)
        };
        Self {
            total_gb: round1(total as f64 / GIB),
            used_percent,
        }
    }
}

/// CPU, memory, and disk utilisation of the host.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemHealth {
    /// Global CPU utilisation, percent.
    pub cpu_percent: f64,
    /// Physical memory.
    pub memory: ResourceUsage,
    /// Filesystem holding the sampled path, when one could be matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<ResourceUsage>,
    /// Mount point of that filesystem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_mount: Option<PathBuf>,
}

/// Sample host utilisation; the disk figure is for the filesystem of `path`.
///
/// CPU usage needs two samples, so this takes at least
/// [`MINIMUM_CPU_UPDATE_INTERVAL`]. The sampling runs on the blocking pool.
///
/// # Errors
///
/// Returns `AppError::Io` if the sampling task could not complete.
pub async fn system_health(path: &Path) -> Result<SystemHealth> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || sample(&path))
        .await
        .map_err(|err| AppError::Io(format!("system health sampling failed: {err}")))
}

fn sample(path: &Path) -> SystemHealth {
    let mut system = System::new();
    system.refresh_cpu_usage();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();
    system.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());
    if disk.is_none() {
        debug!(path = %path.display(), "no filesystem matched for disk usage");
    }

    SystemHealth {
        cpu_percent: round1(f64::from(system.global_cpu_usage())),
        memory: ResourceUsage::from_bytes(system.total_memory(), system.used_memory()),
        disk: disk.map(|d| {
            ResourceUsage::from_bytes(
                d.total_space(),
                d.total_space().saturating_sub(d.available_space()),
            )
        }),
        disk_mount: disk.map(|d| d.mount_point().to_path_buf()),
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
