//! Disk usage sampling for report bodies.

use std::path::{Path, PathBuf};

use sysinfo::Disks;

use crate::error::{Error, Result};

/// Usage of the filesystem holding a path.
#[derive(Debug, Clone, PartialEq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    /// `used_bytes / total_bytes`, `0.0` for an empty filesystem.
    pub used_ratio: f64,
    pub filesystem_label: String,
}

impl DiskUsage {
    /// Build from totals; `used` is everything not available.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_totals(total: u64, free: u64, available: u64, label: impl Into<String>) -> Self {
        let used = total.saturating_sub(available);
        let used_ratio = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64
        };
        Self {
            total_bytes: total,
            used_bytes: used,
            free_bytes: free,
            available_bytes: available,
            used_ratio,
            filesystem_label: label.into(),
        }
    }

    /// Used share in whole percent, rounded down.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn used_percent(&self) -> u64 {
        (self.used_ratio * 100.0).floor() as u64
    }
}

/// Capability that reports disk usage for a path.
pub trait DiskSampler: Send + Sync + 'static {
    /// Sample the filesystem holding `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if no filesystem could be matched.
    fn sample(&self, path: &Path) -> Result<DiskUsage>;
}

/// Samples mounted disks through `sysinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysinfoSampler;

impl DiskSampler for SysinfoSampler {
    fn sample(&self, path: &Path) -> Result<DiskUsage> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path));
        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| Error::Notify(format!("no filesystem found for {}", path.display())))?;

        let label = format!(
            "{} ({})",
            disk.mount_point().display(),
            disk.file_system().to_string_lossy()
        );
        Ok(DiskUsage::from_totals(
            disk.total_space(),
            disk.available_space(),
            disk.available_space(),
            label,
        ))
    }
}

/// A sampler returning fixed figures.
#[derive(Debug, Clone)]
pub struct StaticSampler(pub DiskUsage);

impl DiskSampler for StaticSampler {
    fn sample(&self, _path: &Path) -> Result<DiskUsage> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_from_totals() {
        let usage = DiskUsage::from_totals(1000, 300, 250, "/");
        assert_eq!(usage.used_bytes, 750);
        assert_eq!(usage.used_percent(), 75);
        assert!((usage.used_ratio - 0.75).abs() < f64::EPSILON);

        let empty = DiskUsage::from_totals(0, 0, 0, "none");
        assert_eq!(empty.used_percent(), 0);
    }
}
