use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::Disks;

use super::{pace, Cadence, Check, CheckError, Evaluation};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Used space on the filesystem holding `path`
pub struct DiskSpaceCheck {
    name: String,
    cadence: Cadence,
    path: PathBuf,
    threshold: f64,
    period: Duration,
    disks: Mutex<Disks>,
}

impl DiskSpaceCheck {
    pub fn new(
        name: String,
        cadence: Cadence,
        path: PathBuf,
        threshold: f64,
        period: Duration,
    ) -> Self {
        Self {
            name,
            cadence,
            path,
            threshold,
            period,
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }
}

/// Space figures for one mount point, in bytes
#[derive(Debug, Clone)]
pub struct MountUsage {
    pub mount_point: PathBuf,
    pub total: u64,
    pub available: u64,
}

impl MountUsage {
    pub fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used() as f64 / self.total as f64 * 100.0
        }
    }
}

/// Pick the mount with the longest mount point containing `path`
pub fn find_mount<'a>(mounts: &'a [MountUsage], path: &Path) -> Option<&'a MountUsage> {
    mounts
        .iter()
        .filter(|m| path.starts_with(&m.mount_point))
        .max_by_key(|m| m.mount_point.as_os_str().len())
}

pub fn evaluate_mount(usage: &MountUsage, path: &Path, threshold: f64) -> Evaluation {
    let percent = usage.used_percent();
    let status = percent >= threshold;
    let message = if status {
        format!(
            "DISK: ALERT: Running low on free disk space, disk space usage is {:.2}% at {}",
            percent,
            path.display()
        )
    } else {
        format!(
            "DISK: Disk space usage {:.2}% at {} is back to normal",
            percent,
            path.display()
        )
    };
    Evaluation::new(
        status,
        message,
        format!(
            "DISK: Disk space at {} {:.2} Gb total, {:.2} Gb free, {:.2} Gb used ({:.2}% used)",
            path.display(),
            usage.total as f64 / GB,
            usage.available as f64 / GB,
            usage.used() as f64 / GB,
            percent
        ),
    )
}

#[async_trait::async_trait]
impl Check for DiskSpaceCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    async fn evaluate(&self) -> Result<Evaluation, CheckError> {
        pace(self.period, self.cadence).await;
        let mounts: Vec<MountUsage> = {
            let mut disks = self.disks.lock();
            disks.refresh();
            disks
                .iter()
                .map(|d| MountUsage {
                    mount_point: d.mount_point().to_path_buf(),
                    total: d.total_space(),
                    available: d.available_space(),
                })
                .collect()
        };

        let usage = find_mount(&mounts, &self.path)
            .ok_or_else(|| CheckError::MountNotFound(self.path.display().to_string()))?;
        Ok(evaluate_mount(usage, &self.path, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mount(point: &str, total: u64, available: u64) -> MountUsage {
        MountUsage {
            mount_point: PathBuf::from(point),
            total,
            available,
        }
    }

    #[test]
    fn test_find_mount_prefers_longest_prefix() {
        let mounts = vec![mount("/", 100, 50), mount("/var", 100, 10)];
        let found = find_mount(&mounts, Path::new("/var/lib/node")).unwrap();
        assert_eq!(found.mount_point, PathBuf::from("/var"));

        let found = find_mount(&mounts, Path::new("/home")).unwrap();
        assert_eq!(found.mount_point, PathBuf::from("/"));
    }

    #[test]
    fn test_find_mount_respects_path_components() {
        let mounts = vec![mount("/data", 100, 50)];
        assert!(find_mount(&mounts, Path::new("/database")).is_none());
    }

    #[test]
    fn test_evaluate_mount() {
        let usage = mount("/", 100 * GB as u64, 5 * GB as u64);
        let eval = evaluate_mount(&usage, Path::new("/"), 90.0);
        assert!(eval.status);
        assert_eq!(
            eval.message,
            "DISK: ALERT: Running low on free disk space, disk space usage is 95.00% at /"
        );
    }
}
