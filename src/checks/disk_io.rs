use std::time::Duration;

use crate::config::DiskIoMetric;

use super::{Cadence, Check, CheckError, Evaluation};

const MB: f64 = 1024.0 * 1024.0;

/// Read/write activity of one block device, sampled over a period
pub struct DiskIoCheck {
    name: String,
    cadence: Cadence,
    device: String,
    metric: DiskIoMetric,
    threshold: f64,
    sample: Duration,
}

impl DiskIoCheck {
    pub fn new(
        name: String,
        cadence: Cadence,
        device: String,
        metric: DiskIoMetric,
        threshold: f64,
        sample: Duration,
    ) -> Self {
        Self {
            name,
            cadence,
            device,
            metric,
            threshold,
            sample: sample.max(Duration::from_secs(1)),
        }
    }
}

/// Cumulative counters of one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoCounters {
    pub reads: u64,
    pub writes: u64,
    pub read_bytes: u64,
    pub written_bytes: u64,
    /// Milliseconds spent with I/O in flight
    pub busy_ms: u64,
}

#[cfg(target_os = "linux")]
fn read_counters(device: &str) -> Result<IoCounters, CheckError> {
    // diskstats counts 512-byte sectors regardless of the device
    const SECTOR_BYTES: u64 = 512;

    let stats = procfs::diskstats().map_err(|e| CheckError::DiskStats(e.to_string()))?;
    stats
        .into_iter()
        .find(|stat| stat.name == device)
        .map(|stat| IoCounters {
            reads: stat.reads as u64,
            writes: stat.writes as u64,
            read_bytes: stat.sectors_read as u64 * SECTOR_BYTES,
            written_bytes: stat.sectors_written as u64 * SECTOR_BYTES,
            busy_ms: stat.time_in_progress as u64,
        })
        .ok_or_else(|| CheckError::DeviceNotFound(device.to_string()))
}

#[cfg(not(target_os = "linux"))]
fn read_counters(_device: &str) -> Result<IoCounters, CheckError> {
    Err(CheckError::DiskStats(
        "per-device counters are only available on Linux".to_string(),
    ))
}

/// Per-second rates between two counter samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoRates {
    pub reads_per_sec: f64,
    pub writes_per_sec: f64,
    /// MB/s
    pub read_mbps: f64,
    /// MB/s
    pub write_mbps: f64,
    /// Percentage of the period the device was busy
    pub util: f64,
}

impl IoRates {
    pub fn between(before: &IoCounters, after: &IoCounters, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let delta = |a: u64, b: u64| b.saturating_sub(a) as f64;
        Self {
            reads_per_sec: delta(before.reads, after.reads) / secs,
            writes_per_sec: delta(before.writes, after.writes) / secs,
            read_mbps: delta(before.read_bytes, after.read_bytes) / secs / MB,
            write_mbps: delta(before.written_bytes, after.written_bytes) / secs / MB,
            util: delta(before.busy_ms, after.busy_ms) / (secs * 1000.0) * 100.0,
        }
    }

    pub fn iops(&self) -> f64 {
        self.reads_per_sec + self.writes_per_sec
    }

    pub fn mbps(&self) -> f64 {
        self.read_mbps + self.write_mbps
    }
}

pub fn evaluate_iops(device: &str, rates: &IoRates, threshold: f64) -> Evaluation {
    let total = rates.iops();
    let status = total >= threshold;
    let message = if status {
        format!(
            "DISK: ALERT: Aggregate (reads + writes) {:.2} IOPS on /dev/{} are too high, over {:.2} IOPS threshold",
            total, device, threshold
        )
    } else {
        format!(
            "DISK: Aggregate (reads + writes) {:.2} IOPS on /dev/{} are back to normal, less than {:.2} IOPS threshold",
            total, device, threshold
        )
    };
    Evaluation::new(
        status,
        message,
        format!(
            "DISK: /dev/{} {:.2} IOPS reads, {:.2} IOPS writes, {:.2} IOPS total",
            device, rates.reads_per_sec, rates.writes_per_sec, total
        ),
    )
}

pub fn evaluate_util(device: &str, rates: &IoRates, threshold: f64) -> Evaluation {
    let status = rates.util >= threshold;
    let message = if status {
        format!(
            "DISK: ALERT: Disk IO utilisation {:.2}% on /dev/{} is too high, over {:.2}% threshold",
            rates.util, device, threshold
        )
    } else {
        format!(
            "DISK: Disk IO utilisation {:.2}% on /dev/{} is back to normal, less than {:.2}% threshold",
            rates.util, device, threshold
        )
    };
    Evaluation::new(
        status,
        message,
        format!("DISK: /dev/{} disk IO utilisation is {:.2}%", device, rates.util),
    )
}

pub fn evaluate_mbps(device: &str, rates: &IoRates, threshold: f64) -> Evaluation {
    let total = rates.mbps();
    let status = total >= threshold;
    let message = if status {
        format!(
            "DISK: ALERT: Aggregate (reads + writes) {:.2} Mb/s on /dev/{} is too high, over {:.2} Mb/s threshold",
            total, device, threshold
        )
    } else {
        format!(
            "DISK: Aggregate (reads + writes) {:.2} Mb/s on /dev/{} is back to normal, less than {:.2} Mb/s threshold",
            total, device, threshold
        )
    };
    Evaluation::new(
        status,
        message,
        format!(
            "DISK: /dev/{} {:.2} Mb/s reads, {:.2} Mb/s writes, {:.2} Mb/s total",
            device, rates.read_mbps, rates.write_mbps, total
        ),
    )
}

pub fn evaluate_io(
    metric: DiskIoMetric,
    device: &str,
    rates: &IoRates,
    threshold: f64,
) -> Evaluation {
    match metric {
        DiskIoMetric::Iops => evaluate_iops(device, rates, threshold),
        DiskIoMetric::Util => evaluate_util(device, rates, threshold),
        DiskIoMetric::Mbps => evaluate_mbps(device, rates, threshold),
    }
}

#[async_trait::async_trait]
impl Check for DiskIoCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    async fn evaluate(&self) -> Result<Evaluation, CheckError> {
        let before = read_counters(&self.device)?;
        tokio::time::sleep(self.sample).await;
        let after = read_counters(&self.device)?;

        let rates = IoRates::between(&before, &after, self.sample);
        Ok(evaluate_io(self.metric, &self.device, &rates, self.threshold))
    }
}
