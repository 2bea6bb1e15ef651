use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::System;

use super::{pace, Cadence, Check, CheckError, Evaluation};

const MB: f64 = 1024.0 * 1024.0;

pub struct MemoryCheck {
    name: String,
    cadence: Cadence,
    threshold: f64,
    period: Duration,
    system: Mutex<System>,
}

impl MemoryCheck {
    pub fn new(name: String, cadence: Cadence, threshold: f64, period: Duration) -> Self {
        Self {
            name,
            cadence,
            threshold,
            period,
            system: Mutex::new(System::new()),
        }
    }
}

/// Memory figures in bytes
#[derive(Debug, Clone, Copy)]
pub struct MemoryUsage {
    pub total: u64,
    pub available: u64,
    pub used: u64,
}

impl MemoryUsage {
    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }
}

pub fn evaluate_usage(usage: MemoryUsage, threshold: f64) -> Evaluation {
    let percent = usage.used_percent();
    let status = percent >= threshold;
    let message = if status {
        format!(
            "MEM: ALERT: Memory usage {:.2}% is too high, over {:.2}% threshold",
            percent, threshold
        )
    } else {
        format!(
            "MEM: Memory usage {:.2}% is back to normal, less than {:.2}% threshold",
            percent, threshold
        )
    };
    Evaluation::new(
        status,
        message,
        format!(
            "MEM: Memory {:.0} Mb total, {:.0} Mb available, {:.0} Mb used, {:.2}% used",
            usage.total as f64 / MB,
            usage.available as f64 / MB,
            usage.used as f64 / MB,
            percent
        ),
    )
}

#[async_trait::async_trait]
impl Check for MemoryCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    async fn evaluate(&self) -> Result<Evaluation, CheckError> {
        pace(self.period, self.cadence).await;
        let usage = {
            let mut system = self.system.lock();
            system.refresh_memory();
            MemoryUsage {
                total: system.total_memory(),
                available: system.available_memory(),
                used: system.used_memory(),
            }
        };
        Ok(evaluate_usage(usage, self.threshold))
    }
}
