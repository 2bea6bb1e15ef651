use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::System;

use super::{Cadence, Check, CheckError, Evaluation};

/// Average load across all CPUs over the sampling period
pub struct CpuCheck {
    name: String,
    cadence: Cadence,
    threshold: f64,
    sample: Duration,
    system: Mutex<System>,
}

impl CpuCheck {
    pub fn new(name: String, cadence: Cadence, threshold: f64, sample: Duration) -> Self {
        Self {
            name,
            cadence,
            threshold,
            sample: sample.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
            system: Mutex::new(System::new()),
        }
    }
}

/// Compare a load percentage against the threshold
pub fn evaluate_load(load: f64, threshold: f64) -> Evaluation {
    let status = load >= threshold;
    let message = if status {
        format!(
            "CPU: ALERT: CPU load {:.2}% is too high, over {:.2}% threshold",
            load, threshold
        )
    } else {
        format!(
            "CPU: CPU load {:.2}% is back to normal, less than {:.2}% threshold",
            load, threshold
        )
    };
    Evaluation::new(
        status,
        message,
        format!("CPU: Current CPU load (all CPUs) is {:.2}%", load),
    )
}

#[async_trait::async_trait]
impl Check for CpuCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    async fn evaluate(&self) -> Result<Evaluation, CheckError> {
        self.system.lock().refresh_cpu_all();
        tokio::time::sleep(self.sample).await;
        let load = {
            let mut system = self.system.lock();
            system.refresh_cpu_all();
            system.global_cpu_usage() as f64
        };
        Ok(evaluate_load(load, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(evaluate_load(80.0, 80.0).status);
        assert!(!evaluate_load(79.99, 80.0).status);
    }

    #[test]
    fn test_messages() {
        let eval = evaluate_load(85.0, 80.0);
        assert_eq!(
            eval.message,
            "CPU: ALERT: CPU load 85.00% is too high, over 80.00% threshold"
        );
        assert_eq!(eval.status_message, "CPU: Current CPU load (all CPUs) is 85.00%");

        let eval = evaluate_load(60.0, 80.0);
        assert!(eval.message.contains("back to normal"));
    }
}
