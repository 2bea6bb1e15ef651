use std::time::Duration;

use parking_lot::Mutex;
use sysinfo::Networks;

use super::{Cadence, Check, CheckError, Evaluation};

const MB: f64 = 1024.0 * 1024.0;

/// Aggregate traffic over all interfaces, in MB/s
pub struct NetworkCheck {
    name: String,
    cadence: Cadence,
    threshold: f64,
    sample: Duration,
    networks: Mutex<Networks>,
}

impl NetworkCheck {
    pub fn new(name: String, cadence: Cadence, threshold: f64, sample: Duration) -> Self {
        Self {
            name,
            cadence,
            threshold,
            sample: sample.max(Duration::from_secs(1)),
            networks: Mutex::new(Networks::new_with_refreshed_list()),
        }
    }

    /// Total (sent, received) bytes across interfaces
    fn totals(&self) -> (u64, u64) {
        let mut networks = self.networks.lock();
        networks.refresh();
        networks.iter().fold((0, 0), |(sent, recv), (_, data)| {
            (
                sent + data.total_transmitted(),
                recv + data.total_received(),
            )
        })
    }
}

/// Traffic rates in MB/s
#[derive(Debug, Clone, Copy)]
pub struct Throughput {
    pub sent: f64,
    pub received: f64,
}

impl Throughput {
    pub fn from_deltas(sent_bytes: u64, received_bytes: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        Self {
            sent: sent_bytes as f64 / secs / MB,
            received: received_bytes as f64 / secs / MB,
        }
    }

    pub fn total(&self) -> f64 {
        self.sent + self.received
    }
}

pub fn evaluate_throughput(rate: Throughput, threshold: f64) -> Evaluation {
    let total = rate.total();
    let status = total >= threshold;
    let message = if status {
        format!(
            "NET: ALERT: Aggregate network (all interfaces) {:.2} Mb/s is too high, over {:.2} Mb/s threshold",
            total, threshold
        )
    } else {
        format!(
            "NET: Aggregate network (all interfaces) {:.2} Mb/s is back to normal, less than {:.2} Mb/s threshold",
            total, threshold
        )
    };
    Evaluation::new(
        status,
        message,
        format!(
            "NET: Network {:.2} Mb/s outgoing traffic, {:.2} Mb/s incoming traffic, {:.2} Mb/s total",
            rate.sent, rate.received, total
        ),
    )
}

#[async_trait::async_trait]
impl Check for NetworkCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn cadence(&self) -> Cadence {
        self.cadence
    }

    async fn evaluate(&self) -> Result<Evaluation, CheckError> {
        let (sent_before, recv_before) = self.totals();
        tokio::time::sleep(self.sample).await;
        let (sent_after, recv_after) = self.totals();

        let rate = Throughput::from_deltas(
            sent_after.saturating_sub(sent_before),
            recv_after.saturating_sub(recv_before),
            self.sample,
        );
        Ok(evaluate_throughput(rate, self.threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throughput_from_deltas() {
        let rate = Throughput::from_deltas(
            10 * 1024 * 1024,
            40 * 1024 * 1024,
            Duration::from_secs(5),
        );
        assert!((rate.sent - 2.0).abs() < 1e-9);
        assert!((rate.received - 8.0).abs() < 1e-9);
        assert!((rate.total() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_throughput() {
        let rate = Throughput {
            sent: 2.0,
            received: 8.0,
        };
        assert!(evaluate_throughput(rate, 10.0).status);
        assert!(!evaluate_throughput(rate, 10.5).status);
    }
}
