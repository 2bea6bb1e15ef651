//! Monitored conditions
//!
//! A [`Check`] evaluates one condition and reports whether it is alerting,
//! together with the transition text and a current status line. The registry
//! is assembled once from configuration by [`build_checks`].

pub mod command;
pub mod cpu;
pub mod disk;
pub mod disk_io;
pub mod memory;
pub mod network;
pub mod process;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CheckConfig;

pub use command::CommandCheck;
pub use cpu::CpuCheck;
pub use disk::DiskSpaceCheck;
pub use disk_io::DiskIoCheck;
pub use memory::MemoryCheck;
pub use network::NetworkCheck;
pub use process::ProcessCheck;

/// How the scheduler drives a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Re-evaluated back-to-back by a dedicated worker
    Continuous,
    /// Evaluated once per scheduler tick
    Ticked,
}

/// Result of a single evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// `true` when the alerting condition is present
    pub status: bool,
    /// Sent to subscribers when `status` differs from the previous one
    pub message: String,
    /// Current state, served to status queries
    pub status_message: String,
}

impl Evaluation {
    pub fn new(status: bool, message: impl Into<String>, status_message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            status_message: status_message.into(),
        }
    }

    /// Degraded result reported once when a check can no longer evaluate
    pub fn failed(name: &str, error: &CheckError) -> Self {
        let text = format!("{}: ALERT: cannot evaluate: {}", name, error);
        Self {
            status: true,
            message: text.clone(),
            status_message: text,
        }
    }
}

/// A monitored condition
#[async_trait::async_trait]
pub trait Check: Send + Sync {
    /// Unique name used for state tracking and logging
    fn name(&self) -> &str;

    fn cadence(&self) -> Cadence;

    /// Evaluate the condition. Continuous checks may take their whole
    /// sampling period to return.
    async fn evaluate(&self) -> Result<Evaluation, CheckError>;
}

/// Check evaluation errors
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("No disk mounted at {0}")]
    MountNotFound(String),

    #[error("No block device named {0}")]
    DeviceNotFound(String),

    #[error("Cannot read disk statistics: {0}")]
    DiskStats(String),

    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} did not finish within {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Sampling task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Build the check registry from configuration.
///
/// Disabled entries are skipped. Construction errors are returned rather than
/// logged so that a broken configuration stops the agent at startup.
pub fn build_checks(configs: &[CheckConfig]) -> Result<Vec<Arc<dyn Check>>, CheckError> {
    let mut checks: Vec<Arc<dyn Check>> = Vec::with_capacity(configs.len());

    for config in configs.iter().filter(|c| c.enabled()) {
        let name = config.name();
        let cadence = config.cadence();
        let check: Arc<dyn Check> = match config {
            CheckConfig::Cpu(c) => Arc::new(CpuCheck::new(
                name,
                cadence,
                c.threshold,
                Duration::from_secs(c.sample_secs),
            )),
            CheckConfig::Memory(c) => Arc::new(MemoryCheck::new(
                name,
                cadence,
                c.threshold,
                Duration::from_secs(c.sample_secs),
            )),
            CheckConfig::DiskSpace(c) => Arc::new(DiskSpaceCheck::new(
                name,
                cadence,
                c.path.clone(),
                c.threshold,
                Duration::from_secs(c.sample_secs),
            )),
            CheckConfig::DiskIo(c) => Arc::new(DiskIoCheck::new(
                name,
                cadence,
                c.device_name().to_string(),
                c.metric,
                c.threshold,
                Duration::from_secs(c.sample_secs),
            )),
            CheckConfig::Network(c) => Arc::new(NetworkCheck::new(
                name,
                cadence,
                c.threshold,
                Duration::from_secs(c.sample_secs),
            )),
            CheckConfig::Process(c) => Arc::new(ProcessCheck::new(
                name,
                cadence,
                c.process.clone(),
                Duration::from_secs(c.sample_secs),
            )),
            CheckConfig::Command(c) => Arc::new(CommandCheck::from_config(c, cadence)?),
        };
        checks.push(check);
    }

    Ok(checks)
}

/// Pause used by continuous checks whose reading is instantaneous
pub(crate) async fn pace(period: Duration, cadence: Cadence) {
    if cadence == Cadence::Continuous && !period.is_zero() {
        tokio::time::sleep(period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CommandCheckConfig, CommandCondition, DiskIoCheckConfig, DiskIoMetric,
        ThresholdCheckConfig,
    };

    #[test]
    fn test_failed_evaluation_is_alerting() {
        let err = CheckError::MountNotFound("/data".to_string());
        let eval = Evaluation::failed("DiskSpace /data", &err);
        assert!(eval.status);
        assert_eq!(
            eval.message,
            "DiskSpace /data: ALERT: cannot evaluate: No disk mounted at /data"
        );
        assert_eq!(eval.message, eval.status_message);
    }

    #[test]
    fn test_build_checks_skips_disabled() {
        let configs = vec![
            CheckConfig::Memory(ThresholdCheckConfig {
                name: None,
                enabled: false,
                threshold: 90.0,
                sample_secs: 5,
                cadence: None,
            }),
            CheckConfig::Command(CommandCheckConfig {
                name: "Sync".to_string(),
                enabled: true,
                program: "true".to_string(),
                args: Vec::new(),
                working_dir: None,
                timeout_secs: 5,
                condition: CommandCondition::ExitFailure,
                cadence: None,
            }),
        ];

        let checks = build_checks(&configs).unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].name(), "Sync");
        assert_eq!(checks[0].cadence(), Cadence::Ticked);
    }

    #[test]
    fn test_build_checks_rejects_bad_regex() {
        let configs = vec![CheckConfig::Command(CommandCheckConfig {
            name: "Sync".to_string(),
            enabled: true,
            program: "true".to_string(),
            args: Vec::new(),
            working_dir: None,
            timeout_secs: 5,
            condition: CommandCondition::OutputContains {
                pattern: "(".to_string(),
                is_regex: true,
            },
            cadence: None,
        })];

        assert!(matches!(build_checks(&configs), Err(CheckError::Pattern(_))));
    }

    #[test]
    fn test_build_disk_io_check_names_device() {
        let configs = vec![CheckConfig::DiskIo(DiskIoCheckConfig {
            name: None,
            enabled: true,
            device: "/dev/sda".to_string(),
            metric: DiskIoMetric::Util,
            threshold: 90.0,
            sample_secs: 5,
            cadence: None,
        })];

        let checks = build_checks(&configs).unwrap();
        assert_eq!(checks[0].name(), "DiskIOUtil sda");
        assert_eq!(checks[0].cadence(), Cadence::Continuous);
    }
}
