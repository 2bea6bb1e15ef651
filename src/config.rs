//! Agent configuration
//!
//! Loaded once at startup from a JSON file. Every check kind carries its own
//! configuration variant so that fields only meaningful to one kind cannot be
//! silently set on another.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checks::Cadence;

/// Top-level agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Telegram bot token. Alerts go to the log when absent.
    #[serde(default)]
    pub token: Option<String>,
    /// Usernames allowed to issue bot commands
    #[serde(default)]
    pub authorized: Vec<String>,
    /// Append-only subscriber list
    #[serde(default = "default_subscribers_file")]
    pub subscribers_file: PathBuf,
    /// Prefix for every outgoing message, defaults to the machine host name
    #[serde(default)]
    pub hostname: Option<String>,
    /// Interval between ticked check batches
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Pending messages the dispatcher queue holds before producers block
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Matches a log router may hand to a rule before it blocks
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
    #[serde(default)]
    pub log_files: Vec<LogFileConfig>,
}

fn default_subscribers_file() -> PathBuf {
    PathBuf::from("subscribers")
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    100
}

fn default_handoff_capacity() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_sample_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            token: None,
            authorized: Vec::new(),
            subscribers_file: default_subscribers_file(),
            hostname: None,
            tick_interval_secs: default_tick_interval_secs(),
            queue_capacity: default_queue_capacity(),
            handoff_capacity: default_handoff_capacity(),
            api: ApiConfig::default(),
            checks: Vec::new(),
            log_files: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Read and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: MonitorConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `NODEWATCH_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("NODEWATCH_HOST") {
            self.api.host = host;
        }
        if let Some(port) = std::env::var("NODEWATCH_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.api.port = port;
        }
        if let Ok(token) = std::env::var("NODEWATCH_TOKEN") {
            if !token.is_empty() {
                self.token = Some(token);
            }
        }
    }

    /// Reject inconsistent settings and normalize rule thresholds
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.queue_capacity == 0 || self.handoff_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity and handoff_capacity must be greater than zero".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for check in &self.checks {
            match check {
                CheckConfig::Process(c) if c.process.trim().is_empty() => {
                    return Err(ConfigError::Invalid(
                        "process check needs a process name".to_string(),
                    ));
                }
                CheckConfig::DiskIo(c) if c.device_name().is_empty() => {
                    return Err(ConfigError::Invalid(
                        "disk_io check needs a device".to_string(),
                    ));
                }
                CheckConfig::Command(c) if c.program.trim().is_empty() => {
                    return Err(ConfigError::Invalid(format!(
                        "command check '{}' needs a program",
                        c.name
                    )));
                }
                _ => {}
            }
            let name = check.name();
            if !names.insert(name.clone()) {
                return Err(ConfigError::DuplicateCheck(name));
            }
        }

        for file in &mut self.log_files {
            for rule in &mut file.events {
                if rule.window.checked_mul(60).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "window of rule '{}' on {} is too large",
                        rule.pattern,
                        file.file.display()
                    )));
                }
                if rule.threshold <= 0 {
                    rule.threshold = 1;
                }
            }
        }

        Ok(())
    }
}

/// HTTP status API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

/// One monitored condition, tagged by kind
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckConfig {
    Cpu(ThresholdCheckConfig),
    Memory(ThresholdCheckConfig),
    DiskSpace(DiskSpaceCheckConfig),
    DiskIo(DiskIoCheckConfig),
    Network(ThresholdCheckConfig),
    Process(ProcessCheckConfig),
    Command(CommandCheckConfig),
}

impl CheckConfig {
    /// Registry name of the check
    pub fn name(&self) -> String {
        match self {
            CheckConfig::Cpu(c) => c.name.clone().unwrap_or_else(|| "CPU".to_string()),
            CheckConfig::Memory(c) => c.name.clone().unwrap_or_else(|| "Mem".to_string()),
            CheckConfig::DiskSpace(c) => c
                .name
                .clone()
                .unwrap_or_else(|| format!("DiskSpace {}", c.path.display())),
            CheckConfig::DiskIo(c) => c
                .name
                .clone()
                .unwrap_or_else(|| format!("{} {}", c.metric.check_name(), c.device_name())),
            CheckConfig::Network(c) => c.name.clone().unwrap_or_else(|| "NetMbs".to_string()),
            CheckConfig::Process(c) => c
                .name
                .clone()
                .unwrap_or_else(|| format!("Process {}", c.process)),
            CheckConfig::Command(c) => c.name.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            CheckConfig::Cpu(c) | CheckConfig::Memory(c) | CheckConfig::Network(c) => c.enabled,
            CheckConfig::DiskSpace(c) => c.enabled,
            CheckConfig::DiskIo(c) => c.enabled,
            CheckConfig::Process(c) => c.enabled,
            CheckConfig::Command(c) => c.enabled,
        }
    }

    /// Configured cadence, falling back to the kind's default
    pub fn cadence(&self) -> Cadence {
        let (configured, default) = match self {
            CheckConfig::Cpu(c) | CheckConfig::Memory(c) | CheckConfig::Network(c) => {
                (c.cadence, Cadence::Continuous)
            }
            CheckConfig::DiskSpace(c) => (c.cadence, Cadence::Continuous),
            CheckConfig::DiskIo(c) => (c.cadence, Cadence::Continuous),
            CheckConfig::Process(c) => (c.cadence, Cadence::Continuous),
            CheckConfig::Command(c) => (c.cadence, Cadence::Ticked),
        };
        configured.unwrap_or(default)
    }
}

/// CPU, memory and network checks: a single numeric threshold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdCheckConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub threshold: f64,
    /// Sampling period, also the pacing of a continuous worker
    #[serde(default = "default_sample_secs")]
    pub sample_secs: u64,
    #[serde(default)]
    pub cadence: Option<Cadence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskSpaceCheckConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Mount point to watch
    pub path: PathBuf,
    /// Used percentage that raises the alert
    pub threshold: f64,
    #[serde(default = "default_sample_secs")]
    pub sample_secs: u64,
    #[serde(default)]
    pub cadence: Option<Cadence>,
}

/// Per-device block I/O, sampled over `sample_secs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskIoCheckConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Block device, `sda` or `/dev/sda`
    pub device: String,
    pub metric: DiskIoMetric,
    pub threshold: f64,
    #[serde(default = "default_sample_secs")]
    pub sample_secs: u64,
    #[serde(default)]
    pub cadence: Option<Cadence>,
}

impl DiskIoCheckConfig {
    /// Device name without a `/dev/` prefix
    pub fn device_name(&self) -> &str {
        let device = self.device.trim();
        device.strip_prefix("/dev/").unwrap_or(device)
    }
}

/// What a disk I/O check compares against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskIoMetric {
    /// Reads plus writes per second
    Iops,
    /// Percentage of time the device was busy
    Util,
    /// Read plus written MB per second
    Mbps,
}

impl DiskIoMetric {
    pub fn check_name(&self) -> &'static str {
        match self {
            DiskIoMetric::Iops => "DiskIOPS",
            DiskIoMetric::Util => "DiskIOUtil",
            DiskIoMetric::Mbps => "DiskMBps",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCheckConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Substring of the executable path that must be running
    pub process: String,
    #[serde(default = "default_sample_secs")]
    pub sample_secs: u64,
    #[serde(default)]
    pub cadence: Option<Cadence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandCheckConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub condition: CommandCondition,
    #[serde(default)]
    pub cadence: Option<Cadence>,
}

/// When a command check is considered alerting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandCondition {
    /// Non-zero exit status
    ExitFailure,
    /// Output contains the pattern
    OutputContains {
        pattern: String,
        #[serde(default)]
        is_regex: bool,
    },
    /// Output does not contain the pattern
    OutputMissing {
        pattern: String,
        #[serde(default)]
        is_regex: bool,
    },
}

/// A followed log file and its rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFileConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub file: PathBuf,
    #[serde(default)]
    pub events: Vec<LogEventConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEventConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Literal substring, or a regular expression when `is_regex` is set
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub is_regex: bool,
    pub message_on: String,
    #[serde(default)]
    pub message_off: String,
    /// Matches inside the window needed to raise the alert
    #[serde(default = "default_rule_threshold")]
    pub threshold: i64,
    /// Window length in minutes, 0 fires on every match
    #[serde(default)]
    pub window: u64,
    #[serde(default)]
    pub include_raw: bool,
}

fn default_rule_threshold() -> i64 {
    1
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate check name: {0}")]
    DuplicateCheck(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
