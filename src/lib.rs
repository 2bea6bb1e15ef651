//! Nodewatch: host monitoring agent with chat alerts
//!
//! Watches system metrics, external tool output and log files, and notifies
//! subscribed chat users when a condition starts or stops.
//!
//! # Features
//!
//! - **Checks**: CPU, memory, disk space, disk I/O, network throughput,
//!   running processes and arbitrary commands
//! - **Transition alerts**: one message per state change, never repeats
//! - **Log rules**: literal or regex matches counted over a sliding window
//! - **Telegram bot**: `/subscribe` and `/status` commands
//! - **Status API**: JSON over HTTP for dashboards and probes
//!
//! # Example
//!
//! ```no_run
//! use nodewatch::config::MonitorConfig;
//! use nodewatch::engine::{resolve_hostname, Engine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MonitorConfig::load("conf.json")?;
//! let hostname = resolve_hostname(&config);
//! Engine::build(config, hostname).await?.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod api;
pub mod checks;
pub mod commands;
pub mod config;
pub mod engine;
pub mod logs;
pub mod pattern;
pub mod telegram;

// Re-export commonly used types
pub use checks::{Cadence, Check, CheckError, Evaluation};
pub use config::MonitorConfig;
pub use engine::Engine;
