//! Hands lines of one followed file to the detectors whose rules match

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::follow::{FileFollower, DEFAULT_POLL_INTERVAL};
use super::rule::LogEventRule;
use super::window::LogWindowDetector;
use crate::alerts::{AlertQueue, AlertStateTracker};
use crate::config::LogFileConfig;

struct RuleInput {
    rule: Arc<LogEventRule>,
    tx: mpsc::Sender<String>,
}

pub struct LogRouter {
    path: PathBuf,
    rules: Vec<RuleInput>,
    queue: AlertQueue,
    poll_interval: Duration,
}

impl LogRouter {
    /// Compile the rules of `config` and build one detector per rule.
    ///
    /// Disabled rules and rules whose pattern does not compile are skipped
    /// with a logged diagnostic.
    pub fn from_config(
        config: &LogFileConfig,
        handoff_capacity: usize,
        queue: AlertQueue,
        tracker: &AlertStateTracker,
    ) -> (Self, Vec<LogWindowDetector>) {
        let mut rules = Vec::new();
        let mut detectors = Vec::new();

        for (index, event) in config.events.iter().enumerate() {
            if !event.enabled {
                tracing::debug!(file = %config.file.display(), pattern = %event.pattern, "Log rule disabled");
                continue;
            }
            let rule = match LogEventRule::from_config(event) {
                Ok(rule) => Arc::new(rule),
                Err(e) => {
                    tracing::error!(file = %config.file.display(), error = %e, "Log rule disabled");
                    continue;
                }
            };

            let (tx, rx) = mpsc::channel(handoff_capacity.max(1));
            let status = tracker.register(&status_name(&rule, index, &config.file));
            detectors.push(LogWindowDetector::new(
                Arc::clone(&rule),
                rx,
                queue.clone(),
                status,
            ));
            rules.push(RuleInput { rule, tx });
        }

        let router = Self {
            path: config.file.clone(),
            rules,
            queue,
            poll_interval: DEFAULT_POLL_INTERVAL,
        };
        (router, detectors)
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Follow the file until it becomes unreadable.
    ///
    /// A file missing at startup disables this router. A read failure later
    /// on stops it and queues a single alert.
    pub async fn run(self) {
        if self.rules.is_empty() {
            tracing::warn!(path = %self.path.display(), "No usable rules, not following");
            return;
        }

        let mut follower = match FileFollower::open(&self.path).await {
            Ok(follower) => follower.with_poll_interval(self.poll_interval),
            Err(e) => {
                tracing::error!(error = %e, "Log source unavailable, router disabled");
                return;
            }
        };
        tracing::info!(
            path = %self.path.display(),
            rules = self.rules.len(),
            "Following log file"
        );

        loop {
            match follower.next_line().await {
                Ok(line) => {
                    self.route(line).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Log router stopped");
                    self.queue
                        .enqueue(format!(
                            "LOGS: ALERT: stopped following {}: {}",
                            self.path.display(),
                            e
                        ))
                        .await;
                    return;
                }
            }
        }
    }

    /// Offer `line` to every rule in registration order, waiting for each
    /// matching detector to accept it. Returns the number of rules matched.
    pub async fn route(&self, line: String) -> usize {
        let mut matched = 0;
        for input in &self.rules {
            if !input.rule.is_match(&line) {
                continue;
            }
            matched += 1;
            if input.tx.send(line.clone()).await.is_err() {
                tracing::warn!(rule = %input.rule.label(), "Detector gone, match dropped");
            }
        }
        matched
    }
}

/// Rules are numbered by position so identical patterns on one file stay apart
fn status_name(rule: &LogEventRule, index: usize, file: &Path) -> String {
    format!("{} #{} ({})", rule.label(), index + 1, file.display())
}
