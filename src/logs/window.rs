//! Sliding-window threshold detection for one log rule

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::rule::LogEventRule;
use crate::alerts::{AlertQueue, StatusHandle};

/// Window maintenance interval
pub const MAINTENANCE_TICK: Duration = Duration::from_secs(1);

/// A matched line
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub raw: String,
    pub matched_at: Instant,
}

/// Matches inside the window and the last emitted state
#[derive(Debug, Default)]
pub struct RuleWindowState {
    events: VecDeque<LogRecord>,
    last_emitted_on: bool,
    total_matches: u64,
}

impl RuleWindowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records older than `now - window`
    pub fn prune(&mut self, window: Duration, now: Instant) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while self
            .events
            .front()
            .map_or(false, |record| record.matched_at < cutoff)
        {
            self.events.pop_front();
        }
    }

    /// Handle a matched line, returning the message to send if any
    pub fn on_match(&mut self, rule: &LogEventRule, raw: String, now: Instant) -> Option<String> {
        self.total_matches += 1;

        // No window: every match fires on its own
        if !rule.is_windowed() {
            return Some(rule.on_text(&raw));
        }

        self.prune(rule.window, now);
        let text = rule.on_text(&raw);
        self.events.push_back(LogRecord {
            raw,
            matched_at: now,
        });

        if self.threshold_reached(rule) && !self.last_emitted_on {
            self.last_emitted_on = true;
            Some(text)
        } else {
            None
        }
    }

    /// Periodic maintenance; emits the off message once the window has aged
    /// below the threshold
    pub fn on_tick(&mut self, rule: &LogEventRule, now: Instant) -> Option<String> {
        if !rule.is_windowed() {
            return None;
        }
        self.prune(rule.window, now);
        if self.last_emitted_on && !self.threshold_reached(rule) {
            self.last_emitted_on = false;
            Some(rule.off_text())
        } else {
            None
        }
    }

    fn threshold_reached(&self, rule: &LogEventRule) -> bool {
        self.events.len() >= rule.threshold
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_on(&self) -> bool {
        self.last_emitted_on
    }

    /// Status line for status queries
    pub fn describe(&self, rule: &LogEventRule) -> String {
        if rule.is_windowed() {
            format!(
                "{}: {} matches in the last {} min, threshold {}{}",
                rule.label(),
                self.events.len(),
                rule.window.as_secs() / 60,
                rule.threshold,
                if self.last_emitted_on { ", ALERT" } else { "" }
            )
        } else {
            format!("{}: {} matches since start", rule.label(), self.total_matches)
        }
    }
}

/// Task owning one rule's window state
pub struct LogWindowDetector {
    rule: Arc<LogEventRule>,
    state: RuleWindowState,
    rx: mpsc::Receiver<String>,
    queue: AlertQueue,
    status: StatusHandle,
    tick: Duration,
}

impl LogWindowDetector {
    pub fn new(
        rule: Arc<LogEventRule>,
        rx: mpsc::Receiver<String>,
        queue: AlertQueue,
        status: StatusHandle,
    ) -> Self {
        let state = RuleWindowState::new();
        status.lock().record(false, state.describe(&rule));
        Self {
            rule,
            state,
            rx,
            queue,
            status,
            tick: MAINTENANCE_TICK,
        }
    }

    /// Consume matches and maintenance ticks until the router goes away
    pub async fn run(mut self) {
        let windowed = self.rule.is_windowed();
        let mut ticker = time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let message = tokio::select! {
                _ = ticker.tick(), if windowed => {
                    self.state.on_tick(&self.rule, Instant::now())
                }
                line = self.rx.recv() => match line {
                    Some(raw) => self.state.on_match(&self.rule, raw, Instant::now()),
                    None => break,
                },
            };

            self.status
                .lock()
                .record(self.state.is_on(), self.state.describe(&self.rule));

            if let Some(message) = message {
                tracing::info!(rule = %self.rule.label(), "{}", message);
                self.queue.enqueue(message).await;
            }
        }

        self.status.lock().record(
            self.state.is_on(),
            format!("{}: log source unavailable", self.rule.label()),
        );
        tracing::warn!(rule = %self.rule.label(), "Log rule detector stopped");
    }
}
