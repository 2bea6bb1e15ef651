//! Per-check alert state and transition detection

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::dispatcher::AlertQueue;
use crate::checks::Evaluation;

/// Last known state of one check or log rule
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    /// Whether the alert is currently raised
    pub last_status: bool,
    /// Latest status line
    pub status_message: String,
    /// When `last_status` last flipped
    pub changed_at: Option<DateTime<Utc>>,
    /// Last update timestamp
    pub updated_at: Option<DateTime<Utc>>,
}

impl AlertState {
    /// Store a new status, returning whether it differs from the previous one
    pub fn record(&mut self, status: bool, status_message: String) -> bool {
        let now = Utc::now();
        let changed = status != self.last_status;
        if changed {
            self.changed_at = Some(now);
        }
        self.last_status = status;
        self.status_message = status_message;
        self.updated_at = Some(now);
        changed
    }
}

/// Shared handle to one [`AlertState`]
pub type StatusHandle = Arc<Mutex<AlertState>>;

/// Point-in-time view of one state, for status queries
#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub name: String,
    pub alerting: bool,
    pub message: String,
    pub changed_at: Option<DateTime<Utc>>,
}

/// Decides which evaluations turn into notifications
pub struct AlertStateTracker {
    states: RwLock<HashMap<String, StatusHandle>>,
    queue: AlertQueue,
}

impl AlertStateTracker {
    pub fn new(queue: AlertQueue) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            queue,
        }
    }

    /// Create the state for `name`, or return the existing one
    pub fn register(&self, name: &str) -> StatusHandle {
        if let Some(handle) = self.states.read().get(name) {
            return Arc::clone(handle);
        }
        let mut states = self.states.write();
        Arc::clone(states.entry(name.to_string()).or_default())
    }

    /// Record an evaluation and queue its message if the status flipped.
    ///
    /// The compare-and-set happens under the check's lock; the lock is
    /// released before queueing, which may wait on a full queue.
    pub async fn report(&self, name: &str, evaluation: Evaluation) -> bool {
        let handle = self.register(name);
        let changed = handle
            .lock()
            .record(evaluation.status, evaluation.status_message);

        if changed {
            tracing::info!(
                check = %name,
                alerting = evaluation.status,
                "Status changed"
            );
            if !evaluation.message.is_empty() {
                self.queue.enqueue(evaluation.message).await;
            }
        }
        changed
    }

    /// Record a check that can no longer evaluate and always queue its notice.
    ///
    /// The check is disabled afterwards, so the notice is sent even when the
    /// state was already alerting and no later evaluation would report it.
    pub async fn report_failure(&self, name: &str, evaluation: Evaluation) {
        let handle = self.register(name);
        handle
            .lock()
            .record(evaluation.status, evaluation.status_message);

        tracing::info!(check = %name, "Check stopped, sending final notice");
        if !evaluation.message.is_empty() {
            self.queue.enqueue(evaluation.message).await;
        }
    }

    /// Current state of every registered check, sorted by name
    pub fn statuses(&self) -> Vec<StatusEntry> {
        let mut entries: Vec<StatusEntry> = self
            .states
            .read()
            .iter()
            .map(|(name, handle)| {
                let state = handle.lock();
                StatusEntry {
                    name: name.clone(),
                    alerting: state.last_status,
                    message: state.status_message.clone(),
                    changed_at: state.changed_at,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::dispatcher::AlertDispatcher;
    use crate::alerts::notifier::testing::RecordingNotifier;
    use crate::alerts::subscribers::SubscriberStore;
    use crate::checks::cpu::evaluate_load;

    fn tracker() -> (AlertStateTracker, AlertDispatcher) {
        let store = Arc::new(SubscriberStore::in_memory());
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, dispatcher) = AlertDispatcher::new(100, store, notifier);
        (AlertStateTracker::new(queue), dispatcher)
    }

    fn drain(dispatcher: &mut AlertDispatcher) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(message) = dispatcher.rx_mut().try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_cpu_sequence_emits_on_transitions_only() {
        let (tracker, mut dispatcher) = tracker();

        let mut emitted_at = Vec::new();
        for (i, load) in [70.0, 85.0, 90.0, 60.0].into_iter().enumerate() {
            if tracker.report("CPU", evaluate_load(load, 80.0)).await {
                emitted_at.push(i);
            }
        }

        assert_eq!(emitted_at, vec![1, 3]);
        let messages = drain(&mut dispatcher);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("CPU: ALERT: CPU load 85.00%"));
        assert!(messages[1].contains("60.00% is back to normal"));
    }

    #[tokio::test]
    async fn test_alerting_at_startup_emits_once() {
        let (tracker, mut dispatcher) = tracker();
        for _ in 0..3 {
            tracker.report("CPU", evaluate_load(95.0, 80.0)).await;
        }
        assert_eq!(drain(&mut dispatcher).len(), 1);
    }

    #[tokio::test]
    async fn test_emissions_equal_status_changes() {
        let (tracker, mut dispatcher) = tracker();
        let sequence = [false, true, true, false, false, true, false, true, true];

        let mut previous = false;
        let mut changes = 0;
        for status in sequence {
            if status != previous {
                changes += 1;
            }
            previous = status;
            let text = if status { "on" } else { "off" };
            tracker
                .report("Sync", Evaluation::new(status, text, text))
                .await;
        }

        let messages = drain(&mut dispatcher);
        assert_eq!(messages.len(), changes);
        // strictly alternating
        for pair in messages.windows(2) {
            assert_ne!(pair[0], pair[1]);
        }
    }

    #[tokio::test]
    async fn test_failure_notice_sent_while_alerting() {
        let (tracker, mut dispatcher) = tracker();
        tracker.report("CPU", evaluate_load(95.0, 80.0)).await;

        let err = crate::checks::CheckError::DeviceNotFound("sda".to_string());
        tracker
            .report_failure("CPU", Evaluation::failed("CPU", &err))
            .await;

        let messages = drain(&mut dispatcher);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[1],
            "CPU: ALERT: cannot evaluate: No block device named sda"
        );
        let status = &tracker.statuses()[0];
        assert!(status.alerting);
        assert!(status.message.contains("cannot evaluate"));
    }

    #[tokio::test]
    async fn test_statuses_reflect_latest_evaluation() {
        let (tracker, _dispatcher) = tracker();
        tracker.register("Mem");
        tracker.report("CPU", evaluate_load(10.0, 80.0)).await;

        let statuses = tracker.statuses();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "CPU");
        assert_eq!(statuses[0].message, "CPU: Current CPU load (all CPUs) is 10.00%");
        assert!(!statuses[0].alerting);
        assert_eq!(statuses[1].name, "Mem");
        assert!(statuses[1].message.is_empty());
    }
}
