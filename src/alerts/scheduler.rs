//! Drives checks of both cadences.
//!
//! Continuous checks each get a permanent worker. Ticked checks run as one
//! concurrent batch per tick, and the next tick is not processed until the
//! whole batch has finished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};

use super::state::AlertStateTracker;
use crate::checks::{Cadence, Check, Evaluation};

/// A check as owned by the scheduler
pub struct RegisteredCheck {
    check: Arc<dyn Check>,
    cadence: Cadence,
    enabled: AtomicBool,
}

impl RegisteredCheck {
    pub fn name(&self) -> &str {
        self.check.name()
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }
}

/// Check scheduler
pub struct Scheduler {
    checks: Vec<Arc<RegisteredCheck>>,
    tracker: Arc<AlertStateTracker>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(tracker: Arc<AlertStateTracker>, tick: Duration) -> Self {
        Self {
            checks: Vec::new(),
            tracker,
            tick,
        }
    }

    /// Add a check. Its alert state is created immediately so status queries
    /// list it before the first evaluation.
    pub fn register(&mut self, check: Arc<dyn Check>, cadence: Cadence) {
        self.tracker.register(check.name());
        self.checks.push(Arc::new(RegisteredCheck {
            check,
            cadence,
            enabled: AtomicBool::new(true),
        }));
    }

    pub fn checks(&self) -> &[Arc<RegisteredCheck>] {
        &self.checks
    }

    /// Spawn continuous workers, then process ticks forever
    pub async fn run(self) {
        let workers = self.spawn_continuous();
        tracing::info!(
            continuous = workers.len(),
            ticked = self.ticked().count(),
            tick = ?self.tick,
            "Scheduler started"
        );

        // First batch right away so status is available without waiting
        self.run_batch().await;

        let mut ticker = time::interval_at(time::Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_batch().await;
        }
    }

    /// Start one permanent worker per enabled continuous check
    pub fn spawn_continuous(&self) -> Vec<JoinHandle<()>> {
        self.checks
            .iter()
            .filter(|c| c.cadence == Cadence::Continuous && c.is_enabled())
            .map(|entry| {
                let entry = Arc::clone(entry);
                let tracker = Arc::clone(&self.tracker);
                tokio::spawn(continuous_worker(entry, tracker))
            })
            .collect()
    }

    /// Evaluate every enabled ticked check concurrently and wait for all of them
    pub async fn run_batch(&self) -> usize {
        let mut batch = JoinSet::new();
        for entry in self.ticked().filter(|c| c.is_enabled()) {
            let entry = Arc::clone(entry);
            let tracker = Arc::clone(&self.tracker);
            batch.spawn(async move { evaluate_once(&entry, &tracker).await });
        }

        let spawned = batch.len();
        while let Some(result) = batch.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Ticked check task panicked");
            }
        }
        tracing::debug!(checks = spawned, "Ticked batch finished");
        spawned
    }

    fn ticked(&self) -> impl Iterator<Item = &Arc<RegisteredCheck>> {
        self.checks.iter().filter(|c| c.cadence == Cadence::Ticked)
    }
}

/// Evaluate and report once. Returns `false` once the check has failed and
/// been disabled.
async fn evaluate_once(entry: &RegisteredCheck, tracker: &AlertStateTracker) -> bool {
    let name = entry.name();
    match entry.check.evaluate().await {
        Ok(evaluation) => {
            tracker.report(name, evaluation).await;
            true
        }
        Err(e) => {
            tracing::error!(check = %name, error = %e, "Check failed, disabling it");
            entry.disable();
            tracker
                .report_failure(name, Evaluation::failed(name, &e))
                .await;
            false
        }
    }
}

async fn continuous_worker(entry: Arc<RegisteredCheck>, tracker: Arc<AlertStateTracker>) {
    tracing::info!(check = %entry.name(), "Continuous worker started");
    while evaluate_once(&entry, &tracker).await {
        tokio::task::yield_now().await;
    }
    tracing::warn!(check = %entry.name(), "Continuous worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::dispatcher::AlertDispatcher;
    use crate::alerts::notifier::testing::RecordingNotifier;
    use crate::alerts::subscribers::SubscriberStore;
    use crate::checks::CheckError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Replays scripted statuses, then fails
    struct ScriptedCheck {
        name: String,
        cadence: Cadence,
        script: Mutex<VecDeque<bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedCheck {
        fn new(name: &str, cadence: Cadence, script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                cadence,
                script: Mutex::new(script.iter().copied().collect()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl Check for ScriptedCheck {
        fn name(&self) -> &str {
            &self.name
        }

        fn cadence(&self) -> Cadence {
            self.cadence
        }

        async fn evaluate(&self) -> Result<Evaluation, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().pop_front();
            match next {
                Some(status) => {
                    let text = format!("{}: {}", self.name, if status { "on" } else { "off" });
                    Ok(Evaluation::new(status, text.clone(), text))
                }
                None => Err(CheckError::MountNotFound("/gone".to_string())),
            }
        }
    }

    /// Tracks how many evaluations overlap
    struct SlowCheck {
        name: String,
        running: AtomicUsize,
        max_running: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Check for SlowCheck {
        fn name(&self) -> &str {
            &self.name
        }

        fn cadence(&self) -> Cadence {
            Cadence::Ticked
        }

        async fn evaluate(&self) -> Result<Evaluation, CheckError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            // three ticks long
            time::sleep(Duration::from_secs(180)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(Evaluation::new(false, "", "slow: ok"))
        }
    }

    fn setup(tick: Duration) -> (Scheduler, Arc<AlertStateTracker>, AlertDispatcher) {
        let store = Arc::new(SubscriberStore::in_memory());
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, dispatcher) = AlertDispatcher::new(100, store, notifier);
        let tracker = Arc::new(AlertStateTracker::new(queue));
        (Scheduler::new(Arc::clone(&tracker), tick), tracker, dispatcher)
    }

    fn drain(dispatcher: &mut AlertDispatcher) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(message) = dispatcher.rx_mut().try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_continuous_worker_fail_stops() {
        let (mut scheduler, tracker, mut dispatcher) = setup(Duration::from_secs(60));
        let check = ScriptedCheck::new("Proc", Cadence::Continuous, &[false, true, true, false]);
        scheduler.register(check.clone(), Cadence::Continuous);

        for handle in scheduler.spawn_continuous() {
            handle.await.unwrap();
        }

        // four scripted runs plus the failing one, never restarted
        assert_eq!(check.calls.load(Ordering::SeqCst), 5);
        assert!(!scheduler.checks()[0].is_enabled());

        let messages = drain(&mut dispatcher);
        assert_eq!(
            messages,
            vec![
                "Proc: on".to_string(),
                "Proc: off".to_string(),
                "Proc: ALERT: cannot evaluate: No disk mounted at /gone".to_string(),
            ]
        );
        let status = &tracker.statuses()[0];
        assert!(status.alerting);
        assert!(status.message.contains("cannot evaluate"));
    }

    #[tokio::test]
    async fn test_failure_while_alerting_still_notifies() {
        let (mut scheduler, tracker, mut dispatcher) = setup(Duration::from_secs(60));
        let check = ScriptedCheck::new("Disk", Cadence::Continuous, &[true]);
        scheduler.register(check.clone(), Cadence::Continuous);

        for handle in scheduler.spawn_continuous() {
            handle.await.unwrap();
        }

        let messages = drain(&mut dispatcher);
        assert_eq!(
            messages,
            vec![
                "Disk: on".to_string(),
                "Disk: ALERT: cannot evaluate: No disk mounted at /gone".to_string(),
            ]
        );
        let status = &tracker.statuses()[0];
        assert!(status.alerting);
        assert!(status.message.contains("cannot evaluate"));
        assert!(!scheduler.checks()[0].is_enabled());
    }

    #[tokio::test]
    async fn test_failed_ticked_check_is_skipped_afterwards() {
        let (mut scheduler, _tracker, mut dispatcher) = setup(Duration::from_secs(60));
        let ok = ScriptedCheck::new("Sync", Cadence::Ticked, &[true, true, true]);
        let broken = ScriptedCheck::new("IsNext", Cadence::Ticked, &[]);
        scheduler.register(ok.clone(), Cadence::Ticked);
        scheduler.register(broken.clone(), Cadence::Ticked);

        assert_eq!(scheduler.run_batch().await, 2);
        assert_eq!(scheduler.run_batch().await, 1);
        assert_eq!(scheduler.run_batch().await, 1);

        assert_eq!(ok.calls.load(Ordering::SeqCst), 3);
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);

        let mut messages = drain(&mut dispatcher);
        messages.sort();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("IsNext: ALERT: cannot evaluate"));
        assert_eq!(messages[1], "Sync: on");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticked_batches_never_overlap() {
        let (mut scheduler, _tracker, _dispatcher) = setup(Duration::from_secs(60));
        let slow = Arc::new(SlowCheck {
            name: "Slow".to_string(),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        scheduler.register(slow.clone(), Cadence::Ticked);

        let handle = tokio::spawn(scheduler.run());
        // Long enough for several ticks worth of wall time
        time::sleep(Duration::from_secs(600)).await;
        handle.abort();

        assert_eq!(slow.max_running.load(Ordering::SeqCst), 1);
        // startup batch at 0s, then one batch per 180s evaluation
        let calls = slow.calls.load(Ordering::SeqCst);
        assert!((3..=4).contains(&calls), "calls = {}", calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_batch_runs_immediately() {
        let (mut scheduler, tracker, _dispatcher) = setup(Duration::from_secs(60));
        let check = ScriptedCheck::new("Sync", Cadence::Ticked, &[true, false]);
        scheduler.register(check.clone(), Cadence::Ticked);

        let handle = tokio::spawn(scheduler.run());
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
        assert!(tracker.statuses()[0].alerting);

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(check.calls.load(Ordering::SeqCst), 2);
        handle.abort();
    }
}
