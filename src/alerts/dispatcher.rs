//! Fan-out of alert messages to subscribers.
//!
//! Producers push plain text into a bounded [`AlertQueue`]; a single
//! [`AlertDispatcher`] drains it in FIFO order and delivers every message to
//! the subscribers present when the message is dequeued.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;

use super::notifier::Notifier;
use super::subscribers::SubscriberStore;

/// Producer side of the dispatch queue
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<String>,
}

impl AlertQueue {
    /// Queue `message`, waiting while the queue is full
    pub async fn enqueue(&self, message: String) {
        if self.tx.send(message).await.is_err() {
            tracing::error!("Alert dispatcher is gone, message dropped");
        }
    }
}

/// Outcome of delivering one message
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Single consumer of the dispatch queue
pub struct AlertDispatcher {
    rx: mpsc::Receiver<String>,
    store: Arc<SubscriberStore>,
    notifier: Arc<dyn Notifier>,
    prefix: Option<String>,
}

impl AlertDispatcher {
    /// Create a dispatcher and the queue feeding it
    pub fn new(
        capacity: usize,
        store: Arc<SubscriberStore>,
        notifier: Arc<dyn Notifier>,
    ) -> (AlertQueue, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            AlertQueue { tx },
            Self {
                rx,
                store,
                notifier,
                prefix: None,
            },
        )
    }

    /// Prefix every delivered message with `"{host}: "`
    pub fn with_hostname(mut self, host: impl Into<String>) -> Self {
        self.prefix = Some(host.into());
        self
    }

    #[cfg(test)]
    pub(crate) fn rx_mut(&mut self) -> &mut mpsc::Receiver<String> {
        &mut self.rx
    }

    /// Drain the queue until every producer is dropped
    pub async fn run(mut self) {
        tracing::info!(
            channel = self.notifier.channel_name(),
            "Alert dispatcher started"
        );
        while let Some(message) = self.rx.recv().await {
            self.dispatch(&message).await;
        }
        tracing::info!("Alert dispatcher stopped");
    }

    /// Deliver one message to a snapshot of the current subscribers
    pub async fn dispatch(&self, message: &str) -> DispatchReport {
        let recipients = self.store.snapshot();
        let text = match &self.prefix {
            Some(host) => format!("{}: {}", host, message),
            None => message.to_string(),
        };

        tracing::info!(subscribers = recipients.len(), "{}", text);
        if recipients.is_empty() {
            return DispatchReport::default();
        }

        let sends = recipients.iter().map(|recipient| {
            let notifier = Arc::clone(&self.notifier);
            let text = text.as_str();
            async move {
                match notifier.send(recipient, text).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(
                            recipient = %recipient,
                            channel = notifier.channel_name(),
                            error = %e,
                            "Notification delivery failed"
                        );
                        false
                    }
                }
            }
        });

        let results = join_all(sends).await;
        let delivered = results.iter().filter(|ok| **ok).count();
        DispatchReport {
            delivered,
            failed: results.len() - delivered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::testing::RecordingNotifier;
    use crate::alerts::notifier::NotifyError;
    use tokio_test::{assert_pending, assert_ready};

    async fn store_with(ids: &[&str]) -> Arc<SubscriberStore> {
        let store = Arc::new(SubscriberStore::in_memory());
        for id in ids {
            store.add(id).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_subscriber() {
        let store = store_with(&["A", "B"]).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let (_queue, dispatcher) = AlertDispatcher::new(10, store, notifier.clone());
        let dispatcher = dispatcher.with_hostname("node-1");

        let report = dispatcher.dispatch("CPU: ALERT: high").await;
        assert_eq!(report, DispatchReport { delivered: 2, failed: 0 });
        assert_eq!(notifier.received_by("A"), vec!["node-1: CPU: ALERT: high"]);
        assert_eq!(notifier.received_by("B"), vec!["node-1: CPU: ALERT: high"]);
    }

    #[tokio::test]
    async fn test_failed_recipient_does_not_block_others() {
        let store = store_with(&["A", "B", "C"]).await;
        let notifier = Arc::new(RecordingNotifier::default());
        notifier.fail_for("B");
        let (_queue, dispatcher) = AlertDispatcher::new(10, store, notifier.clone());

        let report = dispatcher.dispatch("first").await;
        assert_eq!(report, DispatchReport { delivered: 2, failed: 1 });
        assert_eq!(notifier.received_by("A"), vec!["first"]);
        assert_eq!(notifier.received_by("C"), vec!["first"]);

        // later messages still go out
        let report = dispatcher.dispatch("second").await;
        assert_eq!(report.delivered, 2);
    }

    /// Subscribes a newcomer the first time anything is sent
    struct SubscribingNotifier {
        inner: RecordingNotifier,
        store: Arc<SubscriberStore>,
    }

    #[async_trait::async_trait]
    impl Notifier for SubscribingNotifier {
        async fn send(&self, recipient: &str, text: &str) -> Result<(), NotifyError> {
            self.store.add("C").await.unwrap();
            self.inner.send(recipient, text).await
        }

        fn channel_name(&self) -> &str {
            "subscribing"
        }
    }

    #[tokio::test]
    async fn test_snapshot_taken_at_dequeue() {
        let store = store_with(&["A", "B"]).await;
        let notifier = Arc::new(SubscribingNotifier {
            inner: RecordingNotifier::default(),
            store: Arc::clone(&store),
        });
        let (queue, dispatcher) = AlertDispatcher::new(10, Arc::clone(&store), notifier.clone());

        queue.enqueue("one".to_string()).await;
        queue.enqueue("two".to_string()).await;
        drop(queue);
        dispatcher.run().await;

        assert_eq!(notifier.inner.received_by("A"), vec!["one", "two"]);
        assert_eq!(notifier.inner.received_by("B"), vec!["one", "two"]);
        // joined while "one" was being sent
        assert_eq!(notifier.inner.received_by("C"), vec!["two"]);
    }

    #[tokio::test]
    async fn test_enqueue_blocks_when_full() {
        let store = Arc::new(SubscriberStore::in_memory());
        let notifier = Arc::new(RecordingNotifier::default());
        let (queue, mut dispatcher) = AlertDispatcher::new(1, store, notifier);

        queue.enqueue("fills the queue".to_string()).await;

        let mut blocked = tokio_test::task::spawn(queue.enqueue("waits".to_string()));
        assert_pending!(blocked.poll());

        assert_eq!(dispatcher.rx.recv().await.as_deref(), Some("fills the queue"));
        assert!(blocked.is_woken());
        assert_ready!(blocked.poll());
        assert_eq!(dispatcher.rx.recv().await.as_deref(), Some("waits"));
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let store = Arc::new(SubscriberStore::in_memory());
        let notifier = Arc::new(RecordingNotifier::default());
        let (_queue, dispatcher) = AlertDispatcher::new(4, store, notifier.clone());

        assert_eq!(dispatcher.dispatch("nobody").await, DispatchReport::default());
        assert!(notifier.sent.lock().is_empty());
    }
}
