//! Alerting core
//!
//! Check scheduling, per-check transition tracking, and fan-out of alert
//! messages to subscribers.

pub mod dispatcher;
pub mod notifier;
pub mod scheduler;
pub mod state;
pub mod subscribers;

pub use dispatcher::{AlertDispatcher, AlertQueue, DispatchReport};
pub use notifier::{LogNotifier, Notifier, NotifyError};
pub use scheduler::{RegisteredCheck, Scheduler};
pub use state::{AlertState, AlertStateTracker, StatusEntry, StatusHandle};
pub use subscribers::{StoreError, SubscriberStore};
