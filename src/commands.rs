//! User commands: subscribing to alerts and querying current status

use std::collections::HashSet;
use std::sync::Arc;

use crate::alerts::{AlertStateTracker, StoreError, SubscriberStore};

pub const REPLY_SUBSCRIBED: &str = "Subscribed to updates!";
pub const REPLY_ALREADY_SUBSCRIBED: &str = "Already subscribed.";
pub const REPLY_NOT_AUTHORIZED: &str = "Not authorized.";
pub const REPLY_SUBSCRIBE_FAILED: &str = "Subscription failed, please try again later.";

/// Who issued a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Recipient id that alerts will be delivered to
    pub id: String,
    /// Name checked against the authorized list
    pub username: Option<String>,
}

impl Caller {
    pub fn new(id: impl Into<String>, username: Option<&str>) -> Self {
        Self {
            id: id.into(),
            username: username.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
}

impl SubscribeOutcome {
    pub fn reply(&self) -> &'static str {
        match self {
            SubscribeOutcome::Subscribed => REPLY_SUBSCRIBED,
            SubscribeOutcome::AlreadySubscribed => REPLY_ALREADY_SUBSCRIBED,
        }
    }
}

/// Handles subscribe and status requests from chat users
pub struct CommandService {
    authorized: HashSet<String>,
    store: Arc<SubscriberStore>,
    tracker: Arc<AlertStateTracker>,
    hostname: String,
}

impl CommandService {
    pub fn new(
        authorized: impl IntoIterator<Item = String>,
        store: Arc<SubscriberStore>,
        tracker: Arc<AlertStateTracker>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            authorized: authorized.into_iter().collect(),
            store,
            tracker,
            hostname: hostname.into(),
        }
    }

    fn authorize(&self, caller: &Caller) -> Result<(), CommandError> {
        match &caller.username {
            Some(name) if self.authorized.contains(name) => Ok(()),
            other => {
                let username = other.clone().unwrap_or_default();
                tracing::info!(user = %username, id = %caller.id, "Unauthorized command");
                Err(CommandError::NotAuthorized { username })
            }
        }
    }

    /// Add the caller to the subscriber list
    pub async fn subscribe(&self, caller: &Caller) -> Result<SubscribeOutcome, CommandError> {
        self.authorize(caller)?;

        if self.store.add(&caller.id).await? {
            tracing::info!(id = %caller.id, subscribers = self.store.len(), "New subscriber");
            Ok(SubscribeOutcome::Subscribed)
        } else {
            tracing::debug!(id = %caller.id, "Already subscribed");
            Ok(SubscribeOutcome::AlreadySubscribed)
        }
    }

    /// Current status line of every tracked check and log rule, each
    /// prefixed with the host name. Entries that never reported are skipped.
    pub fn status(&self, caller: &Caller) -> Result<Vec<String>, CommandError> {
        self.authorize(caller)?;

        Ok(self
            .tracker
            .statuses()
            .into_iter()
            .filter(|entry| !entry.message.is_empty())
            .map(|entry| format!("{}: {}", self.hostname, entry.message))
            .collect())
    }

    /// Reply text for a subscribe attempt
    pub async fn subscribe_reply(&self, caller: &Caller) -> String {
        match self.subscribe(caller).await {
            Ok(outcome) => outcome.reply().to_string(),
            Err(CommandError::NotAuthorized { .. }) => REPLY_NOT_AUTHORIZED.to_string(),
            Err(e) => {
                tracing::error!(id = %caller.id, error = %e, "Failed to persist subscriber");
                REPLY_SUBSCRIBE_FAILED.to_string()
            }
        }
    }

    /// Reply texts for a status request
    pub fn status_replies(&self, caller: &Caller) -> Vec<String> {
        match self.status(caller) {
            Ok(lines) => lines,
            Err(_) => vec![REPLY_NOT_AUTHORIZED.to_string()],
        }
    }
}

/// Command errors
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("User '{username}' is not authorized")]
    NotAuthorized { username: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
