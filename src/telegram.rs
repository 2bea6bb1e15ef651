//! Telegram Bot API transport
//!
//! [`TelegramNotifier`] delivers alert text through `sendMessage`;
//! [`BotPoller`] long-polls `getUpdates` and answers `/subscribe` and
//! `/status`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::alerts::{Notifier, NotifyError};
use crate::commands::{Caller, CommandService};

const API_BASE: &str = "https://api.telegram.org";

/// Server-side long-poll timeout for `getUpdates`
pub const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before polling again after an error
pub const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

fn method_url(token: &str, method: &str) -> String {
    format!("{}/bot{}/{}", API_BASE, token, method)
}

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
}

impl<T> ApiResponse<T> {
    /// Turn a failed response into a [`NotifyError`]
    pub fn into_result(self, status: reqwest::StatusCode) -> Result<Option<T>, NotifyError> {
        if self.ok {
            return Ok(self.result);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = self
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(30);
            return Err(NotifyError::RateLimited { retry_after_secs });
        }
        Err(NotifyError::Api(
            self.description
                .unwrap_or_else(|| "Unknown Telegram API error".to_string()),
        ))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<Option<T>, NotifyError> {
    let status = response.status();
    let body: ApiResponse<T> = response.json().await?;
    body.into_result(status)
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Commands the bot understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Subscribe,
    Status,
}

impl BotCommand {
    /// Parse the leading command of a message, accepting the
    /// `/command@botname` form
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let command = word.strip_prefix('/')?;
        let command = command.split('@').next().unwrap_or(command);
        match command {
            "subscribe" => Some(BotCommand::Subscribe),
            "status" => Some(BotCommand::Status),
            _ => None,
        }
    }
}

/// Sends alert text through the Bot API
pub struct TelegramNotifier {
    token: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(token: impl Into<String>) -> Result<Self, NotifyError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(NotifyError::Api(
                "Telegram bot token must not be empty".to_string(),
            ));
        }
        Ok(Self {
            token,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), NotifyError> {
        let body = serde_json::json!({
            "chat_id": recipient,
            "text": text,
        });

        tracing::debug!(chat_id = %recipient, "Sending Telegram message");
        let response = self
            .client
            .post(method_url(&self.token, "sendMessage"))
            .json(&body)
            .send()
            .await?;
        decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}

/// Long-polls for bot commands and answers them
pub struct BotPoller {
    token: String,
    client: reqwest::Client,
    offset: i64,
    commands: Arc<CommandService>,
    replies: Arc<dyn Notifier>,
}

impl BotPoller {
    pub fn new(
        token: impl Into<String>,
        commands: Arc<CommandService>,
        replies: Arc<dyn Notifier>,
    ) -> Result<Self, NotifyError> {
        // the HTTP timeout has to outlast the server-side long poll
        let client = reqwest::Client::builder()
            .timeout(LONG_POLL_TIMEOUT + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            token: token.into(),
            client,
            offset: 0,
            commands,
            replies,
        })
    }

    /// Poll forever; errors are logged and retried after a delay
    pub async fn run(mut self) {
        tracing::info!("Bot command poller started");
        loop {
            match self.poll_once().await {
                Ok(handled) if handled > 0 => {
                    tracing::debug!(updates = handled, "Handled bot updates");
                }
                Ok(_) => {}
                Err(NotifyError::RateLimited { retry_after_secs }) => {
                    tracing::warn!(retry_after_secs, "getUpdates rate limited");
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "getUpdates failed");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                }
            }
        }
    }

    async fn poll_once(&mut self) -> Result<usize, NotifyError> {
        let response = self
            .client
            .get(method_url(&self.token, "getUpdates"))
            .query(&[
                ("offset", self.offset.to_string()),
                ("timeout", LONG_POLL_TIMEOUT.as_secs().to_string()),
            ])
            .send()
            .await?;
        let updates: Vec<Update> = decode(response).await?.unwrap_or_default();

        for update in &updates {
            self.offset = self.offset.max(update.update_id + 1);
            if let Some(message) = &update.message {
                self.handle_message(message).await;
            }
        }
        Ok(updates.len())
    }

    async fn handle_message(&self, message: &Message) {
        let chat = message.chat.id.to_string();
        for reply in respond(&self.commands, message).await {
            if let Err(e) = self.replies.send(&chat, &reply).await {
                tracing::warn!(chat_id = %chat, error = %e, "Failed to send reply");
            }
        }
    }
}

/// Replies for one incoming message; empty when it is not a command
pub async fn respond(commands: &CommandService, message: &Message) -> Vec<String> {
    let Some(command) = message.text.as_deref().and_then(BotCommand::parse) else {
        return Vec::new();
    };
    let Some(user) = &message.from else {
        return Vec::new();
    };
    let caller = Caller::new(user.id.to_string(), user.username.as_deref());
    tracing::info!(user = ?user.username, id = user.id, command = ?command, "Bot command");

    match command {
        BotCommand::Subscribe => vec![commands.subscribe_reply(&caller).await],
        BotCommand::Status => commands.status_replies(&caller),
    }
}
