//! Telegram Bot API client
//!
//! Inbound messages come from a `getUpdates` long-poll loop running on its
//! own task; outbound calls are plain HTTPS requests. Chats observed in
//! updates are kept in a bounded most-recent-first list, which backs the
//! recent-conversation scan used by delivery.
//!
//! API reference: https://core.telegram.org/bots/api

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{
    Conversation, DestinationId, MessagingClient, PeerHandle, PlatformError, PlatformResult,
    RawEvent,
};
use crate::error::{Error, Result};

/// Public Bot API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// How many observed chats are remembered for the recent scan
pub const RECENT_CAPACITY: usize = 50;

/// Descriptions that mean the target does not exist or is not visible
const NOT_FOUND_MARKERS: &[&str] = &[
    "chat not found",
    "user not found",
    "peer_id_invalid",
    "chat_id is empty",
    "username_not_occupied",
];

/// Configuration for the Bot API client
#[derive(Debug, Clone)]
pub struct BotApiConfig {
    pub bot_token: String,
    /// Base URL (default: https://api.telegram.org)
    pub api_base_url: String,
    /// Long-poll timeout passed to getUpdates
    pub poll_timeout_secs: u64,
    /// Timeout for ordinary requests
    pub request_timeout_secs: u64,
    /// First retry delay after a failed poll
    pub reconnect_delay_ms: u64,
    /// Upper bound for the retry delay
    pub max_reconnect_delay_ms: u64,
}

impl Default for BotApiConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            poll_timeout_secs: 30,
            request_timeout_secs: 10,
            reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 60_000,
        }
    }
}

/// Envelope every Bot API method returns
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> PlatformResult<T> {
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(PlatformError::Transport(
                "response without result".to_string(),
            )),
            (false, _) => Err(api_error(
                self.error_code,
                self.description.as_deref().unwrap_or("unknown error"),
            )),
        }
    }
}

/// Map an API error description onto the platform error classes
fn api_error(code: Option<i64>, description: &str) -> PlatformError {
    let lowered = description.to_lowercase();
    let text = match code {
        Some(code) => format!("{} (error {})", description, code),
        None => description.to_string(),
    };

    if NOT_FOUND_MARKERS.iter().any(|m| lowered.contains(m)) {
        PlatformError::NotFound(text)
    } else {
        PlatformError::Rejected(text)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub channel_post: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub sender_chat: Option<Chat>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub forward_origin: Option<MessageOrigin>,
    // Pre-7.0 forward fields, still sent by some deployments
    #[serde(default)]
    pub forward_from: Option<User>,
    #[serde(default)]
    pub forward_from_chat: Option<Chat>,
    #[serde(default)]
    pub forward_date: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl Chat {
    /// Human-readable name for logs and the recent list
    pub fn display_name(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        if let Some(username) = &self.username {
            return format!("@{}", username);
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => self.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Where a forwarded message originally came from
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageOrigin {
    User { sender_user: User },
    HiddenUser { sender_user_name: String },
    Chat { sender_chat: Chat },
    Channel { chat: Chat },
}

impl MessageOrigin {
    pub fn sender_id(&self) -> Option<i64> {
        match self {
            MessageOrigin::User { sender_user } => Some(sender_user.id),
            MessageOrigin::HiddenUser { .. } => None,
            MessageOrigin::Chat { sender_chat } => Some(sender_chat.id),
            MessageOrigin::Channel { chat } => Some(chat.id),
        }
    }
}

impl Message {
    /// Convert to a relay event. Messages without text or caption yield `None`.
    pub fn to_raw_event(&self) -> Option<RawEvent> {
        let text = self.text.as_ref().or(self.caption.as_ref())?.clone();

        let sender_id = self
            .from
            .as_ref()
            .map(|u| u.id)
            .or_else(|| self.sender_chat.as_ref().map(|c| c.id))
            .unwrap_or(self.chat.id);

        let is_forwarded = self.forward_origin.is_some() || self.forward_date.is_some();
        let forward_origin_sender_id = match &self.forward_origin {
            Some(origin) => origin.sender_id(),
            None => self
                .forward_from
                .as_ref()
                .map(|u| u.id)
                .or_else(|| self.forward_from_chat.as_ref().map(|c| c.id)),
        };

        Some(RawEvent {
            message_id: self.message_id,
            text,
            source_conversation_id: self.chat.id,
            sender_id,
            timestamp: DateTime::<Utc>::from_timestamp(self.date, 0).unwrap_or_else(Utc::now),
            is_forwarded,
            forward_origin_sender_id,
        })
    }
}

/// Bot API client
pub struct BotApiClient {
    config: BotApiConfig,
    http: reqwest::Client,
    recent: Mutex<VecDeque<Conversation>>,
    shutdown: broadcast::Sender<()>,
}

impl BotApiClient {
    /// Create a new client. No request is made until used.
    pub fn new(config: BotApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        let (shutdown, _) = broadcast::channel(1);

        Ok(Self {
            config,
            http,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAPACITY)),
            shutdown,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> PlatformResult<T> {
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            // The URL carries the token
            .map_err(|e| PlatformError::Transport(e.without_url().to_string()))?;

        // Error responses carry a JSON body too, so the status is not checked
        let parsed: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| PlatformError::Transport(e.without_url().to_string()))?;
        parsed.into_result()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    /// Identity of the bot, used by the health command and startup log
    pub async fn get_me(&self) -> PlatformResult<User> {
        self.call("getMe", json!({}), self.request_timeout()).await
    }

    async fn get_updates(&self, offset: Option<i64>) -> PlatformResult<Vec<Update>> {
        let mut body = json!({
            "timeout": self.config.poll_timeout_secs,
            "allowed_updates": ["message", "channel_post"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        // The server holds the request for up to the poll timeout
        let timeout =
            Duration::from_secs(self.config.poll_timeout_secs + self.config.request_timeout_secs);
        self.call("getUpdates", body, timeout).await
    }

    /// Move a chat to the front of the recent list
    fn remember(&self, chat: &Chat) {
        let mut recent = self.recent.lock();
        recent.retain(|c| c.id != chat.id);
        recent.push_front(Conversation {
            id: chat.id,
            title: chat.display_name(),
            handle: PeerHandle {
                chat_id: chat.id,
                title: chat.title.clone(),
            },
        });
        recent.truncate(RECENT_CAPACITY);
    }

    /// Record the update's chat and turn it into an event
    pub fn ingest(&self, update: &Update) -> Option<RawEvent> {
        let message = update.message.as_ref().or(update.channel_post.as_ref())?;
        self.remember(&message.chat);
        message.to_raw_event()
    }

    fn reconnect_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.reconnect_delay_ms),
            max_interval: Duration::from_millis(self.config.max_reconnect_delay_ms),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Start the long-poll loop, pushing events into `event_tx`
    pub fn spawn_poller(self: &Arc<Self>, event_tx: mpsc::Sender<RawEvent>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            info!("Starting update poller...");
            let mut offset: Option<i64> = None;
            let mut backoff = client.reconnect_backoff();

            loop {
                let polled = tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Update poller shutting down");
                        break;
                    }
                    polled = client.get_updates(offset) => polled,
                };

                match polled {
                    Ok(updates) => {
                        backoff.reset();
                        if !updates.is_empty() {
                            debug!(count = updates.len(), "Received updates");
                        }
                        for update in &updates {
                            offset = Some(update.update_id + 1);
                            let Some(event) = client.ingest(update) else {
                                continue;
                            };
                            if event_tx.send(event).await.is_err() {
                                info!("Event channel closed, stopping poller");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let delay = backoff
                            .next_backoff()
                            .unwrap_or(Duration::from_millis(client.config.max_reconnect_delay_ms));
                        warn!("getUpdates failed: {}. Retrying in {:?}...", e, delay);
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                info!("Update poller shutting down");
                                break;
                            }
                            _ = sleep(delay) => {}
                        }
                    }
                }
            }
        })
    }

    /// Stop the poller
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}

#[async_trait]
impl MessagingClient for BotApiClient {
    async fn resolve(&self, target: &DestinationId) -> PlatformResult<PeerHandle> {
        let chat_id = match target {
            DestinationId::Id(id) => json!(id),
            DestinationId::Username(name) => json!(name),
        };
        let chat: Chat = self
            .call("getChat", json!({ "chat_id": chat_id }), self.request_timeout())
            .await?;
        debug!(chat_id = chat.id, "Resolved {} to {}", target, chat.display_name());

        Ok(PeerHandle {
            chat_id: chat.id,
            title: chat.title,
        })
    }

    async fn send(&self, peer: &PeerHandle, text: &str) -> PlatformResult<()> {
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                json!({ "chat_id": peer.chat_id, "text": text }),
                self.request_timeout(),
            )
            .await?;
        Ok(())
    }

    async fn recent_conversations(&self, limit: usize) -> PlatformResult<Vec<Conversation>> {
        Ok(self.recent.lock().iter().take(limit).cloned().collect())
    }
}
