//! Messaging platform boundary
//!
//! The relay only talks to the platform through `MessagingClient`:
//! resolve an identifier, send text to a resolved peer, and list recently
//! seen conversations. Inbound traffic arrives as `RawEvent`s on a channel.

pub mod telegram;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

pub use telegram::{BotApiClient, BotApiConfig};

/// Inbound message as delivered by the platform client
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub message_id: i64,
    pub text: String,
    pub source_conversation_id: i64,
    /// Author, or the posting chat for anonymous channel posts
    pub sender_id: i64,
    pub timestamp: DateTime<Utc>,
    pub is_forwarded: bool,
    pub forward_origin_sender_id: Option<i64>,
}

impl RawEvent {
    pub fn new(source_conversation_id: i64, sender_id: i64, text: impl Into<String>) -> Self {
        Self {
            message_id: 0,
            text: text.into(),
            source_conversation_id,
            sender_id,
            timestamp: Utc::now(),
            is_forwarded: false,
            forward_origin_sender_id: None,
        }
    }

    /// Mark as forwarded from `origin`
    pub fn forwarded_from(mut self, origin: Option<i64>) -> Self {
        self.is_forwarded = true;
        self.forward_origin_sender_id = origin;
        self
    }
}

/// Configured destination identifier: numeric chat id or public username
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "RawDestination")]
pub enum DestinationId {
    Id(i64),
    Username(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDestination {
    Number(i64),
    Text(String),
}

impl From<RawDestination> for DestinationId {
    fn from(raw: RawDestination) -> Self {
        match raw {
            RawDestination::Number(id) => DestinationId::Id(id),
            RawDestination::Text(text) => DestinationId::parse(&text),
        }
    }
}

impl DestinationId {
    /// Numeric strings become ids, anything else a `@username`
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        match value.parse::<i64>() {
            Ok(id) => DestinationId::Id(id),
            Err(_) => DestinationId::Username(format!("@{}", value.trim_start_matches('@'))),
        }
    }

    pub fn numeric(&self) -> Option<i64> {
        match self {
            DestinationId::Id(id) => Some(*id),
            DestinationId::Username(_) => None,
        }
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationId::Id(id) => write!(f, "{}", id),
            DestinationId::Username(name) => f.write_str(name),
        }
    }
}

/// Resolved, sendable peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandle {
    pub chat_id: i64,
    pub title: Option<String>,
}

impl PeerHandle {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            title: None,
        }
    }
}

/// Recently active conversation known to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub handle: PeerHandle,
}

/// Errors returned by platform primitives
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlatformError {
    /// Identifier or peer cannot be resolved
    #[error("not found: {0}")]
    NotFound(String),

    /// Platform refused the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network or protocol failure
    #[error("transport failure: {0}")]
    Transport(String),
}

impl PlatformError {
    /// Lookup-class errors mean "try another way to reach this peer"
    pub fn is_lookup(&self) -> bool {
        matches!(self, PlatformError::NotFound(_))
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Send-side primitives of the messaging platform
#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Directory lookup of a configured identifier
    async fn resolve(&self, target: &DestinationId) -> PlatformResult<PeerHandle>;

    /// Send a text message to a resolved peer
    async fn send(&self, peer: &PeerHandle, text: &str) -> PlatformResult<()>;

    /// Most recent known conversations, newest first, at most `limit`
    async fn recent_conversations(&self, limit: usize) -> PlatformResult<Vec<Conversation>>;
}
