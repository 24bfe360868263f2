//! In-process messaging client for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    Conversation, DestinationId, MessagingClient, PeerHandle, PlatformError, PlatformResult,
};

/// Scriptable client: a directory, a recent-conversation list, per-chat
/// send failures, and a log of everything sent.
#[derive(Default)]
pub struct FakeClient {
    directory: Mutex<HashMap<DestinationId, PeerHandle>>,
    recent: Mutex<Vec<Conversation>>,
    send_failures: Mutex<HashMap<i64, PlatformError>>,
    sent: Mutex<Vec<(i64, String)>>,
    panic_payload: Mutex<Option<String>>,
    resolve_calls: AtomicUsize,
    recent_calls: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `target` resolvable through the directory
    pub fn with_directory_entry(self, target: DestinationId, chat_id: i64) -> Self {
        self.directory.lock().insert(target, PeerHandle::new(chat_id));
        self
    }

    /// Add a conversation to the recent list (appended as oldest)
    pub fn with_recent(self, chat_id: i64, title: &str) -> Self {
        self.recent.lock().push(Conversation {
            id: chat_id,
            title: title.to_string(),
            handle: PeerHandle::new(chat_id),
        });
        self
    }

    pub fn fail_sends_to(&self, chat_id: i64, error: PlatformError) {
        self.send_failures.lock().insert(chat_id, error);
    }

    /// Panic inside `send` whenever this exact text is sent
    pub fn panic_on_payload(&self, text: &str) {
        *self.panic_payload.lock() = Some(text.to_string());
    }

    pub fn heal_sends_to(&self, chat_id: i64) {
        self.send_failures.lock().remove(&chat_id);
    }

    pub fn remove_directory_entry(&self, target: &DestinationId) {
        self.directory.lock().remove(target);
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn recent_calls(&self) -> usize {
        self.recent_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    async fn resolve(&self, target: &DestinationId) -> PlatformResult<PeerHandle> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.directory
            .lock()
            .get(target)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("Bad Request: chat {} not found", target)))
    }

    async fn send(&self, peer: &PeerHandle, text: &str) -> PlatformResult<()> {
        tokio::task::yield_now().await;
        let explode = self.panic_payload.lock().as_deref() == Some(text);
        if explode {
            panic!("send blew up on {}", text);
        }
        if let Some(error) = self.send_failures.lock().get(&peer.chat_id) {
            return Err(error.clone());
        }
        self.sent.lock().push((peer.chat_id, text.to_string()));
        Ok(())
    }

    async fn recent_conversations(&self, limit: usize) -> PlatformResult<Vec<Conversation>> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.recent.lock().iter().take(limit).cloned().collect())
    }
}
