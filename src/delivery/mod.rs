//! Destination delivery
//!
//! Each destination is tried through an ordered fallback chain:
//!
//! 1. send through a handle cached from an earlier success
//! 2. resolve the identifier through the platform directory
//! 3. scan the most recent known conversations for a matching numeric id
//!
//! Lookup-class errors move on to the next strategy. A send refused after a
//! successful resolution ends the attempt for that destination with a
//! classified diagnostic. Destinations are independent: one failure never
//! stops delivery to the rest.

pub mod diagnostics;

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::platform::{DestinationId, MessagingClient, PeerHandle};

pub use diagnostics::{classify_send_error, DeliveryFailure};

/// Default number of recent conversations scanned by the last strategy
pub const DEFAULT_RECENT_SCAN_LIMIT: usize = 50;

/// Strategy that delivered the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryRoute {
    Cached,
    Directory,
    RecentScan,
}

impl std::fmt::Display for DeliveryRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryRoute::Cached => write!(f, "cached handle"),
            DeliveryRoute::Directory => write!(f, "directory lookup"),
            DeliveryRoute::RecentScan => write!(f, "recent conversations"),
        }
    }
}

/// Result of delivering one payload to one destination
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub target: DestinationId,
    pub result: std::result::Result<DeliveryRoute, DeliveryFailure>,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// What a single strategy concluded
enum Attempt {
    Delivered,
    /// Could not reach the peer this way; try the next strategy
    Skip(String),
    /// Reached the peer but the send was refused
    Failed(DeliveryFailure),
}

/// Resolves destinations and sends payloads
pub struct DeliveryRouter {
    client: Arc<dyn MessagingClient>,
    handles: DashMap<DestinationId, PeerHandle>,
    recent_scan_limit: usize,
}

impl DeliveryRouter {
    pub fn new(client: Arc<dyn MessagingClient>) -> Self {
        Self::with_scan_limit(client, DEFAULT_RECENT_SCAN_LIMIT)
    }

    pub fn with_scan_limit(client: Arc<dyn MessagingClient>, recent_scan_limit: usize) -> Self {
        Self {
            client,
            handles: DashMap::new(),
            recent_scan_limit,
        }
    }

    /// Send `payload` to every destination, sequentially, in order
    pub async fn send_to_all(
        &self,
        destinations: &[DestinationId],
        payload: &str,
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(destinations.len());
        for target in destinations {
            outcomes.push(self.send_one(target, payload).await);
        }
        outcomes
    }

    /// Run the fallback chain for one destination
    pub async fn send_one(&self, target: &DestinationId, payload: &str) -> DeliveryOutcome {
        let mut last_error = String::from("no strategy applicable");

        for route in [
            DeliveryRoute::Cached,
            DeliveryRoute::Directory,
            DeliveryRoute::RecentScan,
        ] {
            let attempt = match route {
                DeliveryRoute::Cached => self.try_cached(target, payload).await,
                DeliveryRoute::Directory => self.try_directory(target, payload).await,
                DeliveryRoute::RecentScan => self.try_recent_scan(target, payload).await,
            };

            match attempt {
                Attempt::Delivered => {
                    info!(destination = %target, via = %route, "Delivered");
                    return DeliveryOutcome {
                        target: target.clone(),
                        result: Ok(route),
                    };
                }
                Attempt::Skip(reason) => {
                    debug!(destination = %target, via = %route, reason = %reason, "Strategy did not reach destination");
                    last_error = reason;
                }
                Attempt::Failed(failure) => {
                    warn!(
                        destination = %target,
                        via = %route,
                        error = %failure,
                        hint = failure.hint(),
                        "Delivery failed"
                    );
                    return DeliveryOutcome {
                        target: target.clone(),
                        result: Err(failure),
                    };
                }
            }
        }

        let failure = DeliveryFailure::Unresolved { last_error };
        warn!(destination = %target, error = %failure, hint = failure.hint(), "Delivery failed");
        DeliveryOutcome {
            target: target.clone(),
            result: Err(failure),
        }
    }

    /// Cached handle for a destination, if one was resolved this run
    pub fn cached_handle(&self, target: &DestinationId) -> Option<PeerHandle> {
        self.handles.get(target).map(|h| h.value().clone())
    }

    /// How many of `targets` have a cached handle
    pub fn resolved_count(&self, targets: &[DestinationId]) -> usize {
        targets.iter().filter(|t| self.handles.contains_key(*t)).count()
    }

    /// Answer the chat a message came from. Reply chats are not
    /// destinations, so nothing is cached.
    pub async fn reply(&self, chat_id: i64, text: &str) -> bool {
        match self.client.send(&PeerHandle::new(chat_id), text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(chat = chat_id, error = %e, "Reply failed");
                false
            }
        }
    }

    async fn try_cached(&self, target: &DestinationId, payload: &str) -> Attempt {
        let Some(handle) = self.cached_handle(target) else {
            return Attempt::Skip("no cached handle".to_string());
        };
        self.deliver(&handle, payload).await
    }

    async fn try_directory(&self, target: &DestinationId, payload: &str) -> Attempt {
        let handle = match self.client.resolve(target).await {
            Ok(handle) => handle,
            Err(e) => return Attempt::Skip(e.to_string()),
        };
        self.deliver_and_cache(target, handle, payload).await
    }

    async fn try_recent_scan(&self, target: &DestinationId, payload: &str) -> Attempt {
        let Some(id) = target.numeric() else {
            return Attempt::Skip("recent scan needs a numeric id".to_string());
        };

        let conversations = match self.client.recent_conversations(self.recent_scan_limit).await {
            Ok(list) => list,
            Err(e) => return Attempt::Skip(e.to_string()),
        };

        let Some(found) = conversations
            .into_iter()
            .take(self.recent_scan_limit)
            .find(|c| c.id == id)
        else {
            return Attempt::Skip(format!(
                "not among the {} most recent conversations",
                self.recent_scan_limit
            ));
        };

        debug!(destination = %target, title = %found.title, "Matched destination in recent conversations");
        self.deliver_and_cache(target, found.handle, payload).await
    }

    async fn deliver_and_cache(
        &self,
        target: &DestinationId,
        handle: PeerHandle,
        payload: &str,
    ) -> Attempt {
        let attempt = self.deliver(&handle, payload).await;
        if matches!(attempt, Attempt::Delivered) {
            self.handles.insert(target.clone(), handle);
        }
        attempt
    }

    async fn deliver(&self, handle: &PeerHandle, payload: &str) -> Attempt {
        match self.client.send(handle, payload).await {
            Ok(()) => Attempt::Delivered,
            Err(e) if e.is_lookup() => Attempt::Skip(e.to_string()),
            Err(e) => Attempt::Failed(classify_send_error(&e)),
        }
    }
}
