//! Event orchestration
//!
//! `Relay::handle_event` is the single entry point for every inbound
//! message, direct or forwarded:
//!
//! admin command? → source selection → extract → tier filter → dedup →
//! history write → delivery
//!
//! `Relay::run` drives it from a channel, one task per event.

pub mod commands;

use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dedup::{DedupMode, Deduplicator};
use crate::delivery::{DeliveryOutcome, DeliveryRouter};
use crate::error::Result;
use crate::extract::{ExtractedRecord, Extractor, ExtractorOptions};
use crate::filter::tier_filter::{self, FilterReason, FilterResult};
use crate::filter::types::PolicyTier;
use crate::filter::PolicyState;
use crate::platform::{DestinationId, MessagingClient, RawEvent};
use crate::store::{HistoryStore, SeenRecord};

pub use commands::AdminCommand;

/// Which messages the relay looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Only the configured chats
    Channels,
    /// Only the configured senders, optionally limited to the configured chats
    SenderFiltered,
    /// Everything the client receives
    AllMessages,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceMode::Channels => write!(f, "channels"),
            SourceMode::SenderFiltered => write!(f, "sender-filtered"),
            SourceMode::AllMessages => write!(f, "all messages"),
        }
    }
}

/// Source chat and sender allowlists
#[derive(Debug, Clone, Default)]
pub struct SourceSelector {
    chats: HashSet<i64>,
    senders: HashSet<i64>,
}

impl SourceSelector {
    pub fn new(
        chats: impl IntoIterator<Item = i64>,
        senders: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            chats: chats.into_iter().collect(),
            senders: senders.into_iter().collect(),
        }
    }

    pub fn mode(&self) -> SourceMode {
        if !self.senders.is_empty() {
            SourceMode::SenderFiltered
        } else if !self.chats.is_empty() {
            SourceMode::Channels
        } else {
            SourceMode::AllMessages
        }
    }

    /// Both lists restrict when non-empty. A forwarded message matches a
    /// sender through its original author too.
    pub fn selects(&self, event: &RawEvent) -> bool {
        let chat_ok = self.chats.is_empty() || self.chats.contains(&event.source_conversation_id);
        let sender_ok = self.senders.is_empty()
            || self.senders.contains(&event.sender_id)
            || event
                .forward_origin_sender_id
                .is_some_and(|origin| self.senders.contains(&origin));
        chat_ok && sender_ok
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }
}

/// What gets sent to destinations for a forwarded record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// The contract address alone
    #[default]
    Address,
    /// The original message text
    FullText,
}

impl PayloadMode {
    pub fn render(self, record: &ExtractedRecord) -> String {
        match self {
            PayloadMode::Address => record.contract_address.clone(),
            PayloadMode::FullText => record.raw_text.clone(),
        }
    }
}

impl fmt::Display for PayloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadMode::Address => write!(f, "address"),
            PayloadMode::FullText => write!(f, "full_text"),
        }
    }
}

/// What happened to one inbound event
#[derive(Debug)]
pub enum EventOutcome {
    /// An admin command was handled (or refused)
    Command {
        command: AdminCommand,
        authorized: bool,
        reply: String,
        delivered: bool,
    },
    /// Not from a watched source
    Ignored,
    /// No contract address in the text
    NotParsed,
    /// Below the current filter level
    Rejected(FilterReason),
    /// Address already forwarded
    Duplicate { address: String },
    /// Sent to the destinations (individual sends may still have failed)
    Forwarded {
        record: ExtractedRecord,
        outcomes: Vec<DeliveryOutcome>,
    },
}

impl EventOutcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, EventOutcome::Forwarded { .. })
    }
}

/// State restored from the store at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoredState {
    pub tier: PolicyTier,
    pub primed: usize,
}

/// The relay pipeline
pub struct Relay {
    extractor: Extractor,
    policy: PolicyState,
    dedup: Deduplicator,
    router: DeliveryRouter,
    store: Option<Arc<dyn HistoryStore>>,
    destinations: Vec<DestinationId>,
    selector: SourceSelector,
    payload: PayloadMode,
    admins: HashSet<i64>,
}

impl Relay {
    /// Relay with default settings: Normal filter level, dedup disabled,
    /// no store, every message selected, address payload, no admins
    pub fn new(extractor: Extractor, router: DeliveryRouter, destinations: Vec<DestinationId>) -> Self {
        Self {
            extractor,
            policy: PolicyState::default(),
            dedup: Deduplicator::disabled(),
            router,
            store: None,
            destinations,
            selector: SourceSelector::default(),
            payload: PayloadMode::default(),
            admins: HashSet::new(),
        }
    }

    /// Build the relay described by a validated config
    pub fn from_config(
        config: &Config,
        client: Arc<dyn MessagingClient>,
        store: Option<Arc<dyn HistoryStore>>,
    ) -> Result<Self> {
        let extractor = Extractor::with_options(ExtractorOptions {
            strict_address: config.filter.strict_address,
        })?;
        let router = DeliveryRouter::with_scan_limit(client, config.delivery.recent_scan_limit);

        let mode = match (config.dedup.enabled, store.is_some()) {
            (false, _) => DedupMode::Disabled,
            (true, false) => DedupMode::InMemory,
            (true, true) => DedupMode::Persisted,
        };

        let mut relay = Self::new(extractor, router, config.delivery.destinations.clone())
            .with_policy(PolicyState::new(config.filter.policy_tier()?))
            .with_dedup(Deduplicator::new(mode, config.dedup.max_size))
            .with_sources(SourceSelector::new(
                config.sources.chat_ids.iter().copied(),
                config.sources.sender_ids.iter().copied(),
            ))
            .with_payload(config.delivery.payload)
            .with_admins(config.admin.user_ids.iter().copied());
        if let Some(store) = store {
            relay = relay.with_store(store);
        }
        Ok(relay)
    }

    pub fn with_policy(mut self, policy: PolicyState) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dedup(mut self, dedup: Deduplicator) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sources(mut self, selector: SourceSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_payload(mut self, payload: PayloadMode) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_admins(mut self, admins: impl IntoIterator<Item = i64>) -> Self {
        self.admins = admins.into_iter().collect();
        self
    }

    pub fn policy(&self) -> &PolicyState {
        &self.policy
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn router(&self) -> &DeliveryRouter {
        &self.router
    }

    pub fn selector(&self) -> &SourceSelector {
        &self.selector
    }

    /// Load the saved filter level and prime dedup from history.
    ///
    /// Store failures are logged; the relay then starts with the configured
    /// level and an empty cache.
    pub async fn restore_state(&self) -> RestoredState {
        let Some(store) = &self.store else {
            return RestoredState {
                tier: self.policy.current().await,
                primed: 0,
            };
        };

        match store.load_tier().await {
            Ok(Some(saved)) => {
                if saved.parse::<PolicyTier>().is_err() {
                    warn!(saved = %saved, "Unrecognised saved filter level, using default");
                }
                let tier = PolicyTier::parse_or_default(Some(&saved));
                self.policy.set(tier).await;
            }
            Ok(None) => debug!("No saved filter level"),
            Err(e) => warn!(error = %e, "Failed to load saved filter level"),
        }

        let mut primed = 0;
        if self.dedup.mode() == DedupMode::Persisted {
            let (_, capacity) = self.dedup.stats().await;
            match store.recent_addresses(capacity).await {
                Ok(addresses) => primed = self.dedup.prime(addresses).await,
                Err(e) => warn!(error = %e, "Failed to load forward history"),
            }
        }

        RestoredState {
            tier: self.policy.current().await,
            primed,
        }
    }

    /// Process one inbound event end to end
    pub async fn handle_event(&self, event: RawEvent) -> EventOutcome {
        if let Some(command) = AdminCommand::parse(&event.text) {
            return self.handle_command(command, &event).await;
        }

        if !self.selector.selects(&event) {
            return EventOutcome::Ignored;
        }

        let Some(record) = self.extractor.parse(&event.text) else {
            debug!(
                chat = event.source_conversation_id,
                message_id = event.message_id,
                "No contract address found"
            );
            return EventOutcome::NotParsed;
        };

        let policy = self.policy.current().await;
        if let FilterResult::Filtered(reason) = tier_filter::check(&record, policy) {
            info!(address = %record.contract_address, "Filtered: {}", reason);
            return EventOutcome::Rejected(reason);
        }

        if !self.dedup.admit(&record.contract_address).await {
            info!(address = %record.contract_address, "Duplicate, not forwarding");
            return EventOutcome::Duplicate {
                address: record.contract_address,
            };
        }

        if let Some(store) = &self.store {
            match store.record_seen(&SeenRecord::from_record(&record, event.timestamp)).await {
                Ok(true) => {}
                Ok(false) => debug!(address = %record.contract_address, "Already in history"),
                Err(e) => warn!(address = %record.contract_address, error = %e, "Failed to record history"),
            }
        }

        let payload = self.payload.render(&record);
        let outcomes = self.router.send_to_all(&self.destinations, &payload).await;
        let delivered = outcomes.iter().filter(|o| o.is_delivered()).count();
        info!(
            address = %record.contract_address,
            tier = %record.tier,
            forwarded = event.is_forwarded,
            "Forwarded to {}/{} destinations",
            delivered,
            outcomes.len()
        );

        EventOutcome::Forwarded { record, outcomes }
    }

    /// Consume events until the channel closes, one task per event.
    /// In-flight events are drained before returning.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<RawEvent>) {
        let mut tasks = JoinSet::new();

        while let Some(event) = rx.recv().await {
            let relay = Arc::clone(&self);
            tasks.spawn(async move { relay.handle_event(event).await });

            while let Some(finished) = tasks.try_join_next() {
                log_task_result(finished);
            }
        }

        info!("Event channel closed, waiting for {} in-flight events", tasks.len());
        while let Some(finished) = tasks.join_next().await {
            log_task_result(finished);
        }
    }
}

fn log_task_result(result: std::result::Result<EventOutcome, tokio::task::JoinError>) {
    match result {
        Ok(outcome) => debug!(?outcome, "Event handled"),
        Err(e) if e.is_panic() => error!("Event handler panicked: {}", e),
        Err(e) => warn!("Event handler cancelled: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryFailure, DeliveryRoute};
    use crate::error::Error;
    use crate::filter::types::Tier;
    use crate::platform::fake::FakeClient;
    use crate::platform::PlatformError;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const CA: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";
    const OTHER_CA: &str = "So11111111111111111111111111111111111111112";
    const USDC: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
    const SOURCE: i64 = -100_111;
    const ADMIN: i64 = 9001;
    const DEST_A: i64 = -100_500;
    const DEST_B: i64 = -100_600;

    /// History store kept in memory
    #[derive(Default)]
    struct MemoryStore {
        tier: Mutex<Option<String>>,
        seen: Mutex<Vec<SeenRecord>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl HistoryStore for MemoryStore {
        async fn load_tier(&self) -> Result<Option<String>> {
            Ok(self.tier.lock().clone())
        }

        async fn save_tier(&self, tier: PolicyTier) -> Result<()> {
            if self.fail_writes {
                return Err(Error::Storage("disk full".into()));
            }
            *self.tier.lock() = Some(tier.as_str().to_string());
            Ok(())
        }

        async fn recent_addresses(&self, limit: usize) -> Result<Vec<String>> {
            Ok(self.seen.lock().iter().rev().take(limit).map(|r| r.address.clone()).collect())
        }

        async fn record_seen(&self, record: &SeenRecord) -> Result<bool> {
            if self.fail_writes {
                return Err(Error::Storage("disk full".into()));
            }
            let mut seen = self.seen.lock();
            if seen.iter().any(|r| r.address == record.address) {
                return Ok(false);
            }
            seen.push(record.clone());
            Ok(true)
        }

        async fn recent_records(&self, limit: usize) -> Result<Vec<SeenRecord>> {
            Ok(self.seen.lock().iter().rev().take(limit).cloned().collect())
        }

        async fn clear_seen(&self) -> Result<usize> {
            let mut seen = self.seen.lock();
            let removed = seen.len();
            seen.clear();
            Ok(removed)
        }
    }

    fn client() -> Arc<FakeClient> {
        Arc::new(
            FakeClient::new()
                .with_directory_entry(DestinationId::Id(DEST_A), DEST_A)
                .with_directory_entry(DestinationId::Id(DEST_B), DEST_B)
                .with_directory_entry(DestinationId::Id(SOURCE), SOURCE),
        )
    }

    fn relay(client: &Arc<FakeClient>) -> Relay {
        Relay::new(
            Extractor::new().unwrap(),
            DeliveryRouter::new(client.clone()),
            vec![DestinationId::Id(DEST_A), DestinationId::Id(DEST_B)],
        )
        .with_dedup(Deduplicator::new(DedupMode::InMemory, 1000))
        .with_sources(SourceSelector::new([SOURCE], []))
        .with_admins([ADMIN])
    }

    fn announcement(address: &str, tier: &str) -> RawEvent {
        RawEvent::new(
            SOURCE,
            1,
            format!("🪙CA地址: {}\n等级: {}\n推特评分: 88", address, tier),
        )
    }

    fn command(text: &str, sender: i64) -> RawEvent {
        RawEvent::new(SOURCE, sender, text)
    }

    #[tokio::test]
    async fn test_from_config_picks_dedup_mode() {
        let mut config = Config::default();
        config.sources.sender_ids = vec![5];
        config.delivery.destinations = vec![DestinationId::Id(DEST_A)];
        config.filter.default_tier = "excellent".to_string();

        let relay = Relay::from_config(&config, client(), None).unwrap();
        assert_eq!(relay.dedup().mode(), DedupMode::InMemory);
        assert_eq!(relay.selector().mode(), SourceMode::SenderFiltered);
        assert_eq!(relay.policy().current().await, PolicyTier::Excellent);

        let store: Arc<dyn HistoryStore> = Arc::new(MemoryStore::default());
        let relay = Relay::from_config(&config, client(), Some(store)).unwrap();
        assert_eq!(relay.dedup().mode(), DedupMode::Persisted);

        config.dedup.enabled = false;
        let relay = Relay::from_config(&config, client(), None).unwrap();
        assert_eq!(relay.dedup().mode(), DedupMode::Disabled);
    }

    #[tokio::test]
    async fn test_forwards_good_under_normal() {
        let client = client();
        let relay = relay(&client);

        let outcome = relay.handle_event(announcement(CA, "Good")).await;

        let EventOutcome::Forwarded { record, outcomes } = outcome else {
            panic!("expected forward, got {:?}", outcome);
        };
        assert_eq!(record.tier, Tier::Good);
        assert_eq!(record.twitter_score, 88);
        assert!(outcomes.iter().all(|o| o.is_delivered()));
        assert_eq!(client.sent_to(DEST_A), vec![CA.to_string()]);
        assert_eq!(client.sent_to(DEST_B), vec![CA.to_string()]);
    }

    #[tokio::test]
    async fn test_second_occurrence_is_suppressed() {
        let client = client();
        let relay = relay(&client);

        assert!(relay.handle_event(announcement(CA, "Good")).await.is_forwarded());
        let second = relay.handle_event(announcement(CA, "Excellent")).await;

        assert!(matches!(second, EventOutcome::Duplicate { ref address } if address == CA));
        assert_eq!(client.sent_to(DEST_A).len(), 1);
    }

    #[tokio::test]
    async fn test_below_threshold_is_rejected() {
        let client = client();
        let relay = relay(&client).with_policy(PolicyState::new(PolicyTier::Excellent));

        let outcome = relay.handle_event(announcement(CA, "Good")).await;

        assert!(matches!(
            outcome,
            EventOutcome::Rejected(FilterReason::BelowThreshold {
                tier: Tier::Good,
                policy: PolicyTier::Excellent
            })
        ));
        assert!(client.sent().is_empty());
        // A rejected record is not remembered
        assert_eq!(relay.dedup().stats().await.0, 0);
    }

    #[tokio::test]
    async fn test_text_without_address() {
        let client = client();
        let relay = relay(&client);

        let outcome = relay
            .handle_event(RawEvent::new(SOURCE, 1, "gm, market looks Excellent today"))
            .await;

        assert!(matches!(outcome, EventOutcome::NotParsed));
        assert!(client.sent().is_empty());
        assert_eq!(client.resolve_calls(), 0);
        assert_eq!(relay.dedup().stats().await.0, 0);
    }

    #[tokio::test]
    async fn test_destination_found_in_recent_conversations() {
        let hidden = -100_777;
        let client = Arc::new(
            FakeClient::new()
                .with_recent(-1, "noise")
                .with_recent(hidden, "private feed"),
        );
        let relay = Relay::new(
            Extractor::new().unwrap(),
            DeliveryRouter::new(client.clone()),
            vec![DestinationId::Id(hidden)],
        );

        let outcome = relay.handle_event(announcement(CA, "Good")).await;
        let EventOutcome::Forwarded { outcomes, .. } = outcome else {
            panic!("expected forward");
        };
        assert_eq!(outcomes[0].result, Ok(DeliveryRoute::RecentScan));
        assert!(relay.router().cached_handle(&DestinationId::Id(hidden)).is_some());

        // Next send goes straight through the cached handle
        let outcome = relay.handle_event(announcement(OTHER_CA, "Good")).await;
        let EventOutcome::Forwarded { outcomes, .. } = outcome else {
            panic!("expected forward");
        };
        assert_eq!(outcomes[0].result, Ok(DeliveryRoute::Cached));
        assert_eq!(client.recent_calls(), 1);
    }

    #[tokio::test]
    async fn test_one_failing_destination_does_not_block_others() {
        let client = client();
        client.fail_sends_to(
            DEST_A,
            PlatformError::Rejected("Forbidden: bot was kicked from the channel chat".into()),
        );
        let relay = relay(&client);

        let EventOutcome::Forwarded { outcomes, .. } = relay.handle_event(announcement(CA, "Good")).await
        else {
            panic!("expected forward");
        };
        assert!(matches!(outcomes[0].result, Err(DeliveryFailure::Blocked(_))));
        assert_eq!(outcomes[1].result, Ok(DeliveryRoute::Directory));
        assert_eq!(client.sent_to(DEST_B), vec![CA.to_string()]);
    }

    #[tokio::test]
    async fn test_source_selection() {
        let client = client();
        let relay = relay(&client);

        let elsewhere = RawEvent::new(-100_999, 1, format!("CA: {}", CA));
        assert!(matches!(relay.handle_event(elsewhere).await, EventOutcome::Ignored));
        assert!(client.sent().is_empty());
    }

    #[test]
    fn test_selector_modes() {
        let watched_sender = 77;
        let event = RawEvent::new(SOURCE, 5, "x");
        let forwarded = RawEvent::new(-100_999, 5, "x").forwarded_from(Some(watched_sender));

        let all = SourceSelector::default();
        assert_eq!(all.mode(), SourceMode::AllMessages);
        assert!(all.selects(&event));

        let channels = SourceSelector::new([SOURCE], []);
        assert_eq!(channels.mode(), SourceMode::Channels);
        assert!(channels.selects(&event));
        assert!(!channels.selects(&forwarded));

        let senders = SourceSelector::new([], [watched_sender]);
        assert_eq!(senders.mode(), SourceMode::SenderFiltered);
        assert!(!senders.selects(&event));
        assert!(senders.selects(&forwarded));

        let both = SourceSelector::new([SOURCE], [watched_sender]);
        assert!(!both.selects(&forwarded));
        assert!(both.selects(&RawEvent::new(SOURCE, watched_sender, "x")));
    }

    #[tokio::test]
    async fn test_full_text_payload() {
        let client = client();
        let relay = relay(&client).with_payload(PayloadMode::FullText);
        let event = announcement(CA, "Good");
        let text = event.text.clone();

        relay.handle_event(event).await;
        assert_eq!(client.sent_to(DEST_A), vec![text]);
    }

    #[tokio::test]
    async fn test_history_written_and_failure_tolerated() {
        let client = client();
        let store = Arc::new(MemoryStore::default());
        let relay = relay(&client).with_store(store.clone());

        relay.handle_event(announcement(CA, "Good")).await;
        let seen = store.seen.lock().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].address, CA);
        assert_eq!(seen[0].twitter_score, 88);

        let failing = Arc::new(MemoryStore {
            fail_writes: true,
            ..Default::default()
        });
        let client = self::client();
        let relay = self::relay(&client).with_store(failing);
        assert!(relay.handle_event(announcement(CA, "Good")).await.is_forwarded());
        assert_eq!(client.sent_to(DEST_A).len(), 1);
    }

    #[tokio::test]
    async fn test_history_written_with_dedup_disabled() {
        let client = client();
        let store = Arc::new(MemoryStore::default());
        let relay = relay(&client)
            .with_dedup(Deduplicator::disabled())
            .with_store(store.clone());

        assert!(relay.handle_event(announcement(CA, "Good")).await.is_forwarded());
        assert!(relay.handle_event(announcement(CA, "Good")).await.is_forwarded());
        assert_eq!(store.seen.lock().len(), 1);
        assert_eq!(client.sent_to(DEST_A).len(), 2);
    }

    #[tokio::test]
    async fn test_restore_state_primes_and_loads_tier() {
        let client = client();
        let store = Arc::new(MemoryStore::default());
        *store.tier.lock() = Some("Excellent".to_string());
        store
            .record_seen(&SeenRecord {
                address: CA.to_string(),
                tier: Tier::Good,
                twitter_score: 0,
                market_value_k: 0,
                follower_count: 0,
                first_seen: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let relay = relay(&client)
            .with_dedup(Deduplicator::new(DedupMode::Persisted, 1000))
            .with_store(store);

        let restored = relay.restore_state().await;
        assert_eq!(restored, RestoredState { tier: PolicyTier::Excellent, primed: 1 });

        let outcome = relay.handle_event(announcement(CA, "Excellent")).await;
        assert!(matches!(outcome, EventOutcome::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_saved_tier_falls_back_to_normal() {
        let client = client();
        let store = Arc::new(MemoryStore::default());
        *store.tier.lock() = Some("legendary".to_string());
        let relay = relay(&client)
            .with_policy(PolicyState::new(PolicyTier::Excellent))
            .with_store(store);

        assert_eq!(relay.restore_state().await.tier, PolicyTier::Normal);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_forward_once() {
        let client = client();
        let relay = Arc::new(relay(&client));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let relay = Arc::clone(&relay);
            handles.push(tokio::spawn(async move {
                relay.handle_event(announcement(CA, "Good")).await.is_forwarded()
            }));
        }

        let mut forwarded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                forwarded += 1;
            }
        }
        assert_eq!(forwarded, 1);
        assert_eq!(client.sent_to(DEST_A).len(), 1);
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let client = client();
        let relay = Arc::new(relay(&client));
        let (tx, rx) = mpsc::channel(8);

        tx.send(announcement(CA, "Good")).await.unwrap();
        tx.send(announcement(OTHER_CA, "Normal")).await.unwrap();
        tx.send(announcement(CA, "Good")).await.unwrap();
        drop(tx);

        relay.run(rx).await;
        assert_eq!(client.sent_to(DEST_A).len(), 2);
    }

    #[tokio::test]
    async fn test_run_survives_panicking_event() {
        let client = client();
        client.panic_on_payload(OTHER_CA);
        let relay = Arc::new(relay(&client));
        let (tx, rx) = mpsc::channel(8);

        tx.send(announcement(CA, "Good")).await.unwrap();
        tx.send(announcement(OTHER_CA, "Good")).await.unwrap();
        tx.send(announcement(USDC, "Excellent")).await.unwrap();
        drop(tx);

        relay.run(rx).await;

        let sent = client.sent_to(DEST_A);
        assert!(sent.contains(&CA.to_string()));
        assert!(sent.contains(&USDC.to_string()));
        assert!(!sent.contains(&OTHER_CA.to_string()));
        assert_eq!(client.sent_to(DEST_B).len(), 2);
    }

    #[tokio::test]
    async fn test_set_command_from_admin() {
        let client = client();
        let relay = relay(&client);

        let outcome = relay.handle_event(command("/set excellent", ADMIN)).await;
        let EventOutcome::Command { authorized, delivered, reply, .. } = outcome else {
            panic!("expected command");
        };
        assert!(authorized);
        assert!(delivered);
        assert!(reply.contains("Excellent"));
        assert_eq!(relay.policy().current().await, PolicyTier::Excellent);
        assert_eq!(client.sent_to(SOURCE).len(), 1);
    }

    #[tokio::test]
    async fn test_command_from_non_admin_is_refused() {
        let client = client();
        let relay = relay(&client);

        let outcome = relay.handle_event(command("/set All", 12345)).await;
        let EventOutcome::Command { authorized, reply, .. } = outcome else {
            panic!("expected command");
        };
        assert!(!authorized);
        assert_eq!(reply, commands::PERMISSION_DENIED);
        assert_eq!(relay.policy().current().await, PolicyTier::Normal);
    }

    #[tokio::test]
    async fn test_set_and_save_persists() {
        let client = client();
        let store = Arc::new(MemoryStore::default());
        let relay = relay(&client).with_store(store.clone());

        relay.handle_event(command("/set_and_save@relay_bot good", ADMIN)).await;
        assert_eq!(store.tier.lock().as_deref(), Some("Good"));

        let failing = Arc::new(MemoryStore {
            fail_writes: true,
            ..Default::default()
        });
        let relay = self::relay(&client).with_store(failing);
        let EventOutcome::Command { reply, .. } =
            relay.handle_event(command("/set_and_save bad", ADMIN)).await
        else {
            panic!("expected command");
        };
        assert!(reply.contains("Not saved"));
        assert_eq!(relay.policy().current().await, PolicyTier::Bad);
    }

    #[tokio::test]
    async fn test_set_rejects_unknown_level() {
        let client = client();
        let relay = relay(&client);

        let EventOutcome::Command { reply, .. } =
            relay.handle_event(command("/set great", ADMIN)).await
        else {
            panic!("expected command");
        };
        assert!(reply.contains("Unknown level"));
        assert_eq!(relay.policy().current().await, PolicyTier::Normal);
    }

    #[tokio::test]
    async fn test_clear_command_allows_reforward() {
        let client = client();
        let store = Arc::new(MemoryStore::default());
        let relay = relay(&client).with_store(store.clone());

        relay.handle_event(announcement(CA, "Good")).await;
        relay.handle_event(command("/clear", ADMIN)).await;
        assert!(relay.handle_event(announcement(CA, "Good")).await.is_forwarded());
        // Persisted history is kept
        assert_eq!(store.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_status_command() {
        let client = client();
        let relay = relay(&client);
        relay.handle_event(announcement(CA, "Good")).await;

        let EventOutcome::Command { reply, .. } = relay.handle_event(command("/status", ADMIN)).await
        else {
            panic!("expected command");
        };
        assert!(reply.contains("Filter level: Normal"));
        assert!(reply.contains("in-memory (1/1000)"));
        assert!(reply.contains("channels (1 chats, 0 senders)"));
        assert!(reply.contains("Destinations: 2 (2 resolved)"));
    }

    #[tokio::test]
    async fn test_command_replies_do_not_count_as_resolved() {
        let unreachable = -100_404;
        let dm = 31337;
        let client = Arc::new(FakeClient::new());
        let relay = Relay::new(
            Extractor::new().unwrap(),
            DeliveryRouter::new(client.clone()),
            vec![DestinationId::Id(unreachable)],
        )
        .with_admins([ADMIN]);

        relay.handle_event(RawEvent::new(dm, ADMIN, "/status")).await;
        relay.handle_event(RawEvent::new(dm, 777, "/status")).await;
        let EventOutcome::Command { reply, delivered, .. } =
            relay.handle_event(RawEvent::new(dm, ADMIN, "/status")).await
        else {
            panic!("expected command");
        };

        assert!(delivered);
        assert!(reply.contains("Destinations: 1 (0 resolved)"));
        assert_eq!(client.sent_to(dm).len(), 3);
        assert!(relay.router().cached_handle(&DestinationId::Id(dm)).is_none());
        assert_eq!(client.resolve_calls(), 0);
    }
}
