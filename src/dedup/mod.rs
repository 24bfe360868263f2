//! Duplicate suppression
//!
//! `DedupCache` is the plain bounded set; `Deduplicator` is the shared,
//! mutex-guarded handle the relay uses so that "is it new?" and "remember
//! it" happen as one step, even when handlers for the same address run
//! concurrently.

pub mod cache;

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub use cache::{DedupCache, DEFAULT_CAPACITY};

/// How duplicates are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupMode {
    /// Every record is admitted
    Disabled,
    /// Bounded in-memory set, empty at startup
    InMemory,
    /// In-memory set primed from the history store
    Persisted,
}

impl std::fmt::Display for DedupMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupMode::Disabled => write!(f, "disabled"),
            DedupMode::InMemory => write!(f, "in-memory"),
            DedupMode::Persisted => write!(f, "persisted"),
        }
    }
}

/// Shared dedup handle
#[derive(Clone)]
pub struct Deduplicator {
    mode: DedupMode,
    cache: Arc<Mutex<DedupCache>>,
}

impl Deduplicator {
    pub fn new(mode: DedupMode, capacity: usize) -> Self {
        Self {
            mode,
            cache: Arc::new(Mutex::new(DedupCache::new(capacity))),
        }
    }

    pub fn disabled() -> Self {
        Self::new(DedupMode::Disabled, DEFAULT_CAPACITY)
    }

    pub fn mode(&self) -> DedupMode {
        self.mode
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != DedupMode::Disabled
    }

    /// Atomically check and remember an address.
    ///
    /// Returns true when the record should proceed. The lock is held for
    /// the whole check-and-insert and nothing inside awaits.
    pub async fn admit(&self, address: &str) -> bool {
        if !self.is_enabled() {
            return true;
        }

        let mut cache = self.cache.lock().await;
        let admitted = cache.admit(address);
        if !admitted {
            debug!(address, "Duplicate address suppressed");
        }
        admitted
    }

    /// Seed with persisted addresses (newest first)
    pub async fn prime(&self, newest_first: Vec<String>) -> usize {
        if !self.is_enabled() {
            return 0;
        }

        let loaded = self.cache.lock().await.prime(newest_first);
        info!(loaded, "Primed dedup cache from history");
        loaded
    }

    /// Forget every address; returns how many were dropped
    pub async fn clear(&self) -> usize {
        let mut cache = self.cache.lock().await;
        let dropped = cache.len();
        cache.clear();
        info!(dropped, "Dedup cache cleared");
        dropped
    }

    /// (size, capacity)
    pub async fn stats(&self) -> (usize, usize) {
        let cache = self.cache.lock().await;
        (cache.len(), cache.capacity())
    }
}
