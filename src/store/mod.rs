//! Settings and forward history persistence
//!
//! Two concerns: the saved filter level (key `filter_level`) and the table
//! of addresses already forwarded, used to prime the dedup cache after a
//! restart.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::extract::ExtractedRecord;
use crate::filter::types::{PolicyTier, Tier};

pub use sqlite::SqliteHistoryStore;

/// Settings key holding the saved filter level
pub const FILTER_LEVEL_KEY: &str = "filter_level";

/// One forwarded address as persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeenRecord {
    pub address: String,
    pub tier: Tier,
    pub twitter_score: u64,
    pub market_value_k: u64,
    pub follower_count: u64,
    pub first_seen: DateTime<Utc>,
}

impl SeenRecord {
    pub fn from_record(record: &ExtractedRecord, seen_at: DateTime<Utc>) -> Self {
        Self {
            address: record.contract_address.clone(),
            tier: record.tier,
            twitter_score: record.twitter_score,
            market_value_k: record.market_value_k,
            follower_count: record.follower_count,
            first_seen: seen_at,
        }
    }
}

/// Persistence operations the relay depends on
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Saved filter level, if any
    async fn load_tier(&self) -> Result<Option<String>>;

    /// Save the filter level (upsert)
    async fn save_tier(&self, tier: PolicyTier) -> Result<()>;

    /// Up to `limit` addresses, most recently first-seen first
    async fn recent_addresses(&self, limit: usize) -> Result<Vec<String>>;

    /// Insert unless the address exists. Returns whether a row was added.
    async fn record_seen(&self, record: &SeenRecord) -> Result<bool>;

    /// Up to `limit` full records, newest first
    async fn recent_records(&self, limit: usize) -> Result<Vec<SeenRecord>>;

    /// Delete all history rows, returning how many were removed
    async fn clear_seen(&self) -> Result<usize>;
}
