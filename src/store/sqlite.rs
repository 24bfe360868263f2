//! SQLite-backed history store
//!
//! The connection sits behind a synchronous `parking_lot::Mutex`; every
//! method does its SQL work without awaiting while the guard is held.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::filter::types::{PolicyTier, Tier};
use crate::store::{HistoryStore, SeenRecord, FILTER_LEVEL_KEY};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS seen_addresses (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    address        TEXT NOT NULL UNIQUE,
    tier           TEXT NOT NULL,
    twitter_score  INTEGER NOT NULL DEFAULT 0,
    market_value_k INTEGER NOT NULL DEFAULT 0,
    follower_count INTEGER NOT NULL DEFAULT 0,
    first_seen     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_seen_first_seen
    ON seen_addresses(first_seen);
";

/// History store in a single SQLite file
#[derive(Clone)]
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Storage(format!("open {}: {}", path.display(), e)))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        conn.execute_batch(SCHEMA)?;

        info!("Opened history store at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of persisted addresses
    pub fn seen_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM seen_addresses", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn load_tier(&self) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![FILTER_LEVEL_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn save_tier(&self, tier: PolicyTier) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![FILTER_LEVEL_KEY, tier.as_str()],
        )?;
        debug!(tier = %tier, "Saved filter level");
        Ok(())
    }

    async fn recent_addresses(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT address FROM seen_addresses
             ORDER BY first_seen DESC, id DESC
             LIMIT ?1",
        )?;
        let addresses = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(addresses)
    }

    async fn record_seen(&self, record: &SeenRecord) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO seen_addresses
                (address, tier, twitter_score, market_value_k, follower_count, first_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.address,
                record.tier.as_str(),
                record.twitter_score as i64,
                record.market_value_k as i64,
                record.follower_count as i64,
                record.first_seen.timestamp(),
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn recent_records(&self, limit: usize) -> Result<Vec<SeenRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT address, tier, twitter_score, market_value_k, follower_count, first_seen
             FROM seen_addresses
             ORDER BY first_seen DESC, id DESC
             LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], |row| {
                let first_seen: i64 = row.get(5)?;
                Ok(SeenRecord {
                    address: row.get(0)?,
                    tier: Tier::from_label(&row.get::<_, String>(1)?),
                    twitter_score: row.get::<_, i64>(2)?.max(0) as u64,
                    market_value_k: row.get::<_, i64>(3)?.max(0) as u64,
                    follower_count: row.get::<_, i64>(4)?.max(0) as u64,
                    first_seen: DateTime::<Utc>::from_timestamp(first_seen, 0)
                        .unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    async fn clear_seen(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM seen_addresses", [])?;
        info!(removed, "Cleared forward history");
        Ok(removed)
    }
}
