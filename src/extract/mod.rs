//! Announcement extraction
//!
//! Parses token announcements into structured records using ordered
//! pattern cascades (see `cascade`).

pub mod cascade;
pub mod parser;

use serde::Serialize;

use crate::filter::types::Tier;

pub use cascade::{Cascade, CascadeMatch, Strategy};
pub use parser::{infer_tier, Extractor, ExtractorOptions};

/// Structured announcement extracted from a message body
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractedRecord {
    /// Contract address (mint). Never empty on a parsed record.
    pub contract_address: String,
    /// Name of the address strategy that matched
    pub address_strategy: &'static str,
    pub tier: Tier,
    pub twitter_score: u64,
    /// Market value in thousands
    pub market_value_k: u64,
    pub follower_count: u64,
    pub raw_text: String,
}
