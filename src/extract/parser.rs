//! Announcement parser
//!
//! Turns a free-text announcement into an `ExtractedRecord`. Each field has
//! its own cascade, from the most specific labeled form down to the loosest
//! fallback. Only the address is mandatory.

use tracing::debug;

use crate::error::Result;
use crate::extract::cascade::Cascade;
use crate::extract::ExtractedRecord;
use crate::filter::types::Tier;

/// Base58 alphabet (no 0, O, I, l)
const BASE58: &str = "1-9A-HJ-NP-Za-km-z";

/// Decoded length of a Solana public key
const PUBKEY_LEN: usize = 32;

/// Extractor options
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractorOptions {
    /// Require every address candidate to decode as a 32-byte base58 key
    pub strict_address: bool,
}

/// Cascading field extractor
pub struct Extractor {
    address: Cascade<String>,
    tier: Cascade<Tier>,
    twitter_score: Cascade<u64>,
    market_value_k: Cascade<u64>,
    followers: Cascade<u64>,
}

impl Extractor {
    /// Build the extractor with the default (lenient) options
    pub fn new() -> Result<Self> {
        Self::with_options(ExtractorOptions::default())
    }

    pub fn with_options(options: ExtractorOptions) -> Result<Self> {
        let accept_address: fn(&str) -> Option<String> = if options.strict_address {
            base58_pubkey
        } else {
            non_empty
        };

        let address = Cascade::new("address")
            .with("marker_label", r"🪙\s*CA\s*地址\s*[:：]\s*(\S+)", accept_address)?
            .with(
                "ca_label",
                &format!(r"(?i:\bCA)(?:\s*地址)?\s*[:：]\s*([{BASE58}]{{32,44}})(?:$|[^A-Za-z0-9])"),
                accept_address,
            )?
            .with(
                "contract_label",
                r"(?i)\b(?:contract(?:\s+address)?|token\s+address|mint|address)\s*[:：]\s*([A-Za-z0-9]{32,44})(?:$|[^A-Za-z0-9])",
                accept_address,
            )?
            .with(
                "bare",
                r"(?:^|[^A-Za-z0-9])([A-Za-z0-9]{40,44})(?:$|[^A-Za-z0-9])",
                accept_address,
            )?;

        let tier = Cascade::new("tier")
            .with("zh_label", r"等级\s*[:：]\s*(\w+)", known_tier)?
            .with("level_label", r"(?i)\blevel\s*[:：]\s*(\w+)", known_tier)?
            .with("tier_label", r"(?i)\btier\s*[:：]\s*(\w+)", known_tier)?
            .with("rating_label", r"(?i)\brating\s*[:：]\s*(\w+)", known_tier)?;

        let twitter_score = Cascade::new("twitter_score")
            .with("marker_label", r"📊\s*Twi+t+er\s*评分\s*[:：]\s*(\d+)", number)?
            .with("zh_label", r"评分\s*[:：]\s*(\d+)", number)?
            .with("en_label", r"(?i)\btwitter\s*score\s*[:：]\s*(\d+)", number)?;

        let market_value_k = Cascade::new("market_value_k")
            .with("marker_label", r"💰\s*当前市值\s*[:：]\s*(\d+)\s*[Kk]", number)?
            .with("zh_label", r"市值\s*[:：]\s*\$?(\d+)\s*[Kk]", number)?
            .with(
                "en_label",
                r"(?i)\b(?:market\s*(?:value|cap)|mcap|mc)\s*[:：]\s*\$?(\d+)\s*k",
                number,
            )?;

        let followers = Cascade::new("followers")
            .with("marker_label", r"🙎\s*粉丝数\s*[:：]\s*(\d+)", number)?
            .with("zh_label", r"粉丝数?\s*[:：]\s*(\d+)", number)?
            .with("en_label", r"(?i)\bfollowers?\s*[:：]\s*(\d+)", number)?;

        Ok(Self {
            address,
            tier,
            twitter_score,
            market_value_k,
            followers,
        })
    }

    /// Parse an announcement. Returns `None` when no address strategy matches.
    pub fn parse(&self, text: &str) -> Option<ExtractedRecord> {
        let address = self.address.first_match(text)?;

        let tier = match self.tier.first_match(text) {
            Some(m) => m.value,
            None => infer_tier(text),
        };

        let record = ExtractedRecord {
            contract_address: address.value,
            address_strategy: address.strategy,
            tier,
            twitter_score: self.twitter_score.value_or(text, 0),
            market_value_k: self.market_value_k.value_or(text, 0),
            follower_count: self.followers.value_or(text, 0),
            raw_text: text.to_string(),
        };

        debug!(
            address = %record.contract_address,
            strategy = record.address_strategy,
            tier = %record.tier,
            "Parsed announcement"
        );

        Some(record)
    }

    /// Address strategy names in precedence order
    pub fn address_strategies(&self) -> Vec<&'static str> {
        self.address.strategy_names()
    }
}

/// Substring fallback: first tier name found, probing Excellent, Good,
/// Normal, Bad in that order
pub fn infer_tier(text: &str) -> Tier {
    let lowered = text.to_lowercase();
    Tier::HEURISTIC_ORDER
        .into_iter()
        .find(|tier| lowered.contains(&tier.as_str().to_ascii_lowercase()))
        .unwrap_or(Tier::Unknown)
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn base58_pubkey(s: &str) -> Option<String> {
    let s = s.trim();
    let bytes = bs58::decode(s).into_vec().ok()?;
    (bytes.len() == PUBKEY_LEN).then(|| s.to_string())
}

fn known_tier(s: &str) -> Option<Tier> {
    Some(Tier::from_label(s)).filter(|t| t.is_known())
}

fn number(s: &str) -> Option<u64> {
    s.parse().ok()
}
