//! Tier types shared by extraction, filtering and persistence

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Quality tier attached to an announcement
///
/// Named tiers are totally ordered: Bad < Normal < Good < Excellent.
/// `Unknown` sits below all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Tier {
    Bad,
    Normal,
    Good,
    Excellent,
    #[default]
    Unknown,
}

impl Tier {
    /// Named tiers in the order the substring heuristic probes them
    pub const HEURISTIC_ORDER: [Tier; 4] = [Tier::Excellent, Tier::Good, Tier::Normal, Tier::Bad];

    /// Ordering priority (Unknown = -1)
    pub fn priority(self) -> i8 {
        match self {
            Tier::Bad => 0,
            Tier::Normal => 1,
            Tier::Good => 2,
            Tier::Excellent => 3,
            Tier::Unknown => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Bad => "Bad",
            Tier::Normal => "Normal",
            Tier::Good => "Good",
            Tier::Excellent => "Excellent",
            Tier::Unknown => "Unknown",
        }
    }

    /// Parse a tier label case-insensitively. Anything else is Unknown.
    pub fn from_label(label: &str) -> Tier {
        match label.trim().to_ascii_lowercase().as_str() {
            "bad" => Tier::Bad,
            "normal" => Tier::Normal,
            "good" => Tier::Good,
            "excellent" => Tier::Excellent,
            _ => Tier::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        self != Tier::Unknown
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Threshold tier configured by admins
///
/// `All` disables tier filtering entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PolicyTier {
    Bad,
    #[default]
    Normal,
    Good,
    Excellent,
    All,
}

impl PolicyTier {
    pub const ALL_VALUES: [PolicyTier; 5] = [
        PolicyTier::Bad,
        PolicyTier::Normal,
        PolicyTier::Good,
        PolicyTier::Excellent,
        PolicyTier::All,
    ];

    /// Minimum record priority this policy accepts, `None` for All
    pub fn threshold(self) -> Option<i8> {
        match self {
            PolicyTier::Bad => Some(Tier::Bad.priority()),
            PolicyTier::Normal => Some(Tier::Normal.priority()),
            PolicyTier::Good => Some(Tier::Good.priority()),
            PolicyTier::Excellent => Some(Tier::Excellent.priority()),
            PolicyTier::All => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyTier::Bad => "Bad",
            PolicyTier::Normal => "Normal",
            PolicyTier::Good => "Good",
            PolicyTier::Excellent => "Excellent",
            PolicyTier::All => "All",
        }
    }

    /// Parse a stored value, falling back to the default (Normal) when
    /// it is missing or unrecognised
    pub fn parse_or_default(value: Option<&str>) -> PolicyTier {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    /// Comma-separated list of accepted names, for help and error text
    pub fn names() -> String {
        Self::ALL_VALUES
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromStr for PolicyTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bad" => Ok(PolicyTier::Bad),
            "normal" => Ok(PolicyTier::Normal),
            "good" => Ok(PolicyTier::Good),
            "excellent" => Ok(PolicyTier::Excellent),
            "all" => Ok(PolicyTier::All),
            _ => Err(Error::InvalidTier(s.to_string())),
        }
    }
}

impl fmt::Display for PolicyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
