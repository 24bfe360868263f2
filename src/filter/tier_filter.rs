//! Tier threshold filtering
//!
//! Decides whether an extracted record clears the currently configured
//! policy tier.

use crate::extract::ExtractedRecord;
use crate::filter::types::{PolicyTier, Tier};

/// Reason why a record was filtered
#[derive(Debug, Clone, PartialEq)]
pub enum FilterReason {
    /// Record tier is below the policy threshold
    BelowThreshold { tier: Tier, policy: PolicyTier },
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterReason::BelowThreshold { tier, policy } => {
                write!(f, "tier {} below current filter level {}", tier, policy)
            }
        }
    }
}

/// Filter result
#[derive(Debug, Clone, PartialEq)]
pub enum FilterResult {
    /// Record clears the threshold
    Pass,
    /// Record was filtered
    Filtered(FilterReason),
}

impl FilterResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, FilterResult::Pass)
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self, FilterResult::Filtered(_))
    }
}

/// Compare a tier against a policy. `All` always passes.
pub fn tier_passes(tier: Tier, policy: PolicyTier) -> bool {
    match policy.threshold() {
        None => true,
        Some(threshold) => tier.priority() >= threshold,
    }
}

/// Pure forwarding decision for a record under a policy
pub fn should_forward(record: &ExtractedRecord, policy: PolicyTier) -> bool {
    tier_passes(record.tier, policy)
}

/// Same decision with the rejection reason attached
pub fn check(record: &ExtractedRecord, policy: PolicyTier) -> FilterResult {
    if should_forward(record, policy) {
        FilterResult::Pass
    } else {
        FilterResult::Filtered(FilterReason::BelowThreshold {
            tier: record.tier,
            policy,
        })
    }
}
