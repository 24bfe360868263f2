//! Tier filtering module
//!
//! Holds the tier model, the process-wide policy and the pure
//! forwarding decision.

pub mod policy;
pub mod tier_filter;
pub mod types;

pub use policy::PolicyState;
pub use tier_filter::{should_forward, FilterReason, FilterResult};
pub use types::{PolicyTier, Tier};
