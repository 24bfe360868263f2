//! Process-wide filter policy

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::filter::types::PolicyTier;

/// Shared current filter level
///
/// Handlers take a snapshot with `current()` once per event; only admin
/// commands call `set`.
#[derive(Clone, Default)]
pub struct PolicyState {
    current: Arc<RwLock<PolicyTier>>,
}

impl PolicyState {
    pub fn new(initial: PolicyTier) -> Self {
        Self {
            current: Arc::new(RwLock::new(initial)),
        }
    }

    /// Current filter level
    pub async fn current(&self) -> PolicyTier {
        *self.current.read().await
    }

    /// Replace the filter level, returning the previous one
    pub async fn set(&self, tier: PolicyTier) -> PolicyTier {
        let mut guard = self.current.write().await;
        let previous = std::mem::replace(&mut *guard, tier);
        info!(from = %previous, to = %tier, "Filter level changed");
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_is_normal() {
        let policy = PolicyState::default();
        assert_eq!(policy.current().await, PolicyTier::Normal);
    }

    #[tokio::test]
    async fn test_set_is_shared_between_clones() {
        let policy = PolicyState::new(PolicyTier::Bad);
        let handle = policy.clone();

        let previous = handle.set(PolicyTier::Excellent).await;
        assert_eq!(previous, PolicyTier::Bad);
        assert_eq!(policy.current().await, PolicyTier::Excellent);
    }
}
