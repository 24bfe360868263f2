//! Bounded FIFO membership set

use std::collections::{HashSet, VecDeque};

/// Default number of addresses remembered
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded set of contract addresses
///
/// Membership is O(1) through the set; the deque keeps insertion order so
/// the oldest address is the one evicted once capacity is exceeded.
/// Re-admitting a member changes nothing, including its position.
#[derive(Debug, Clone)]
pub struct DedupCache {
    capacity: usize,
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl DedupCache {
    /// Create a cache holding at most `capacity` addresses (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
        }
    }

    /// Insert a new address. Returns false if it was already present.
    pub fn admit(&mut self, address: &str) -> bool {
        if self.members.contains(address) {
            return false;
        }

        self.members.insert(address.to_string());
        self.order.push_back(address.to_string());

        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }

        true
    }

    /// Load persisted addresses given newest first.
    ///
    /// They are inserted oldest first so eviction order follows first-seen
    /// time. Returns how many were newly inserted.
    pub fn prime<I>(&mut self, newest_first: I) -> usize
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: DoubleEndedIterator,
    {
        newest_first
            .into_iter()
            .rev()
            .filter(|address| self.admit(address))
            .count()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.members.contains(address)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest address, next in line for eviction
    pub fn oldest(&self) -> Option<&str> {
        self.order.front().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
