//! Bounded deduplication guard.
//!
//! Remembers a bounded set of keys with oldest-first eviction so memory
//! usage stays predictable in long-running processes. Used by the mempool
//! (transfer dedup keys) and the settlement engine (entry dedup keys).
//!
//! Every insert is stamped with a generation. A removed key leaves its slot
//! in the eviction queue; eviction skips slots whose generation no longer
//! matches, and the queue is compacted once stale slots outnumber live ones.

use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
};

/// Bounded set of seen keys with FIFO eviction.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard<K: Eq + Hash + Clone> {
    /// Live keys and the generation of their current slot.
    seen: HashMap<K, u64>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<(K, u64)>,
    next_generation: u64,
    max_size: usize,
}

impl<K: Eq + Hash + Clone> IdempotencyGuard<K> {
    /// Create a new guard remembering at most `max_size` keys.
    ///
    /// # Panics
    /// Panics if `max_size` is zero.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "IdempotencyGuard max_size must be > 0");
        Self {
            seen: HashMap::new(),
            order: VecDeque::new(),
            next_generation: 0,
            max_size,
        }
    }

    /// Record `key`. Returns `false` if it was already present.
    pub fn insert(&mut self, key: K) -> bool {
        if self.seen.contains_key(&key) {
            return false;
        }

        if self.seen.len() >= self.max_size {
            self.evict_oldest();
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.seen.insert(key.clone(), generation);
        self.order.push_back((key, generation));

        if self.order.len() > self.max_size.saturating_mul(2) {
            self.compact();
        }
        true
    }

    fn evict_oldest(&mut self) {
        while let Some((oldest, generation)) = self.order.pop_front() {
            if self.seen.get(&oldest) == Some(&generation) {
                self.seen.remove(&oldest);
                return;
            }
        }
    }

    /// Drop slots of removed or re-inserted keys.
    fn compact(&mut self) {
        let seen = &self.seen;
        self.order.retain(|(k, g)| seen.get(k) == Some(g));
    }

    /// Forget `key` so it may be admitted again.
    pub fn remove(&mut self, key: &K) -> bool {
        self.seen.remove(key).is_some()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.seen.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_insert_ok_second_rejected() {
        let mut guard = IdempotencyGuard::new(10);
        assert!(guard.insert("a"));
        assert!(!guard.insert("a"));
        assert_eq!(guard.len(), 1);
    }

    #[test]
    fn evicts_oldest() {
        let mut guard = IdempotencyGuard::new(3);
        for k in 1..=4 {
            assert!(guard.insert(k));
        }
        assert_eq!(guard.len(), 3);
        assert!(!guard.contains(&1), "1 should have been evicted");
        assert!(guard.contains(&2));
        assert!(guard.contains(&4));
    }

    #[test]
    fn removed_key_can_be_reinserted() {
        let mut guard = IdempotencyGuard::new(3);
        guard.insert(1);
        assert!(guard.remove(&1));
        assert!(guard.insert(1));
    }

    #[test]
    fn eviction_skips_removed_slots() {
        let mut guard = IdempotencyGuard::new(2);
        guard.insert(1);
        guard.insert(2);
        guard.remove(&1);
        guard.insert(3);
        // At capacity: the stale slot for 1 is skipped, 2 is evicted.
        guard.insert(4);
        assert!(!guard.contains(&2));
        assert!(guard.contains(&3));
        assert!(guard.contains(&4));
    }

    #[test]
    fn reinserted_key_outlives_older_keys() {
        let mut guard = IdempotencyGuard::new(2);
        guard.insert("a");
        guard.insert("b");
        guard.remove(&"a");
        guard.insert("a");
        // At capacity: "b" is now the oldest live key, not the re-inserted "a".
        guard.insert("c");
        assert!(guard.contains(&"a"));
        assert!(!guard.contains(&"b"));
        assert!(guard.contains(&"c"));
    }

    #[test]
    fn insert_remove_churn_stays_bounded() {
        let mut guard = IdempotencyGuard::new(1000);
        for k in 0..100_000u32 {
            assert!(guard.insert(k));
            assert!(guard.remove(&k));
        }
        assert!(guard.is_empty());
        assert!(guard.order.len() <= 2 * guard.capacity());
    }

    #[test]
    fn compaction_keeps_eviction_order() {
        let mut guard = IdempotencyGuard::new(3);
        guard.insert(1);
        guard.insert(2);
        for k in 100..110 {
            guard.insert(k);
            guard.remove(&k);
        }
        guard.insert(3);
        guard.insert(4);
        assert!(!guard.contains(&1));
        assert!(guard.contains(&2));
        assert!(guard.contains(&3));
        assert!(guard.contains(&4));
    }

    #[test]
    #[should_panic(expected = "max_size must be > 0")]
    fn zero_max_size_panics() {
        let _ = IdempotencyGuard::<u8>::new(0);
    }
}
