//! Transaction mempool: admission, deduplication and priority ordering of
//! pending transfers before they are applied and batched.
//!
//! ## Ordering
//!
//! Entries are served by `priority` descending, then `gas_price`
//! descending, then arrival order. Under capacity pressure the entry that
//! would be served **last** is evicted before the new one is admitted.
//!
//! ## Deduplication
//!
//! A `(from, to, chain, nonce)` tuple is admitted at most once while
//! unconfirmed. The key stays remembered after the entry is popped (the
//! transfer is in flight); it is forgotten when the entry is evicted,
//! pruned, or removed without being processed.

use std::{cmp::Ordering, collections::HashMap};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use worpx_types::{
    AgentId, AgentMempoolStats, DedupKey, EntryId, IdempotencyGuard, MempoolConfig, MempoolEntry,
    MempoolStats, SharedClock, TransferIntent, system_clock,
};

/// Pool contents. Always accessed under the mempool mutex.
struct Pool {
    entries: HashMap<EntryId, MempoolEntry>,
    seen: IdempotencyGuard<DedupKey>,
}

/// Bounded priority pool of pending transfers.
pub struct Mempool {
    pool: Mutex<Pool>,
    config: MempoolConfig,
    clock: SharedClock,
}

/// Service order: `Less` is served first.
fn service_order(a: &MempoolEntry, b: &MempoolEntry) -> Ordering {
    b.intent
        .priority
        .cmp(&a.intent.priority)
        .then_with(|| b.intent.gas_price.cmp(&a.intent.gas_price))
        .then_with(|| a.added_at.cmp(&b.added_at))
        .then_with(|| a.id.cmp(&b.id))
}

fn age_ms(now: DateTime<Utc>, since: DateTime<Utc>) -> i64 {
    (now - since).num_milliseconds().max(0)
}

impl Mempool {
    /// The dedup window is raised to `config.max_size` if smaller, so a
    /// pooled entry's key is never evicted while the entry is live.
    ///
    /// # Panics
    /// Panics if both `config.dedup_window` and `config.max_size` are zero
    /// (rejected by `LedgerConfig::validate`).
    #[must_use]
    pub fn new(config: MempoolConfig, clock: SharedClock) -> Self {
        let window = config.dedup_window.max(config.max_size);
        if window != config.dedup_window {
            tracing::warn!(
                dedup_window = config.dedup_window,
                max_size = config.max_size,
                "mempool dedup window raised to pool capacity"
            );
        }
        Self {
            pool: Mutex::new(Pool {
                entries: HashMap::new(),
                seen: IdempotencyGuard::new(window),
            }),
            config,
            clock,
        }
    }

    /// Admit a transfer intent.
    ///
    /// Returns `None` if an entry with the same dedup key was already
    /// admitted. Duplicate submission is an expected race under retry, not
    /// an error.
    pub fn admit(&self, intent: TransferIntent) -> Option<EntryId> {
        let now = self.clock.now();
        let key = intent.dedup_key();
        let mut pool = self.pool.lock();

        if pool.seen.contains(&key) {
            tracing::debug!(from = %key.from, chain = %key.chain, nonce = key.nonce, "duplicate transfer ignored");
            return None;
        }

        if pool.entries.len() >= self.config.max_size {
            Self::evict_lowest(&mut pool);
        }

        let id = EntryId::new();
        pool.seen.insert(key);
        pool.entries.insert(
            id,
            MempoolEntry {
                id,
                intent,
                added_at: now,
                attempts: 0,
                last_attempt: None,
            },
        );
        tracing::debug!(entry_id = %id, size = pool.entries.len(), "transfer admitted");
        Some(id)
    }

    fn evict_lowest(pool: &mut Pool) {
        let victim = pool
            .entries
            .values()
            .max_by(|a, b| service_order(a, b))
            .map(|e| e.id);
        let Some(entry) = victim.and_then(|id| pool.entries.remove(&id)) else {
            return;
        };
        pool.seen.remove(&entry.intent.dedup_key());
        tracing::info!(
            entry_id = %entry.id,
            priority = entry.intent.priority,
            "mempool full, evicted lowest-priority entry"
        );
    }

    /// Remove and return up to `count` entries in service order.
    ///
    /// Consuming: the returned entries are no longer in the pool.
    pub fn pop_highest_priority(&self, count: usize) -> Vec<MempoolEntry> {
        let mut pool = self.pool.lock();
        let mut ordered: Vec<&MempoolEntry> = pool.entries.values().collect();
        ordered.sort_by(|a, b| service_order(a, b));
        let ids: Vec<EntryId> = ordered.into_iter().take(count).map(|e| e.id).collect();
        ids.iter()
            .filter_map(|id| pool.entries.remove(id))
            .collect()
    }

    /// Remove entries older than the configured maximum age, regardless of
    /// priority. Returns the pruned entries so their nonces can be released.
    pub fn prune_expired(&self) -> Vec<MempoolEntry> {
        let cutoff = self.clock.now() - self.config.max_age();
        let mut pool = self.pool.lock();
        let expired: Vec<EntryId> = pool
            .entries
            .values()
            .filter(|e| e.added_at < cutoff)
            .map(|e| e.id)
            .collect();
        let mut pruned = Vec::with_capacity(expired.len());
        for id in &expired {
            if let Some(entry) = pool.entries.remove(id) {
                pool.seen.remove(&entry.intent.dedup_key());
                pruned.push(entry);
            }
        }
        if !pruned.is_empty() {
            tracing::info!(pruned = pruned.len(), "pruned expired mempool entries");
        }
        pruned
    }

    /// Record a processing attempt. Returns `false` if the entry is gone.
    pub fn mark_attempt(&self, id: &EntryId) -> bool {
        let now = self.clock.now();
        let mut pool = self.pool.lock();
        let Some(entry) = pool.entries.get_mut(id) else {
            return false;
        };
        entry.attempts += 1;
        entry.last_attempt = Some(now);
        true
    }

    /// Drop an entry without processing it; its dedup key is forgotten.
    pub fn remove(&self, id: &EntryId) -> Option<MempoolEntry> {
        let mut pool = self.pool.lock();
        let entry = pool.entries.remove(id)?;
        pool.seen.remove(&entry.intent.dedup_key());
        Some(entry)
    }

    /// Forget a dedup key so the same tuple may be submitted again.
    ///
    /// Called when a popped transfer was rejected downstream.
    pub fn forget(&self, key: &DedupKey) -> bool {
        self.pool.lock().seen.remove(key)
    }

    #[must_use]
    pub fn get(&self, id: &EntryId) -> Option<MempoolEntry> {
        self.pool.lock().entries.get(id).cloned()
    }

    /// Entries sent by `agent`, in service order.
    #[must_use]
    pub fn entries_by_agent(&self, agent: &AgentId) -> Vec<MempoolEntry> {
        let pool = self.pool.lock();
        let mut out: Vec<MempoolEntry> = pool
            .entries
            .values()
            .filter(|e| &e.intent.from == agent)
            .cloned()
            .collect();
        out.sort_by(service_order);
        out
    }

    #[must_use]
    pub fn stats(&self) -> MempoolStats {
        let now = self.clock.now();
        let pool = self.pool.lock();
        let size = pool.entries.len();
        let mut stats = MempoolStats {
            size,
            oldest_entry_age_ms: 0,
            avg_priority: 0.0,
            by_chain: Default::default(),
        };
        if size == 0 {
            return stats;
        }

        let mut priority_sum: i128 = 0;
        let mut oldest = now;
        for e in pool.entries.values() {
            *stats.by_chain.entry(e.intent.chain).or_insert(0) += 1;
            priority_sum += i128::from(e.intent.priority);
            oldest = oldest.min(e.added_at);
        }
        stats.oldest_entry_age_ms = age_ms(now, oldest);
        #[allow(clippy::cast_precision_loss)]
        let avg = priority_sum as f64 / size as f64;
        stats.avg_priority = avg;
        stats
    }

    #[must_use]
    pub fn agent_stats(&self, agent: &AgentId) -> AgentMempoolStats {
        let now = self.clock.now();
        let pool = self.pool.lock();
        let mut pending = 0;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut total_amount = Decimal::ZERO;
        for e in pool.entries.values().filter(|e| &e.intent.from == agent) {
            pending += 1;
            oldest = Some(oldest.map_or(e.added_at, |o| o.min(e.added_at)));
            total_amount += e.intent.amount;
        }
        AgentMempoolStats {
            agent: agent.clone(),
            pending,
            oldest_entry_age_ms: oldest.map_or(0, |o| age_ms(now, o)),
            total_amount,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new(MempoolConfig::default(), system_clock())
    }
}
