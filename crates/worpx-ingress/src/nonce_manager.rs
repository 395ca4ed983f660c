//! Nonce manager: the sequencing authority for agent transfers.
//!
//! Each `(agent, chain)` pair owns an independent, strictly increasing
//! sequence. A nonce moves through:
//!
//! ```text
//! allocate ──▶ PENDING ──confirm(tx_hash)──▶ CONFIRMED
//!                 │
//!                 └──release──▶ (slot removed)
//! ```
//!
//! Confirmed slots are permanent. Released nonces are never handed out
//! again; the hole they leave is reported by [`NonceManager::detect_gaps`]
//! once a later nonce confirms.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use worpx_types::{AgentId, Chain, Result, SharedClock, WorpxError, system_clock};

/// A confirmed nonce slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedSlot {
    pub tx_hash: String,
    pub confirmed_at: DateTime<Utc>,
}

/// Sequence state of one `(agent, chain)` pair.
#[derive(Debug, Clone, Default)]
struct Sequence {
    /// Next nonce to hand out.
    next: u64,
    /// Allocated, not yet confirmed. Value is the allocation time.
    pending: BTreeMap<u64, DateTime<Utc>>,
    confirmed: BTreeMap<u64, ConfirmedSlot>,
}

/// Missing nonces below the highest confirmed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceGap {
    pub agent: AgentId,
    pub chain: Chain,
    pub missing: Vec<u64>,
    pub max_confirmed: u64,
}

/// Allocates and tracks per-agent, per-chain sequence numbers.
///
/// Sequences are sharded by `(agent, chain)`; operations on one pair never
/// wait on another.
pub struct NonceManager {
    sequences: DashMap<(AgentId, Chain), Sequence>,
    clock: SharedClock,
}

impl NonceManager {
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            sequences: DashMap::new(),
            clock,
        }
    }

    /// Allocate the next nonce for `(agent, chain)` and record it as pending.
    pub fn allocate(&self, agent: &AgentId, chain: Chain) -> u64 {
        let now = self.clock.now();
        let mut seq = self.sequences.entry((agent.clone(), chain)).or_default();
        let nonce = seq.next;
        seq.next += 1;
        seq.pending.insert(nonce, now);
        tracing::debug!(agent = %agent, chain = %chain, nonce, "nonce allocated");
        nonce
    }

    /// Attach the external transaction hash to an allocated nonce.
    ///
    /// # Errors
    /// - `NonceAlreadyConfirmed` if the nonce was confirmed before
    /// - `NonceNotAllocated` if it was never allocated or has been released
    pub fn confirm(
        &self,
        agent: &AgentId,
        chain: Chain,
        nonce: u64,
        tx_hash: impl Into<String>,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut seq = self
            .sequences
            .get_mut(&(agent.clone(), chain))
            .ok_or_else(|| not_allocated(agent, chain, nonce))?;

        if seq.confirmed.contains_key(&nonce) {
            return Err(WorpxError::NonceAlreadyConfirmed {
                agent: agent.clone(),
                chain,
                nonce,
            });
        }
        if seq.pending.remove(&nonce).is_none() {
            return Err(not_allocated(agent, chain, nonce));
        }

        let tx_hash = tx_hash.into();
        tracing::debug!(agent = %agent, chain = %chain, nonce, tx_hash = %tx_hash, "nonce confirmed");
        seq.confirmed.insert(
            nonce,
            ConfirmedSlot {
                tx_hash,
                confirmed_at: now,
            },
        );
        Ok(())
    }

    /// Drop an allocated-but-unconfirmed nonce after a local abort.
    ///
    /// Returns `Ok(false)` if no such pending slot exists.
    ///
    /// # Errors
    /// `NonceAlreadyConfirmed`: confirmed slots can never be released.
    pub fn release(&self, agent: &AgentId, chain: Chain, nonce: u64) -> Result<bool> {
        let Some(mut seq) = self.sequences.get_mut(&(agent.clone(), chain)) else {
            return Ok(false);
        };
        if seq.confirmed.contains_key(&nonce) {
            return Err(WorpxError::NonceAlreadyConfirmed {
                agent: agent.clone(),
                chain,
                nonce,
            });
        }
        let released = seq.pending.remove(&nonce).is_some();
        if released {
            tracing::debug!(agent = %agent, chain = %chain, nonce, "nonce released");
        }
        Ok(released)
    }

    /// Report every integer below the highest confirmed nonce that is not
    /// itself confirmed, or `None` if the confirmed run is contiguous.
    #[must_use]
    pub fn detect_gaps(&self, agent: &AgentId, chain: Chain) -> Option<NonceGap> {
        let seq = self.sequences.get(&(agent.clone(), chain))?;
        let (&max_confirmed, _) = seq.confirmed.last_key_value()?;
        let missing: Vec<u64> = (0..max_confirmed)
            .filter(|n| !seq.confirmed.contains_key(n))
            .collect();
        if missing.is_empty() {
            return None;
        }
        tracing::warn!(
            agent = %agent,
            chain = %chain,
            missing = ?missing,
            "nonce gap detected"
        );
        Some(NonceGap {
            agent: agent.clone(),
            chain,
            missing,
            max_confirmed,
        })
    }

    /// Pending nonces in ascending order.
    #[must_use]
    pub fn pending(&self, agent: &AgentId, chain: Chain) -> Vec<u64> {
        self.sequences
            .get(&(agent.clone(), chain))
            .map(|seq| seq.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_pending(&self, agent: &AgentId, chain: Chain, nonce: u64) -> bool {
        self.sequences
            .get(&(agent.clone(), chain))
            .is_some_and(|seq| seq.pending.contains_key(&nonce))
    }

    #[must_use]
    pub fn confirmed_count(&self, agent: &AgentId, chain: Chain) -> usize {
        self.sequences
            .get(&(agent.clone(), chain))
            .map_or(0, |seq| seq.confirmed.len())
    }

    /// The confirmation record of `nonce`, if confirmed.
    #[must_use]
    pub fn confirmation(&self, agent: &AgentId, chain: Chain, nonce: u64) -> Option<ConfirmedSlot> {
        self.sequences
            .get(&(agent.clone(), chain))
            .and_then(|seq| seq.confirmed.get(&nonce).cloned())
    }

    /// Forget all slots of `(agent, chain)` and restart its sequence at
    /// `start`. Used after an operator resynchronises with the chain.
    pub fn reset_agent(&self, agent: &AgentId, chain: Chain, start: u64) {
        tracing::info!(agent = %agent, chain = %chain, start, "nonce sequence reset");
        self.sequences.insert(
            (agent.clone(), chain),
            Sequence {
                next: start,
                ..Sequence::default()
            },
        );
    }
}

impl Default for NonceManager {
    fn default() -> Self {
        Self::new(system_clock())
    }
}

fn not_allocated(agent: &AgentId, chain: Chain, nonce: u64) -> WorpxError {
    WorpxError::NonceNotAllocated {
        agent: agent.clone(),
        chain,
        nonce,
    }
}
