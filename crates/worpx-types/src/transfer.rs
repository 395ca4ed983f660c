//! Pending transfer model for the transaction mempool.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgentId, Chain, ChannelId, EntryId, Token};

/// A transfer intent as submitted by an agent, before admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    pub from: AgentId,
    pub to: AgentId,
    /// The channel the payment is drawn from.
    pub channel_id: ChannelId,
    pub chain: Chain,
    pub token: Token,
    pub amount: Decimal,
    /// Sender's sequence number on `chain`.
    pub nonce: u64,
    /// Higher is served first.
    pub priority: i64,
    /// Tie-breaker after priority; higher is served first.
    pub gas_price: u64,
    /// Opaque signature blob produced by the sender.
    pub signature: String,
}

impl TransferIntent {
    /// The deduplication key for this intent.
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            from: self.from.clone(),
            to: self.to.clone(),
            chain: self.chain,
            nonce: self.nonce,
        }
    }
}

/// `(sender, receiver, chain, nonce)`: admitted at most once while unconfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DedupKey {
    pub from: AgentId,
    pub to: AgentId,
    pub chain: Chain,
    pub nonce: u64,
}

/// An admitted transfer waiting to be batched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub id: EntryId,
    pub intent: TransferIntent,
    pub added_at: DateTime<Utc>,
    /// Number of processing attempts recorded via `mark_attempt`.
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
}

/// Aggregate mempool statistics for admission-control policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolStats {
    pub size: usize,
    /// Age of the oldest entry in milliseconds (0 when empty).
    pub oldest_entry_age_ms: i64,
    /// Mean priority (0.0 when empty).
    pub avg_priority: f64,
    pub by_chain: BTreeMap<Chain, usize>,
}

/// Per-sender mempool statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMempoolStats {
    pub agent: AgentId,
    pub pending: usize,
    pub oldest_entry_age_ms: i64,
    pub total_amount: Decimal,
}
