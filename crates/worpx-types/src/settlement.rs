//! Settlement batch model.
//!
//! Channel payments become signed [`SettlementEntry`] deltas, which the
//! settlement engine groups per chain into [`SettlementBatch`]es:
//!
//! ```text
//! PENDING ──submit──▶ PROCESSING ──finalize──▶ FINALIZED
//!    │                    │
//!    └──── conservation ──┴──── chain rejected ──▶ FAILED
//! ```
//!
//! Finalization is one-directional; FINALIZED and FAILED are terminal.

use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgentId, BatchId, Chain, ChannelId, DedupKey, Token};

/// A signed payment delta between two agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementEntry {
    pub channel_id: ChannelId,
    pub from: AgentId,
    pub to: AgentId,
    pub chain: Chain,
    pub token: Token,
    pub amount: Decimal,
    /// Sender's sequence number on `chain`.
    pub nonce: u64,
    /// Opaque signature blob over the entry.
    pub signature: String,
}

impl SettlementEntry {
    /// Deduplication key: one entry per `(from, to, chain, nonce)`.
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

/// Lifecycle status of a settlement batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Finalized,
    Failed,
}

impl BatchStatus {
    /// Can a batch move from this status to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Processing | Self::Failed)
                | (Self::Processing, Self::Finalized | Self::Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Processing => write!(f, "PROCESSING"),
            Self::Finalized => write!(f, "FINALIZED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Why a batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Net settlement was nonzero or the batch hash did not verify.
    /// Never retried.
    Malformed,
    /// The chain-submission collaborator reported a failure. Retryable.
    ChainRejected,
}

/// Failure record attached to a FAILED batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub kind: FailureKind,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// A bounded group of entries for one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementBatch {
    pub id: BatchId,
    pub chain: Chain,
    pub entries: Vec<SettlementEntry>,
    /// Exact sum of entry amounts.
    pub total_amount: Decimal,
    /// SHA-256 commitment over chain and entries.
    pub batch_hash: [u8; 32],
    pub status: BatchStatus,
    /// 1 for a fresh batch, incremented on each resubmission.
    pub attempt: u32,
    /// The failed batch this one resubmits, if any.
    pub retry_of: Option<BatchId>,
    /// The resubmission of this batch, once one has been created.
    pub superseded_by: Option<BatchId>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    /// Transaction hash reported by the chain-submission collaborator.
    pub tx_hash: Option<String>,
    pub failure: Option<BatchFailure>,
}

impl SettlementBatch {
    /// Distinct channels touched by this batch.
    #[must_use]
    pub fn channels(&self) -> BTreeSet<ChannelId> {
        self.entries.iter().map(|e| e.channel_id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
