//! # Escrow deposit: conditionally locked funds
//!
//! An escrow deposit locks an amount against exactly one release
//! condition, independently of any channel state.
//!
//! ## State Machine
//!
//! ```text
//!   ┌────────┐  condition holds  ┌──────────┐
//!   │ LOCKED ├──────────────────▶│ RELEASED │
//!   └─┬────┬─┘                   └──────────┘
//!     │    │ refund after expiry ┌──────────┐
//!     │    └────────────────────▶│ REFUNDED │
//!     │ sweep after expiry       └──────────┘
//!     ▼                               ▲
//!   ┌─────────┐       refund          │
//!   │ EXPIRED ├───────────────────────┘
//!   └─────────┘
//! ```
//!
//! RELEASED and REFUNDED are terminal and immutable. EXPIRED records the
//! sweep's intent; the balance only moves on the following refund.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgentId, Chain, EscrowId, Token};

/// Lifecycle status of an escrow deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Locked,
    Released,
    Refunded,
    Expired,
}

impl EscrowStatus {
    /// Can a deposit move from this status to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Locked, Self::Released | Self::Refunded | Self::Expired)
                | (Self::Expired, Self::Refunded)
        )
    }

    /// RELEASED and REFUNDED never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "LOCKED"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// The predicate that must hold before locked funds may be released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReleaseCondition {
    /// Released once the skill execution has been recorded.
    SkillCompletion {
        skill_id: String,
        execution_id: Option<String>,
    },
    /// Released at or after `unlock_at`.
    TimeLock { unlock_at: DateTime<Utc> },
    /// Released once `required_signatures` distinct signers have signed.
    MultiSig {
        required_signatures: u32,
        signatures: Vec<String>,
    },
    /// Evaluated by an external oracle collaborator; never true locally.
    Oracle {
        oracle_endpoint: String,
        expected_value: String,
    },
}

impl ReleaseCondition {
    /// Evaluate the condition locally at `now`.
    #[must_use]
    pub fn evaluate(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::SkillCompletion { execution_id, .. } => execution_id.is_some(),
            Self::TimeLock { unlock_at } => now >= *unlock_at,
            Self::MultiSig {
                required_signatures,
                signatures,
            } => signatures.len() >= *required_signatures as usize,
            Self::Oracle { .. } => false,
        }
    }

    /// Short name of the condition kind, for logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SkillCompletion { .. } => "skill_completion",
            Self::TimeLock { .. } => "time_lock",
            Self::MultiSig { .. } => "multi_sig",
            Self::Oracle { .. } => "oracle",
        }
    }
}

/// Funds locked against a release condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowDeposit {
    pub id: EscrowId,
    pub depositor: AgentId,
    pub beneficiary: AgentId,
    pub chain: Chain,
    pub token: Token,
    pub amount: Decimal,
    pub condition: ReleaseCondition,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set when the deposit reaches RELEASED or REFUNDED.
    pub settled_at: Option<DateTime<Utc>>,
}

impl EscrowDeposit {
    /// Whether the deposit's expiry has been reached at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether `agent` is the depositor or the beneficiary.
    #[must_use]
    pub fn is_party(&self, agent: &AgentId) -> bool {
        &self.depositor == agent || &self.beneficiary == agent
    }
}
