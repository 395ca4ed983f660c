//! Payment channel model.
//!
//! A channel is a bilateral off-chain ledger between two agents backed by
//! an on-chain deposit. Lifecycle:
//! **PROPOSED → FUNDED → ACTIVE ⇄ DISPUTING → SETTLING → CLOSED**

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgentId, Chain, ChannelId, Token};

/// Lifecycle phase of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPhase {
    /// Proposed by the initiator, no deposit yet.
    Proposed,
    /// Deposit recorded.
    Funded,
    /// Accepting payments.
    Active,
    /// A party contested the channel; a dispute window is open.
    Disputing,
    /// Final balances are being settled on-chain.
    Settling,
    /// Terminal.
    Closed,
}

impl ChannelPhase {
    /// Whether the phase is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ChannelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Proposed => write!(f, "PROPOSED"),
            Self::Funded => write!(f, "FUNDED"),
            Self::Active => write!(f, "ACTIVE"),
            Self::Disputing => write!(f, "DISPUTING"),
            Self::Settling => write!(f, "SETTLING"),
            Self::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A bilateral payment channel.
///
/// # Invariants
/// - `applied <= deposit` at all times
/// - `nonce` increases by exactly one per applied payment
/// - `version` increases by exactly one per accepted phase transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    /// The agent that proposed the channel.
    pub initiator: AgentId,
    /// The other party.
    pub counterparty: AgentId,
    pub chain: Chain,
    pub token: Token,
    /// Total deposit backing the channel.
    pub deposit: Decimal,
    /// Cumulative amount of accepted payments.
    pub applied: Decimal,
    /// Payment sequence number.
    pub nonce: u64,
    /// Lifecycle sequence number.
    pub version: u64,
    pub phase: ChannelPhase,
    /// Set while a dispute window is open.
    pub dispute_deadline: Option<DateTime<Utc>>,
    pub opened_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Channel {
    /// Create a freshly proposed channel.
    #[must_use]
    pub fn proposed(
        initiator: AgentId,
        counterparty: AgentId,
        chain: Chain,
        token: impl Into<Token>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ChannelId::new(),
            initiator,
            counterparty,
            chain,
            token: token.into(),
            deposit: Decimal::ZERO,
            applied: Decimal::ZERO,
            nonce: 0,
            version: 0,
            phase: ChannelPhase::Proposed,
            dispute_deadline: None,
            opened_at: now,
            last_activity: now,
            closed_at: None,
        }
    }

    /// Deposit not yet consumed by payments.
    #[must_use]
    pub fn remaining_capacity(&self) -> Decimal {
        self.deposit - self.applied
    }

    /// Whether `agent` is one of the two parties.
    #[must_use]
    pub fn is_party(&self, agent: &AgentId) -> bool {
        &self.initiator == agent || &self.counterparty == agent
    }

    /// The other party, if `agent` is a party.
    #[must_use]
    pub fn other_party(&self, agent: &AgentId) -> Option<&AgentId> {
        if &self.initiator == agent {
            Some(&self.counterparty)
        } else if &self.counterparty == agent {
            Some(&self.initiator)
        } else {
            None
        }
    }
}

/// Record of a payment accepted by a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub channel_id: ChannelId,
    pub from: AgentId,
    pub to: AgentId,
    pub amount: Decimal,
    /// Channel nonce after the payment was applied.
    pub channel_nonce: u64,
    /// Cumulative applied amount after this payment.
    pub cumulative: Decimal,
    pub applied_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> Channel {
        Channel::proposed(
            AgentId::from("alice"),
            AgentId::from("bob"),
            Chain::Base,
            "USDC",
            Utc::now(),
        )
    }

    #[test]
    fn proposed_channel_defaults() {
        let ch = channel();
        assert_eq!(ch.phase, ChannelPhase::Proposed);
        assert_eq!(ch.nonce, 0);
        assert_eq!(ch.version, 0);
        assert_eq!(ch.deposit, Decimal::ZERO);
        assert!(ch.dispute_deadline.is_none());
    }

    #[test]
    fn parties() {
        let ch = channel();
        assert!(ch.is_party(&AgentId::from("alice")));
        assert!(!ch.is_party(&AgentId::from("mallory")));
        assert_eq!(
            ch.other_party(&AgentId::from("bob")),
            Some(&AgentId::from("alice"))
        );
        assert!(ch.other_party(&AgentId::from("mallory")).is_none());
    }

    #[test]
    fn phase_display_and_serde() {
        assert_eq!(ChannelPhase::Disputing.to_string(), "DISPUTING");
        let json = serde_json::to_string(&ChannelPhase::Settling).unwrap();
        assert_eq!(json, "\"settling\"");
    }
}
