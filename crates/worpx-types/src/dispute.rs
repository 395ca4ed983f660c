//! Dispute model.
//!
//! ```text
//! FILED ──evidence──▶ EVIDENCE_PHASE ──escalate──▶ ARBITRATION ──resolve──▶ RESOLVED
//!   │                      │                           │
//!   └──────────────────────┴───── deadline lapsed ─────┴──────────────────▶ EXPIRED
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AgentId, ChannelId, DisputeId};

/// Lifecycle status of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Filed,
    EvidencePhase,
    Arbitration,
    Resolved,
    Expired,
}

impl DisputeStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Expired)
    }

    /// Evidence is accepted only before arbitration.
    #[must_use]
    pub fn accepts_evidence(self) -> bool {
        matches!(self, Self::Filed | Self::EvidencePhase)
    }
}

impl fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filed => write!(f, "FILED"),
            Self::EvidencePhase => write!(f, "EVIDENCE_PHASE"),
            Self::Arbitration => write!(f, "ARBITRATION"),
            Self::Resolved => write!(f, "RESOLVED"),
            Self::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Why the dispute was filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    NonDelivery,
    IncorrectResult,
    PaymentMismatch,
    Timeout,
    UnauthorizedAccess,
}

/// A piece of evidence. The payload itself lives elsewhere; only its hash
/// is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub submitted_by: AgentId,
    pub description: String,
    pub data_hash: String,
    pub submitted_at: DateTime<Utc>,
}

/// Arbitration outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    InitiatorWins,
    RespondentWins,
    Split,
    Void,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitiatorWins => write!(f, "initiator_wins"),
            Self::RespondentWins => write!(f, "respondent_wins"),
            Self::Split => write!(f, "split"),
            Self::Void => write!(f, "void"),
        }
    }
}

/// Terminal decision on a dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub outcome: Outcome,
    pub refund_amount: Decimal,
    pub penalty_amount: Decimal,
    pub arbitrator_notes: String,
}

impl Resolution {
    /// A resolution with no funds moved.
    #[must_use]
    pub fn without_amounts(outcome: Outcome, notes: impl Into<String>) -> Self {
        Self {
            outcome,
            refund_amount: Decimal::ZERO,
            penalty_amount: Decimal::ZERO,
            arbitrator_notes: notes.into(),
        }
    }
}

/// A time-boxed contest of a channel outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub channel_id: ChannelId,
    pub initiator: AgentId,
    pub respondent: AgentId,
    pub reason: DisputeReason,
    pub evidence: Vec<Evidence>,
    pub status: DisputeStatus,
    pub resolution: Option<Resolution>,
    pub filed_at: DateTime<Utc>,
    /// Evidence deadline until escalation, arbitration deadline after.
    pub deadline_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    #[must_use]
    pub fn is_party(&self, agent: &AgentId) -> bool {
        &self.initiator == agent || &self.respondent == agent
    }

    /// Number of evidence items submitted by `agent`.
    #[must_use]
    pub fn evidence_count(&self, agent: &AgentId) -> usize {
        self.evidence
            .iter()
            .filter(|e| &e.submitted_by == agent)
            .count()
    }

    /// Whether the current deadline has lapsed at `now`.
    #[must_use]
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flags() {
        assert!(DisputeStatus::Filed.accepts_evidence());
        assert!(DisputeStatus::EvidencePhase.accepts_evidence());
        assert!(!DisputeStatus::Arbitration.accepts_evidence());
        assert!(DisputeStatus::Resolved.is_terminal());
        assert!(DisputeStatus::Expired.is_terminal());
        assert!(!DisputeStatus::Arbitration.is_terminal());
    }

    #[test]
    fn outcome_serde_snake_case() {
        let json = serde_json::to_string(&Outcome::InitiatorWins).unwrap();
        assert_eq!(json, "\"initiator_wins\"");
        assert_eq!(Outcome::Split.to_string(), "split");
    }
}
