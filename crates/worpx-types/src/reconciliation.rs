//! Reconciliation report model. Reports are append-only and never mutated
//! after generation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{ChannelId, ReportId};

/// Externally supplied `(channel, expected, actual)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRecord {
    pub channel_id: ChannelId,
    pub expected: Decimal,
    pub actual: Decimal,
}

impl ReconcileRecord {
    #[must_use]
    pub fn new(channel_id: ChannelId, expected: Decimal, actual: Decimal) -> Self {
        Self {
            channel_id,
            expected,
            actual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Discrepancy,
}

/// Per-channel comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub channel_id: ChannelId,
    pub expected: Decimal,
    pub actual: Decimal,
    /// `|expected - actual|`, exact.
    pub discrepancy: Decimal,
    pub status: MatchStatus,
    pub checked_at: DateTime<Utc>,
}

/// One reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub id: ReportId,
    pub entries: Vec<ReconciliationEntry>,
    pub total_expected: Decimal,
    pub total_actual: Decimal,
    pub total_discrepancy: Decimal,
    pub generated_at: DateTime<Utc>,
    /// Hash of the previous report in the log (all zeros for the first).
    pub previous_hash: [u8; 32],
    /// SHA-256 over `previous_hash` and this report's contents.
    pub report_hash: [u8; 32],
}

impl ReconciliationReport {
    /// Entries classified as discrepancies.
    pub fn discrepancies(&self) -> impl Iterator<Item = &ReconciliationEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == MatchStatus::Discrepancy)
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancies().next().is_none()
    }
}
