//! Settlement reconciler.
//!
//! Compares expected against actual amounts per channel and appends an
//! immutable report to a hash-chained log. A discrepancy at or above the
//! configured epsilon is flagged; nothing is ever adjusted automatically.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use worpx_types::{
    MatchStatus, ReconcileRecord, ReconcilerConfig, ReconciliationEntry, ReconciliationReport,
    ReportId, Result, SharedClock, WorpxError, amount,
};

pub struct Reconciler {
    config: ReconcilerConfig,
    clock: SharedClock,
    log: RwLock<Vec<ReconciliationReport>>,
}

impl Reconciler {
    #[must_use]
    pub fn new(config: ReconcilerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            log: RwLock::new(Vec::new()),
        }
    }

    /// Classify every record and append the resulting report to the log.
    ///
    /// # Errors
    /// `ArithmeticOverflow` if a difference or total overflows; nothing is
    /// appended in that case.
    pub fn reconcile(&self, records: &[ReconcileRecord]) -> Result<ReconciliationReport> {
        let now = self.clock.now();
        let entries = records
            .iter()
            .map(|r| self.classify(r, now))
            .collect::<Result<Vec<_>>>()?;

        let total_expected = amount::checked_sum(entries.iter().map(|e| e.expected))?;
        let total_actual = amount::checked_sum(entries.iter().map(|e| e.actual))?;
        let total_discrepancy = amount::checked_sum(entries.iter().map(|e| e.discrepancy))?;

        let mut log = self.log.write();
        let previous_hash = log.last().map_or([0u8; 32], |r| r.report_hash);
        let mut report = ReconciliationReport {
            id: ReportId::new(),
            entries,
            total_expected,
            total_actual,
            total_discrepancy,
            generated_at: now,
            previous_hash,
            report_hash: [0u8; 32],
        };
        report.report_hash = compute_report_hash(&report);

        let flagged = report.discrepancies().count();
        if flagged > 0 {
            tracing::warn!(
                report_id = %report.id,
                channels = report.entries.len(),
                flagged,
                total_discrepancy = %report.total_discrepancy,
                "reconciliation found discrepancies"
            );
        } else {
            tracing::info!(
                report_id = %report.id,
                channels = report.entries.len(),
                "reconciliation clean"
            );
        }

        log.push(report.clone());
        Ok(report)
    }

    fn classify(&self, record: &ReconcileRecord, now: DateTime<Utc>) -> Result<ReconciliationEntry> {
        let discrepancy = record
            .expected
            .checked_sub(record.actual)
            .ok_or(WorpxError::ArithmeticOverflow)?
            .abs();
        let status = if discrepancy < self.config.epsilon {
            MatchStatus::Matched
        } else {
            MatchStatus::Discrepancy
        };
        Ok(ReconciliationEntry {
            channel_id: record.channel_id,
            expected: record.expected,
            actual: record.actual,
            discrepancy,
            status,
            checked_at: now,
        })
    }

    /// All reports, oldest first.
    #[must_use]
    pub fn reports(&self) -> Vec<ReconciliationReport> {
        self.log.read().clone()
    }

    #[must_use]
    pub fn latest(&self) -> Option<ReconciliationReport> {
        self.log.read().last().cloned()
    }

    #[must_use]
    pub fn report_count(&self) -> usize {
        self.log.read().len()
    }

    /// Re-hash the log and check every link.
    #[must_use]
    pub fn verify_chain(&self) -> bool {
        let log = self.log.read();
        let mut previous = [0u8; 32];
        for report in log.iter() {
            if report.previous_hash != previous || compute_report_hash(report) != report.report_hash {
                tracing::error!(report_id = %report.id, "reconciliation log chain broken");
                return false;
            }
            previous = report.report_hash;
        }
        true
    }
}

fn compute_report_hash(report: &ReconciliationReport) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"worpx:recon:v1:");
    hasher.update(report.previous_hash);
    hasher.update(report.id.0.as_bytes());
    hasher.update(report.generated_at.timestamp_micros().to_le_bytes());
    hasher.update((report.entries.len() as u64).to_le_bytes());
    for entry in &report.entries {
        hasher.update(entry.channel_id.0.as_bytes());
        update_decimal(&mut hasher, entry.expected);
        update_decimal(&mut hasher, entry.actual);
        hasher.update([u8::from(entry.status == MatchStatus::Matched)]);
    }
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

fn update_decimal(hasher: &mut Sha256, value: Decimal) {
    let s = value.normalize().to_string();
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}
