//! Configuration types for the Worpx ledger core.
//!
//! Every section has a `Default` built from [`crate::constants`]; a full
//! [`LedgerConfig`] can be loaded from a JSON document in which any
//! section or field may be omitted.

use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Result, WorpxError, amount, constants};

/// Channel state machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Length of the dispute window opened by ACTIVE → DISPUTING.
    pub dispute_window_secs: i64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            dispute_window_secs: constants::DEFAULT_CHANNEL_DISPUTE_WINDOW_SECS,
        }
    }
}

impl ChannelConfig {
    #[must_use]
    pub fn dispute_window(&self) -> Duration {
        Duration::seconds(self.dispute_window_secs)
    }
}

/// Escrow vault configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Lock time-to-live used when the caller does not supply one.
    pub default_ttl_secs: i64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: constants::DEFAULT_ESCROW_TTL_SECS,
        }
    }
}

impl EscrowConfig {
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        Duration::seconds(self.default_ttl_secs)
    }
}

/// Transaction mempool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Capacity; the lowest-priority entry is evicted beyond this.
    pub max_size: usize,
    /// Entries older than this are pruned.
    pub max_age_secs: i64,
    /// Number of dedup keys remembered. Never smaller than `max_size`, so
    /// the key of every pooled entry stays remembered.
    pub dedup_window: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: constants::DEFAULT_MEMPOOL_MAX_SIZE,
            max_age_secs: constants::DEFAULT_MEMPOOL_MAX_AGE_SECS,
            dedup_window: constants::DEFAULT_MEMPOOL_DEDUP_WINDOW,
        }
    }
}

impl MempoolConfig {
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::seconds(self.max_age_secs)
    }
}

/// Settlement engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Entries per batch; reaching it triggers an auto-flush.
    pub batch_size: usize,
    /// Resubmissions allowed for a chain-rejected batch.
    pub max_retries: u32,
    /// A partial queue older than this is flushed by `flush_due`.
    pub settlement_interval_secs: i64,
    /// Per-chain entry dedup cache size.
    pub idempotency_cache_size: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            batch_size: constants::DEFAULT_SETTLEMENT_BATCH_SIZE,
            max_retries: constants::DEFAULT_SETTLEMENT_MAX_RETRIES,
            settlement_interval_secs: constants::DEFAULT_SETTLEMENT_INTERVAL_SECS,
            idempotency_cache_size: constants::SETTLEMENT_IDEMPOTENCY_CACHE_SIZE,
        }
    }
}

impl SettlementConfig {
    #[must_use]
    pub fn settlement_interval(&self) -> Duration {
        Duration::seconds(self.settlement_interval_secs)
    }
}

/// Settlement reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Discrepancies strictly below this are `matched`.
    pub epsilon: Decimal,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            epsilon: amount::reconcile_epsilon(),
        }
    }
}

/// Dispute resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisputeConfig {
    pub evidence_window_secs: i64,
    pub arbitration_window_secs: i64,
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            evidence_window_secs: constants::DEFAULT_EVIDENCE_WINDOW_SECS,
            arbitration_window_secs: constants::DEFAULT_ARBITRATION_WINDOW_SECS,
        }
    }
}

impl DisputeConfig {
    #[must_use]
    pub fn evidence_window(&self) -> Duration {
        Duration::seconds(self.evidence_window_secs)
    }

    #[must_use]
    pub fn arbitration_window(&self) -> Duration {
        Duration::seconds(self.arbitration_window_secs)
    }
}

/// Full configuration of a ledger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub channel: ChannelConfig,
    pub escrow: EscrowConfig,
    pub mempool: MempoolConfig,
    pub settlement: SettlementConfig,
    pub reconciler: ReconcilerConfig,
    pub dispute: DisputeConfig,
    /// Period of the background sweeper.
    pub sweep_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            escrow: EscrowConfig::default(),
            mempool: MempoolConfig::default(),
            settlement: SettlementConfig::default(),
            reconciler: ReconcilerConfig::default(),
            dispute: DisputeConfig::default(),
            sweep_interval_ms: constants::DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl LedgerConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations that would break component invariants.
    pub fn validate(&self) -> Result<()> {
        let positive_windows = [
            ("channel.dispute_window_secs", self.channel.dispute_window_secs),
            ("escrow.default_ttl_secs", self.escrow.default_ttl_secs),
            ("mempool.max_age_secs", self.mempool.max_age_secs),
            (
                "settlement.settlement_interval_secs",
                self.settlement.settlement_interval_secs,
            ),
            ("dispute.evidence_window_secs", self.dispute.evidence_window_secs),
            (
                "dispute.arbitration_window_secs",
                self.dispute.arbitration_window_secs,
            ),
        ];
        for (name, value) in positive_windows {
            if value <= 0 {
                return Err(WorpxError::Configuration(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if self.sweep_interval_ms == 0 {
            return Err(WorpxError::Configuration(
                "sweep_interval_ms must be > 0".into(),
            ));
        }
        if self.mempool.max_size == 0 || self.mempool.dedup_window == 0 {
            return Err(WorpxError::Configuration(
                "mempool.max_size and mempool.dedup_window must be > 0".into(),
            ));
        }
        if self.mempool.dedup_window < self.mempool.max_size {
            return Err(WorpxError::Configuration(format!(
                "mempool.dedup_window ({}) must be at least mempool.max_size ({})",
                self.mempool.dedup_window, self.mempool.max_size
            )));
        }
        if self.settlement.batch_size == 0 || self.settlement.idempotency_cache_size == 0 {
            return Err(WorpxError::Configuration(
                "settlement.batch_size and settlement.idempotency_cache_size must be > 0".into(),
            ));
        }
        if self.reconciler.epsilon < Decimal::ZERO {
            return Err(WorpxError::Configuration(
                "reconciler.epsilon must not be negative".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let cfg = LedgerConfig::default();
        assert_eq!(cfg.channel.dispute_window(), Duration::hours(24));
        assert_eq!(cfg.escrow.default_ttl(), Duration::hours(1));
        assert_eq!(cfg.mempool.max_size, 10_000);
        assert_eq!(cfg.mempool.max_age(), Duration::minutes(10));
        assert_eq!(cfg.settlement.batch_size, 50);
        assert_eq!(cfg.settlement.max_retries, 3);
        assert_eq!(cfg.dispute.evidence_window(), Duration::hours(24));
        assert_eq!(cfg.dispute.arbitration_window(), Duration::hours(48));
        assert_eq!(cfg.reconciler.epsilon, Decimal::new(1, 6));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = LedgerConfig::from_json(r#"{"settlement": {"batch_size": 3}}"#).unwrap();
        assert_eq!(cfg.settlement.batch_size, 3);
        assert_eq!(cfg.settlement.max_retries, 3);
        assert_eq!(cfg.mempool, MempoolConfig::default());
        assert_eq!(cfg.sweep_interval_ms, constants::DEFAULT_SWEEP_INTERVAL_MS);
    }

    #[test]
    fn invalid_values_rejected() {
        let err = LedgerConfig::from_json(r#"{"settlement": {"batch_size": 0}}"#).unwrap_err();
        assert!(matches!(err, WorpxError::Configuration(_)));

        let err =
            LedgerConfig::from_json(r#"{"dispute": {"evidence_window_secs": -1}}"#).unwrap_err();
        assert!(matches!(err, WorpxError::Configuration(_)));
    }

    #[test]
    fn dedup_window_below_pool_size_rejected() {
        let err = LedgerConfig::from_json(
            r#"{"mempool": {"max_size": 10, "dedup_window": 2}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, WorpxError::Configuration(_)));

        let cfg =
            LedgerConfig::from_json(r#"{"mempool": {"max_size": 10, "dedup_window": 10}}"#)
                .unwrap();
        assert_eq!(cfg.mempool.dedup_window, 10);
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        let err = LedgerConfig::from_json("{").unwrap_err();
        assert!(matches!(err, WorpxError::Serialization(_)));
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = LedgerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: LedgerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
