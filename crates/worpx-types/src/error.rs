//! Error types for the Worpx ledger core.
//!
//! All errors use the `WX_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Channel errors
//! - 2xx: Escrow errors
//! - 3xx: Nonce errors
//! - 4xx: Mempool errors
//! - 5xx: Settlement errors
//! - 7xx: Dispute errors
//! - 8xx: Authorization errors
//! - 9xx: General / internal errors
//!
//! Benign local conditions (duplicate admission, unmet guards) are not
//! errors; the owning component reports them as `None` / `false`.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    AgentId, BatchId, BatchStatus, Chain, ChannelId, ChannelPhase, DisputeId, DisputeStatus,
    EntryId, EscrowId, EscrowStatus,
};

/// Central error enum for all Worpx operations.
#[derive(Debug, Error)]
pub enum WorpxError {
    // =================================================================
    // Channel Errors (1xx)
    // =================================================================
    /// The requested channel does not exist.
    #[error("WX_ERR_100: Channel not found: {0}")]
    ChannelNotFound(ChannelId),

    /// The transition is not in the rule table or its guard failed.
    #[error("WX_ERR_101: Invalid transition {from} -> {to}: {reason}")]
    InvalidTransition {
        from: ChannelPhase,
        to: ChannelPhase,
        reason: String,
    },

    /// Payments are only applied to ACTIVE channels.
    #[error("WX_ERR_102: Channel {channel_id} is {phase}, not ACTIVE")]
    ChannelNotActive {
        channel_id: ChannelId,
        phase: ChannelPhase,
    },

    /// The payment would push cumulative applied amount past the deposit.
    #[error("WX_ERR_103: Channel capacity exceeded: requested {requested}, remaining {remaining}")]
    ChannelCapacityExceeded {
        requested: Decimal,
        remaining: Decimal,
    },

    // =================================================================
    // Escrow Errors (2xx)
    // =================================================================
    /// The requested escrow deposit does not exist.
    #[error("WX_ERR_200: Escrow not found: {0}")]
    EscrowNotFound(EscrowId),

    /// Release/refund attempted on a deposit that already left LOCKED.
    #[error("WX_ERR_201: Escrow {escrow_id} is {status}, not LOCKED")]
    EscrowNotLocked {
        escrow_id: EscrowId,
        status: EscrowStatus,
    },

    /// A condition update targeted the wrong condition kind.
    #[error("WX_ERR_202: Escrow {escrow_id} condition is not {expected}")]
    ConditionMismatch {
        escrow_id: EscrowId,
        expected: &'static str,
    },

    // =================================================================
    // Nonce Errors (3xx)
    // =================================================================
    /// The nonce was never allocated for this (agent, chain), or was released.
    #[error("WX_ERR_300: Nonce {nonce} not allocated for {agent} on {chain}")]
    NonceNotAllocated {
        agent: AgentId,
        chain: Chain,
        nonce: u64,
    },

    /// Confirmed nonces can never be released or re-confirmed.
    #[error("WX_ERR_301: Nonce {nonce} already confirmed for {agent} on {chain}")]
    NonceAlreadyConfirmed {
        agent: AgentId,
        chain: Chain,
        nonce: u64,
    },

    // =================================================================
    // Mempool Errors (4xx)
    // =================================================================
    /// The mempool entry does not exist (popped, pruned, or evicted).
    #[error("WX_ERR_400: Mempool entry not found: {0}")]
    EntryNotFound(EntryId),

    // =================================================================
    // Settlement Errors (5xx)
    // =================================================================
    /// The requested batch does not exist.
    #[error("WX_ERR_500: Batch not found: {0}")]
    BatchNotFound(BatchId),

    /// Batch status changes are one-directional.
    #[error("WX_ERR_501: Batch {batch_id} cannot move {from} -> {to}")]
    InvalidBatchTransition {
        batch_id: BatchId,
        from: BatchStatus,
        to: BatchStatus,
    },

    /// Net settlement of a batch did not sum to zero. Critical safety alert.
    #[error("WX_ERR_502: Conservation violation: net residual {residual}")]
    ConservationViolation { residual: Decimal },

    /// The batch hash no longer commits to the batch entries.
    #[error("WX_ERR_503: Batch hash mismatch for {0}")]
    BatchHashMismatch(BatchId),

    /// A failed batch has been resubmitted too many times.
    #[error("WX_ERR_504: Batch {batch_id} exhausted retries after {attempts} attempts")]
    RetryLimitExceeded { batch_id: BatchId, attempts: u32 },

    /// Only chain-rejected batches may be resubmitted.
    #[error("WX_ERR_505: Batch {0} is not retryable")]
    BatchNotRetryable(BatchId),

    /// Amount is non-positive or has too many fractional digits.
    #[error("WX_ERR_506: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// Fixed-point arithmetic overflowed.
    #[error("WX_ERR_507: Arithmetic overflow")]
    ArithmeticOverflow,

    // =================================================================
    // Dispute Errors (7xx)
    // =================================================================
    /// The requested dispute does not exist.
    #[error("WX_ERR_700: Dispute not found: {0}")]
    DisputeNotFound(DisputeId),

    /// The operation is not permitted in the dispute's current status.
    #[error("WX_ERR_701: Dispute {dispute_id} is {status}, cannot {operation}")]
    WrongDisputePhase {
        dispute_id: DisputeId,
        status: DisputeStatus,
        operation: &'static str,
    },

    /// The dispute's current deadline has already lapsed.
    #[error("WX_ERR_702: Dispute {0} deadline has passed")]
    DisputeDeadlinePassed(DisputeId),

    // =================================================================
    // Authorization Errors (8xx)
    // =================================================================
    /// The acting agent is not one of the entity's named parties.
    #[error("WX_ERR_800: Agent {agent} is not a party to {entity}")]
    UnauthorizedParty { agent: AgentId, entity: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("WX_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("WX_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config document, out-of-range values).
    #[error("WX_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// The chain name is not supported.
    #[error("WX_ERR_903: Unknown chain: {0}")]
    UnknownChain(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, WorpxError>;

impl From<serde_json::Error> for WorpxError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = WorpxError::ChannelNotFound(ChannelId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("WX_ERR_100"), "Got: {msg}");
    }

    #[test]
    fn capacity_exceeded_display() {
        let err = WorpxError::ChannelCapacityExceeded {
            requested: Decimal::new(1000, 2),
            remaining: Decimal::new(350, 2),
        };
        let msg = format!("{err}");
        assert!(msg.contains("WX_ERR_103"));
        assert!(msg.contains("10.00"));
        assert!(msg.contains("3.50"));
    }

    #[test]
    fn invalid_transition_display() {
        let err = WorpxError::InvalidTransition {
            from: ChannelPhase::Proposed,
            to: ChannelPhase::Closed,
            reason: "no rule".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("WX_ERR_101"));
        assert!(msg.contains("PROPOSED"));
        assert!(msg.contains("CLOSED"));
    }

    #[test]
    fn all_errors_have_wx_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(WorpxError::ArithmeticOverflow),
            Box::new(WorpxError::ConservationViolation {
                residual: Decimal::ONE,
            }),
            Box::new(WorpxError::EntryNotFound(EntryId::new())),
            Box::new(WorpxError::Internal("test".into())),
            Box::new(WorpxError::UnknownChain("btc".into())),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("WX_ERR_"),
                "Error missing WX_ERR_ prefix: {msg}"
            );
        }
    }

    #[test]
    fn serde_json_errors_convert() {
        let parse: std::result::Result<u32, _> = serde_json::from_str("not json");
        let err: WorpxError = parse.unwrap_err().into();
        assert!(matches!(err, WorpxError::Serialization(_)));
    }
}
