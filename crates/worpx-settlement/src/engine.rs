//! Settlement engine: batches channel payment entries per chain and
//! drives batch status.
//!
//! ```text
//! queue_entry ──▶ per-chain pending queue ──(batch_size | flush_due)──▶ flush_batch
//!                                                                          │
//!                       ┌──────────────────────────────────────────────────┘
//!                       ▼
//!                   PENDING ──submit_batch──▶ PROCESSING ──finalize_batch──▶ FINALIZED
//!                       │   (hash + conservation)    │
//!                       ▼                            ▼ fail_batch
//!                 FAILED(malformed)          FAILED(chain_rejected) ──retry_batch──▶ new PENDING
//! ```
//!
//! The engine never talks to a chain. An external submission collaborator
//! picks up PROCESSING batches and reports back through `finalize_batch`
//! or `fail_batch`.

use std::{collections::VecDeque, sync::Arc};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use worpx_types::{
    BatchFailure, BatchId, BatchStatus, Chain, DedupKey, EntityStore, FailureKind,
    IdempotencyGuard, MemoryStore, Result, SettlementBatch, SettlementConfig, SettlementEntry,
    SharedClock, WorpxError, amount, transact,
};

use crate::{net, sealer};

/// Result of [`SettlementEngine::queue_entry`].
#[derive(Debug, Clone)]
pub enum QueueOutcome {
    /// Entry accepted; this many entries are now pending on its chain.
    Queued { pending: usize },
    /// Entry accepted and the queue reached `batch_size`; the cut batch.
    Flushed(SettlementBatch),
    /// An entry with the same `(from, to, chain, nonce)` was already queued.
    Duplicate,
}

/// Pending entries of one chain.
struct ChainQueue {
    pending: VecDeque<SettlementEntry>,
    seen: IdempotencyGuard<DedupKey>,
    /// When the oldest pending entry was queued.
    oldest_queued_at: Option<DateTime<Utc>>,
}

impl ChainQueue {
    fn new(cache_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            seen: IdempotencyGuard::new(cache_size),
            oldest_queued_at: None,
        }
    }
}

/// Batches entries and tracks every batch it has cut.
pub struct SettlementEngine {
    batches: Arc<dyn EntityStore<BatchId, SettlementBatch>>,
    queues: DashMap<Chain, ChainQueue>,
    config: SettlementConfig,
    clock: SharedClock,
}

/// Outcome of a status change that may record a failure before rejecting.
enum Checked {
    Accepted(SettlementBatch),
    Rejected(WorpxError),
}

impl SettlementEngine {
    #[must_use]
    pub fn new(
        batches: Arc<dyn EntityStore<BatchId, SettlementBatch>>,
        config: SettlementConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            batches,
            queues: DashMap::new(),
            config,
            clock,
        }
    }

    #[must_use]
    pub fn in_memory(config: SettlementConfig, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config, clock)
    }

    /// Queue a signed payment delta on its chain; auto-flushes once
    /// `batch_size` entries are pending.
    ///
    /// # Errors
    /// `InvalidAmount` for non-positive amounts, or `ArithmeticOverflow`
    /// if the auto-flushed batch total overflows.
    pub fn queue_entry(&self, entry: SettlementEntry) -> Result<QueueOutcome> {
        amount::validate_amount(entry.amount)?;
        let now = self.clock.now();
        let chain = entry.chain;
        let mut queue = self
            .queues
            .entry(chain)
            .or_insert_with(|| ChainQueue::new(self.config.idempotency_cache_size));

        if !queue.seen.insert(entry.dedup_key()) {
            tracing::debug!(%chain, from = %entry.from, nonce = entry.nonce, "duplicate settlement entry ignored");
            return Ok(QueueOutcome::Duplicate);
        }
        queue.pending.push_back(entry);
        queue.oldest_queued_at.get_or_insert(now);

        if queue.pending.len() < self.config.batch_size {
            return Ok(QueueOutcome::Queued {
                pending: queue.pending.len(),
            });
        }
        match self.cut_batch(chain, &mut queue, now)? {
            Some(batch) => Ok(QueueOutcome::Flushed(batch)),
            None => Ok(QueueOutcome::Queued { pending: 0 }),
        }
    }

    /// Cut up to `batch_size` pending entries of `chain` into a new PENDING
    /// batch. Returns `None` if nothing is pending.
    ///
    /// # Errors
    /// `ArithmeticOverflow` if the batch total overflows; the queue is left
    /// untouched.
    pub fn flush_batch(&self, chain: Chain) -> Result<Option<SettlementBatch>> {
        let now = self.clock.now();
        let Some(mut queue) = self.queues.get_mut(&chain) else {
            return Ok(None);
        };
        self.cut_batch(chain, &mut queue, now)
    }

    /// Flush every chain whose oldest pending entry has waited at least the
    /// settlement interval.
    ///
    /// # Errors
    /// `ArithmeticOverflow` from any flush.
    pub fn flush_due(&self) -> Result<Vec<SettlementBatch>> {
        let now = self.clock.now();
        let cutoff = now - self.config.settlement_interval();
        let due: Vec<Chain> = self
            .queues
            .iter()
            .filter(|q| q.oldest_queued_at.is_some_and(|t| t <= cutoff))
            .map(|q| *q.key())
            .collect();

        let mut flushed = Vec::new();
        for chain in due {
            if let Some(batch) = self.flush_batch(chain)? {
                flushed.push(batch);
            }
        }
        Ok(flushed)
    }

    fn cut_batch(
        &self,
        chain: Chain,
        queue: &mut ChainQueue,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementBatch>> {
        if queue.pending.is_empty() {
            return Ok(None);
        }
        let take = queue.pending.len().min(self.config.batch_size);
        let total_amount = amount::to_fixed(amount::checked_sum(
            queue.pending.iter().take(take).map(|e| e.amount),
        )?);

        let entries: Vec<SettlementEntry> = queue.pending.drain(..take).collect();
        queue.oldest_queued_at = if queue.pending.is_empty() {
            None
        } else {
            Some(now)
        };

        let batch = SettlementBatch {
            id: BatchId::new(),
            chain,
            batch_hash: sealer::compute_batch_hash(chain, &entries),
            entries,
            total_amount,
            status: BatchStatus::Pending,
            attempt: 1,
            retry_of: None,
            superseded_by: None,
            created_at: now,
            submitted_at: None,
            finalized_at: None,
            tx_hash: None,
            failure: None,
        };
        tracing::info!(
            batch_id = %batch.id,
            %chain,
            entries = batch.len(),
            total = %batch.total_amount,
            hash = %hex::encode(batch.batch_hash),
            "settlement batch flushed"
        );
        self.batches.put(batch.id, batch.clone());
        Ok(Some(batch))
    }

    /// PENDING → PROCESSING, after verifying the batch hash and that net
    /// settlement sums to zero. A batch failing either check is marked
    /// FAILED (malformed) and never submitted.
    ///
    /// # Errors
    /// `BatchNotFound`, `InvalidBatchTransition`, `BatchHashMismatch`,
    /// `ConservationViolation`.
    pub fn submit_batch(&self, id: &BatchId) -> Result<SettlementBatch> {
        let now = self.clock.now();
        let checked = transact(self.batches.as_ref(), id, |b: &mut SettlementBatch| {
            require_transition(b, BatchStatus::Processing)?;
            if let Err(reason) = check_well_formed(b) {
                b.status = BatchStatus::Failed;
                b.failure = Some(BatchFailure {
                    kind: FailureKind::Malformed,
                    reason: reason.to_string(),
                    failed_at: now,
                });
                return Ok(Checked::Rejected(reason));
            }
            b.status = BatchStatus::Processing;
            b.submitted_at = Some(now);
            Ok(Checked::Accepted(b.clone()))
        })
        .ok_or(WorpxError::BatchNotFound(*id))??;

        match checked {
            Checked::Accepted(batch) => {
                tracing::info!(batch_id = %id, chain = %batch.chain, "settlement batch submitted");
                Ok(batch)
            }
            Checked::Rejected(err) => {
                tracing::error!(batch_id = %id, error = %err, "settlement batch rejected as malformed");
                Err(err)
            }
        }
    }

    /// PROCESSING → FINALIZED. Called by the chain-submission collaborator
    /// once the batch is confirmed on-chain.
    ///
    /// # Errors
    /// `BatchNotFound`, `InvalidBatchTransition`.
    pub fn finalize_batch(&self, id: &BatchId, tx_hash: impl Into<String>) -> Result<SettlementBatch> {
        let now = self.clock.now();
        let tx_hash = tx_hash.into();
        let batch = transact(self.batches.as_ref(), id, |b: &mut SettlementBatch| {
            require_transition(b, BatchStatus::Finalized)?;
            b.status = BatchStatus::Finalized;
            b.finalized_at = Some(now);
            b.tx_hash = Some(tx_hash);
            Ok(b.clone())
        })
        .ok_or(WorpxError::BatchNotFound(*id))??;

        tracing::info!(
            batch_id = %id,
            tx_hash = batch.tx_hash.as_deref().unwrap_or_default(),
            "settlement batch finalized"
        );
        Ok(batch)
    }

    /// PROCESSING → FAILED after the collaborator reports a chain rejection.
    ///
    /// # Errors
    /// `BatchNotFound`, `InvalidBatchTransition` unless PROCESSING.
    pub fn fail_batch(&self, id: &BatchId, reason: impl Into<String>) -> Result<SettlementBatch> {
        let now = self.clock.now();
        let reason = reason.into();
        let batch = transact(self.batches.as_ref(), id, |b: &mut SettlementBatch| {
            if b.status != BatchStatus::Processing {
                return Err(WorpxError::InvalidBatchTransition {
                    batch_id: b.id,
                    from: b.status,
                    to: BatchStatus::Failed,
                });
            }
            b.status = BatchStatus::Failed;
            b.failure = Some(BatchFailure {
                kind: FailureKind::ChainRejected,
                reason,
                failed_at: now,
            });
            Ok(b.clone())
        })
        .ok_or(WorpxError::BatchNotFound(*id))??;

        tracing::warn!(batch_id = %id, attempt = batch.attempt, "settlement batch failed on chain");
        Ok(batch)
    }

    /// Resubmit the entries of a chain-rejected batch as a new PENDING
    /// batch. The failed batch stays FAILED and is linked to its successor.
    ///
    /// # Errors
    /// - `BatchNotFound`
    /// - `BatchNotRetryable` unless FAILED by chain rejection and not yet retried
    /// - `RetryLimitExceeded` once `max_retries` resubmissions have been made
    pub fn retry_batch(&self, id: &BatchId) -> Result<SettlementBatch> {
        let now = self.clock.now();
        let max_attempts = self.config.max_retries.saturating_add(1);
        let retry = transact(self.batches.as_ref(), id, |b: &mut SettlementBatch| {
            let retryable = b.status == BatchStatus::Failed
                && b.superseded_by.is_none()
                && b
                    .failure
                    .as_ref()
                    .is_some_and(|f| f.kind == FailureKind::ChainRejected);
            if !retryable {
                return Err(WorpxError::BatchNotRetryable(b.id));
            }
            if b.attempt >= max_attempts {
                return Err(WorpxError::RetryLimitExceeded {
                    batch_id: b.id,
                    attempts: b.attempt,
                });
            }

            let retry = SettlementBatch {
                id: BatchId::new(),
                chain: b.chain,
                entries: b.entries.clone(),
                total_amount: b.total_amount,
                batch_hash: sealer::compute_batch_hash(b.chain, &b.entries),
                status: BatchStatus::Pending,
                attempt: b.attempt + 1,
                retry_of: Some(b.id),
                superseded_by: None,
                created_at: now,
                submitted_at: None,
                finalized_at: None,
                tx_hash: None,
                failure: None,
            };
            b.superseded_by = Some(retry.id);
            Ok(retry)
        })
        .ok_or(WorpxError::BatchNotFound(*id))??;

        tracing::info!(
            batch_id = %retry.id,
            retry_of = %id,
            attempt = retry.attempt,
            "settlement batch resubmitted"
        );
        self.batches.put(retry.id, retry.clone());
        Ok(retry)
    }

    #[must_use]
    pub fn get(&self, id: &BatchId) -> Option<SettlementBatch> {
        self.batches.get(id)
    }

    /// Batches in `status`, oldest first.
    #[must_use]
    pub fn batches_by_status(&self, status: BatchStatus) -> Vec<SettlementBatch> {
        let mut out: Vec<SettlementBatch> = self
            .batches
            .keys()
            .into_iter()
            .filter_map(|id| self.batches.get(&id))
            .filter(|b| b.status == status)
            .collect();
        out.sort_by_key(|b| (b.created_at, b.id));
        out
    }

    /// Entries waiting across all chains.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queues.iter().map(|q| q.pending.len()).sum()
    }

    #[must_use]
    pub fn pending_on(&self, chain: Chain) -> usize {
        self.queues.get(&chain).map_or(0, |q| q.pending.len())
    }

    /// Sum of `total_amount` over finalized batches of `chain`.
    #[must_use]
    pub fn finalized_volume(&self, chain: Chain) -> Decimal {
        self.batches_by_status(BatchStatus::Finalized)
            .iter()
            .filter(|b| b.chain == chain)
            .map(|b| b.total_amount)
            .sum()
    }
}

fn require_transition(batch: &SettlementBatch, to: BatchStatus) -> Result<()> {
    if batch.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(WorpxError::InvalidBatchTransition {
            batch_id: batch.id,
            from: batch.status,
            to,
        })
    }
}

fn check_well_formed(batch: &SettlementBatch) -> Result<()> {
    if !sealer::verify_batch_hash(batch) {
        return Err(WorpxError::BatchHashMismatch(batch.id));
    }
    let net = net::compute_net_settlement(&batch.entries)?;
    net::verify_conservation(&net)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use worpx_types::{AgentId, ChannelId, ManualClock};

    use super::*;

    fn entry(from: &str, to: &str, nonce: u64, cents: i64) -> SettlementEntry {
        SettlementEntry {
            channel_id: ChannelId::from_bytes([5; 16]),
            from: AgentId::from(from),
            to: AgentId::from(to),
            chain: Chain::Base,
            token: "USDC".into(),
            amount: Decimal::new(cents, 2),
            nonce,
            signature: format!("sig-{nonce}"),
        }
    }

    fn engine(batch_size: usize) -> (SettlementEngine, Arc<MemoryStore<BatchId, SettlementBatch>>, Arc<ManualClock>) {
        let clock = ManualClock::at_epoch();
        let store = Arc::new(MemoryStore::new());
        let cfg = SettlementConfig {
            batch_size,
            max_retries: 2,
            ..SettlementConfig::default()
        };
        (
            SettlementEngine::new(store.clone(), cfg, clock.clone()),
            store,
            clock,
        )
    }

    #[test]
    fn auto_flush_at_batch_size() {
        let (eng, _store, _clock) = engine(3);
        assert!(matches!(
            eng.queue_entry(entry("a", "b", 0, 100)).unwrap(),
            QueueOutcome::Queued { pending: 1 }
        ));
        eng.queue_entry(entry("a", "b", 1, 200)).unwrap();
        let QueueOutcome::Flushed(batch) = eng.queue_entry(entry("b", "a", 0, 50)).unwrap() else {
            panic!("expected auto flush");
        };
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.total_amount, Decimal::new(3_500_000, 6));
        assert_eq!(batch.total_amount.scale(), 6);
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(eng.pending_count(), 0);
    }

    #[test]
    fn duplicate_entry_is_ignored() {
        let (eng, _store, _clock) = engine(10);
        eng.queue_entry(entry("a", "b", 0, 100)).unwrap();
        assert!(matches!(
            eng.queue_entry(entry("a", "b", 0, 999)).unwrap(),
            QueueOutcome::Duplicate
        ));
        assert_eq!(eng.pending_count(), 1);
    }

    #[test]
    fn queues_are_per_chain() {
        let (eng, _store, _clock) = engine(10);
        eng.queue_entry(entry("a", "b", 0, 100)).unwrap();
        let mut sol = entry("a", "b", 0, 100);
        sol.chain = Chain::Solana;
        assert!(matches!(
            eng.queue_entry(sol).unwrap(),
            QueueOutcome::Queued { pending: 1 }
        ));
        let batch = eng.flush_batch(Chain::Solana).unwrap().unwrap();
        assert_eq!(batch.chain, Chain::Solana);
        assert_eq!(eng.pending_on(Chain::Base), 1);
        assert!(eng.flush_batch(Chain::Polygon).unwrap().is_none());
    }

    #[test]
    fn full_lifecycle() {
        let (eng, _store, _clock) = engine(10);
        eng.queue_entry(entry("a", "b", 0, 500)).unwrap();
        eng.queue_entry(entry("b", "c", 0, 250)).unwrap();
        let batch = eng.flush_batch(Chain::Base).unwrap().unwrap();

        let err = eng.finalize_batch(&batch.id, "0xabc").unwrap_err();
        assert!(matches!(err, WorpxError::InvalidBatchTransition { .. }));

        eng.submit_batch(&batch.id).unwrap();
        let done = eng.finalize_batch(&batch.id, "0xabc").unwrap();
        assert_eq!(done.status, BatchStatus::Finalized);
        assert_eq!(done.tx_hash.as_deref(), Some("0xabc"));

        let err = eng.fail_batch(&batch.id, "late").unwrap_err();
        assert!(matches!(err, WorpxError::InvalidBatchTransition { .. }));
        assert_eq!(eng.batches_by_status(BatchStatus::Finalized).len(), 1);
        assert_eq!(eng.finalized_volume(Chain::Base), Decimal::new(750, 2));
    }

    #[test]
    fn tampered_batch_is_failed_before_submission() {
        let (eng, store, _clock) = engine(10);
        eng.queue_entry(entry("a", "b", 0, 500)).unwrap();
        let mut batch = eng.flush_batch(Chain::Base).unwrap().unwrap();
        batch.entries[0].amount = Decimal::new(5000, 2);
        store.put(batch.id, batch.clone());

        let err = eng.submit_batch(&batch.id).unwrap_err();
        assert!(matches!(err, WorpxError::BatchHashMismatch(_)));
        let stored = eng.get(&batch.id).unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.failure.unwrap().kind, FailureKind::Malformed);
        assert!(matches!(
            eng.retry_batch(&batch.id).unwrap_err(),
            WorpxError::BatchNotRetryable(_)
        ));
    }

    #[test]
    fn retry_is_bounded() {
        let (eng, _store, _clock) = engine(10);
        eng.queue_entry(entry("a", "b", 0, 500)).unwrap();
        let mut current = eng.flush_batch(Chain::Base).unwrap().unwrap();

        // max_retries = 2: attempts 1, 2, 3.
        for expected_attempt in 2..=3 {
            eng.submit_batch(&current.id).unwrap();
            eng.fail_batch(&current.id, "reverted").unwrap();
            let retry = eng.retry_batch(&current.id).unwrap();
            assert_eq!(retry.attempt, expected_attempt);
            assert_eq!(retry.retry_of, Some(current.id));
            assert!(matches!(
                eng.retry_batch(&current.id).unwrap_err(),
                WorpxError::BatchNotRetryable(_)
            ));
            current = retry;
        }

        eng.submit_batch(&current.id).unwrap();
        eng.fail_batch(&current.id, "reverted").unwrap();
        assert!(matches!(
            eng.retry_batch(&current.id).unwrap_err(),
            WorpxError::RetryLimitExceeded { attempts: 3, .. }
        ));
    }

    #[test]
    fn flush_due_respects_interval() {
        let (eng, _store, clock) = engine(10);
        eng.queue_entry(entry("a", "b", 0, 500)).unwrap();
        assert!(eng.flush_due().unwrap().is_empty());

        clock.advance(Duration::seconds(30));
        let flushed = eng.flush_due().unwrap();
        assert_eq!(flushed.len(), 1);
        assert!(eng.flush_due().unwrap().is_empty());
    }

    #[test]
    fn invalid_amount_rejected_at_queue() {
        let (eng, _store, _clock) = engine(10);
        let err = eng.queue_entry(entry("a", "b", 0, 0)).unwrap_err();
        assert!(matches!(err, WorpxError::InvalidAmount { .. }));
        assert_eq!(eng.pending_count(), 0);
    }
}
