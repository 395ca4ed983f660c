//! End-to-end integration tests for the settlement plane.
//!
//! These tests drive the full batch lifecycle:
//! queue -> flush -> submit (hash + conservation) -> finalize / fail -> retry,
//! followed by reconciliation of the settled amounts.

use std::sync::Arc;

use chrono::Duration;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rust_decimal::Decimal;
use worpx_settlement::{
    QueueOutcome, Reconciler, SettlementEngine, compute_net_settlement, net, sealer,
    verify_conservation,
};
use worpx_types::*;

/// Helper: settlement engine plus reconciler sharing one manual clock.
struct SettlementPipeline {
    engine: SettlementEngine,
    reconciler: Reconciler,
    store: Arc<MemoryStore<BatchId, SettlementBatch>>,
    clock: Arc<ManualClock>,
}

impl SettlementPipeline {
    fn new(batch_size: usize, max_retries: u32) -> Self {
        let clock = ManualClock::at_epoch();
        let store = Arc::new(MemoryStore::new());
        let config = SettlementConfig {
            batch_size,
            max_retries,
            ..SettlementConfig::default()
        };
        Self {
            engine: SettlementEngine::new(store.clone(), config, clock.clone()),
            reconciler: Reconciler::new(ReconcilerConfig::default(), clock.clone()),
            store,
            clock,
        }
    }

    fn queue(&self, entry: SettlementEntry) -> QueueOutcome {
        self.engine
            .queue_entry(entry)
            .expect("queueing a valid entry should succeed")
    }

    /// Submit and finalize a batch, returning the finalized copy.
    fn settle(&self, batch: &SettlementBatch) -> SettlementBatch {
        self.engine.submit_batch(&batch.id).expect("submit");
        self.engine
            .finalize_batch(&batch.id, format!("0x{}", hex_prefix(batch)))
            .expect("finalize")
    }
}

fn hex_prefix(batch: &SettlementBatch) -> String {
    batch.batch_hash[..4].iter().map(|b| format!("{b:02x}")).collect()
}

fn entry(channel: ChannelId, from: &str, to: &str, nonce: u64, amount: Decimal) -> SettlementEntry {
    SettlementEntry {
        channel_id: channel,
        from: AgentId::from(from),
        to: AgentId::from(to),
        chain: Chain::Base,
        token: "USDC".into(),
        amount,
        nonce,
        signature: format!("sig:{from}:{nonce}"),
    }
}

// =============================================================================
// Test: Queue to finalize, then reconcile clean
// =============================================================================
#[test]
fn e2e_batch_lifecycle_and_clean_reconciliation() {
    let pipeline = SettlementPipeline::new(10, 3);
    let channel = ChannelId::new();

    pipeline.queue(entry(channel, "alice", "bob", 0, Decimal::new(500, 2)));
    pipeline.queue(entry(channel, "alice", "bob", 1, Decimal::new(350, 2)));
    pipeline.queue(entry(channel, "alice", "bob", 2, Decimal::new(1000, 2)));

    let batch = pipeline
        .engine
        .flush_batch(Chain::Base)
        .unwrap()
        .expect("three entries pending");
    assert_eq!(batch.len(), 3);
    assert_eq!(batch.total_amount, Decimal::new(1850, 2));
    assert!(sealer::verify_batch_hash(&batch));

    let done = pipeline.settle(&batch);
    assert_eq!(done.status, BatchStatus::Finalized);
    assert!(done.submitted_at.is_some() && done.finalized_at.is_some());

    let expected = net::expected_by_channel(&done.entries);
    let records: Vec<_> = expected
        .iter()
        .map(|(id, amount)| ReconcileRecord::new(*id, *amount, *amount))
        .collect();
    let report = pipeline.reconciler.reconcile(&records).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.total_expected, Decimal::new(1850, 2));
}

// =============================================================================
// Test: Randomized traffic always conserves value
// =============================================================================
#[test]
fn e2e_random_batches_conserve_value() {
    let pipeline = SettlementPipeline::new(25, 3);
    let agents = ["alice", "bob", "carol", "dave", "erin"];
    let channel = ChannelId::new();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut nonces = [0u64; 5];
    let mut flushed = Vec::new();

    for _ in 0..200 {
        let from = rng.gen_range(0..agents.len());
        let mut to = rng.gen_range(0..agents.len());
        if to == from {
            to = (to + 1) % agents.len();
        }
        let amount = Decimal::new(rng.gen_range(1..=10_000_000), 6);
        let e = entry(channel, agents[from], agents[to], nonces[from], amount);
        nonces[from] += 1;
        if let QueueOutcome::Flushed(batch) = pipeline.queue(e) {
            flushed.push(batch);
        }
    }

    assert_eq!(flushed.len(), 8);
    assert_eq!(pipeline.engine.pending_count(), 0);
    for batch in &flushed {
        let net = compute_net_settlement(&batch.entries).unwrap();
        verify_conservation(&net).expect("a cut batch nets to zero");
        let sum: Decimal = net.values().copied().sum();
        assert_eq!(sum, Decimal::ZERO);
        pipeline.settle(batch);
    }
    assert_eq!(
        pipeline.engine.batches_by_status(BatchStatus::Finalized).len(),
        8
    );
}

// =============================================================================
// Test: Chain rejection, bounded retries
// =============================================================================
#[test]
fn e2e_retry_until_limit() {
    let pipeline = SettlementPipeline::new(10, 1);
    pipeline.queue(entry(ChannelId::new(), "alice", "bob", 0, Decimal::ONE));
    let first = pipeline.engine.flush_batch(Chain::Base).unwrap().unwrap();

    pipeline.engine.submit_batch(&first.id).unwrap();
    pipeline.engine.fail_batch(&first.id, "nonce too low").unwrap();

    let second = pipeline.engine.retry_batch(&first.id).unwrap();
    assert_eq!(second.attempt, 2);
    assert_eq!(second.entries, first.entries);
    assert_eq!(second.batch_hash, first.batch_hash);
    assert_eq!(
        pipeline.engine.get(&first.id).unwrap().superseded_by,
        Some(second.id)
    );

    pipeline.engine.submit_batch(&second.id).unwrap();
    pipeline.engine.fail_batch(&second.id, "reverted").unwrap();
    let err = pipeline.engine.retry_batch(&second.id).unwrap_err();
    assert!(matches!(err, WorpxError::RetryLimitExceeded { attempts: 2, .. }));
    assert_eq!(pipeline.engine.batches_by_status(BatchStatus::Failed).len(), 2);
}

// =============================================================================
// Test: A retried batch can still finalize
// =============================================================================
#[test]
fn e2e_retry_then_finalize() {
    let pipeline = SettlementPipeline::new(10, 3);
    pipeline.queue(entry(ChannelId::new(), "alice", "bob", 0, Decimal::ONE));
    let first = pipeline.engine.flush_batch(Chain::Base).unwrap().unwrap();
    pipeline.engine.submit_batch(&first.id).unwrap();
    pipeline.engine.fail_batch(&first.id, "gas spike").unwrap();

    let retry = pipeline.engine.retry_batch(&first.id).unwrap();
    let done = pipeline.settle(&retry);
    assert_eq!(done.retry_of, Some(first.id));
    assert_eq!(pipeline.engine.finalized_volume(Chain::Base), Decimal::ONE);
}

// =============================================================================
// Test: A batch altered in storage is never submitted
// =============================================================================
#[test]
fn e2e_tampered_batch_refused() {
    let pipeline = SettlementPipeline::new(10, 3);
    pipeline.queue(entry(ChannelId::new(), "alice", "bob", 0, Decimal::ONE));
    let mut batch = pipeline.engine.flush_batch(Chain::Base).unwrap().unwrap();

    batch.entries[0].to = AgentId::from("mallory");
    pipeline.store.put(batch.id, batch.clone());

    assert!(pipeline.engine.submit_batch(&batch.id).is_err());
    let stored = pipeline.engine.get(&batch.id).unwrap();
    assert_eq!(stored.status, BatchStatus::Failed);
    assert!(stored.submitted_at.is_none());
}

// =============================================================================
// Test: Interval flush picks up a partial batch
// =============================================================================
#[test]
fn e2e_interval_flush() {
    let pipeline = SettlementPipeline::new(50, 3);
    pipeline.queue(entry(ChannelId::new(), "alice", "bob", 0, Decimal::ONE));
    pipeline.clock.advance(Duration::seconds(10));
    assert!(pipeline.engine.flush_due().unwrap().is_empty());

    pipeline.clock.advance(Duration::seconds(25));
    let batches = pipeline.engine.flush_due().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
}

// =============================================================================
// Test: Reconciliation flags a short settlement
// =============================================================================
#[test]
fn e2e_reconciliation_flags_shortfall() {
    let pipeline = SettlementPipeline::new(10, 3);
    let short = ChannelId::new();
    let exact = ChannelId::new();

    let report = pipeline
        .reconciler
        .reconcile(&[
            ReconcileRecord::new(short, Decimal::new(10_000, 2), Decimal::new(9_950, 2)),
            ReconcileRecord::new(exact, Decimal::new(2_000, 2), Decimal::new(2_000, 2)),
        ])
        .unwrap();

    let flagged: Vec<_> = report.discrepancies().collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].channel_id, short);
    assert_eq!(flagged[0].discrepancy, Decimal::new(50, 2));

    pipeline.reconciler.reconcile(&[]).unwrap();
    assert!(pipeline.reconciler.verify_chain());
    assert_eq!(pipeline.reconciler.reports().len(), 2);
}
