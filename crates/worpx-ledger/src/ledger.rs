//! Ledger orchestrator.
//!
//! Wires the components into the transfer pipeline:
//!
//! ```text
//! submit_transfer ──▶ NonceManager.allocate ──▶ Mempool.admit
//!                                                   │
//! process_pending ◀─────────── pop_highest_priority ┘ (per payer: ascending nonce)
//!   ├─ nonce still pending?             no  ──▶ rejected
//!   ├─ ChannelRegistry.apply_payment    err ──▶ release nonce, forget dedup key
//!   └─ SettlementEngine.queue_entry ──▶ (auto-flush) batch
//!
//! on_batch_confirmed ──▶ finalize_batch ──▶ NonceManager.confirm(tx_hash) per entry
//! on_batch_failed    ──▶ fail_batch ──▶ retry_batch (bounded)
//!                                          └─ exhausted ──▶ DisputeResolver.file per channel
//! ```
//!
//! Each component keeps its own per-entity serialization; the ledger holds
//! no lock of its own.

use std::{collections::HashMap, sync::Arc};

use rust_decimal::Decimal;
use worpx_channel::{ChannelRegistry, EscrowVault};
use worpx_dispute::DisputeResolver;
use worpx_ingress::{Mempool, NonceManager};
use worpx_settlement::{QueueOutcome, Reconciler, SettlementEngine};
use worpx_types::{
    AgentId, BatchId, Chain, Channel, ChannelId, ChannelPhase, Dispute, DisputeId, DisputeReason,
    EntryId, EscrowId,
    LedgerConfig, MempoolEntry, PaymentReceipt, ReconciliationReport, Result, SettlementBatch,
    SettlementEntry, SharedClock, TransferIntent, WorpxError, amount, system_clock,
};

/// A transfer as requested by the paying agent. Chain and token are taken
/// from the channel; the nonce is allocated by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub channel_id: ChannelId,
    pub from: AgentId,
    pub to: AgentId,
    pub amount: Decimal,
    pub priority: i64,
    pub gas_price: u64,
    pub signature: String,
}

/// Receipt for an admitted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTicket {
    pub entry_id: EntryId,
    pub nonce: u64,
}

/// Outcome of one [`Ledger::process_pending`] pass.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub applied: Vec<PaymentReceipt>,
    /// Transfers dropped before touching a channel, with the reason.
    pub rejected: Vec<(EntryId, WorpxError)>,
    /// Batches cut because a queue reached the batch size.
    pub flushed: Vec<SettlementBatch>,
}

/// Outcome of [`Ledger::on_batch_failed`].
#[derive(Debug)]
pub enum FailureOutcome {
    /// A successor batch was created for resubmission.
    Retried(SettlementBatch),
    /// Retries are exhausted; disputes were filed for the batch's channels.
    Escalated(Vec<Dispute>),
}

/// What one sweep changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_escrows: Vec<EscrowId>,
    pub pruned_entries: usize,
    pub expired_disputes: Vec<DisputeId>,
    pub flushed_batches: Vec<BatchId>,
}

impl SweepReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expired_escrows.is_empty()
            && self.pruned_entries == 0
            && self.expired_disputes.is_empty()
            && self.flushed_batches.is_empty()
    }
}

/// One ledger instance owning every component.
pub struct Ledger {
    config: LedgerConfig,
    nonces: NonceManager,
    mempool: Mempool,
    channels: ChannelRegistry,
    escrow: EscrowVault,
    settlement: SettlementEngine,
    reconciler: Reconciler,
    disputes: DisputeResolver,
}

impl Ledger {
    /// Build a ledger on in-memory stores.
    #[must_use]
    pub fn new(config: LedgerConfig, clock: SharedClock) -> Self {
        tracing::info!(
            engine = worpx_types::constants::ENGINE_NAME,
            version = worpx_types::constants::VERSION,
            batch_size = config.settlement.batch_size,
            mempool_max = config.mempool.max_size,
            "ledger starting"
        );
        Self {
            nonces: NonceManager::new(Arc::clone(&clock)),
            mempool: Mempool::new(config.mempool.clone(), Arc::clone(&clock)),
            channels: ChannelRegistry::in_memory(config.channel.clone(), Arc::clone(&clock)),
            escrow: EscrowVault::in_memory(config.escrow.clone(), Arc::clone(&clock)),
            settlement: SettlementEngine::in_memory(config.settlement.clone(), Arc::clone(&clock)),
            reconciler: Reconciler::new(config.reconciler.clone(), Arc::clone(&clock)),
            disputes: DisputeResolver::in_memory(config.dispute.clone(), clock),
            config,
        }
    }

    /// Ledger on the system clock.
    #[must_use]
    pub fn with_system_clock(config: LedgerConfig) -> Self {
        Self::new(config, system_clock())
    }

    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    #[must_use]
    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }

    #[must_use]
    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    #[must_use]
    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    #[must_use]
    pub fn escrow(&self) -> &EscrowVault {
        &self.escrow
    }

    #[must_use]
    pub fn settlement(&self) -> &SettlementEngine {
        &self.settlement
    }

    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    #[must_use]
    pub fn disputes(&self) -> &DisputeResolver {
        &self.disputes
    }

    /// Allocate a nonce for the payer and admit the transfer to the mempool.
    ///
    /// The channel is only read here; capacity is enforced when the
    /// transfer is processed.
    ///
    /// # Errors
    /// - `InvalidAmount`
    /// - `ChannelNotFound`
    /// - `ChannelNotActive` unless the channel is ACTIVE
    /// - `UnauthorizedParty` unless `from` and `to` are the channel's two parties
    pub fn submit_transfer(&self, req: TransferRequest) -> Result<TransferTicket> {
        amount::validate_amount(req.amount)?;
        let channel = self
            .channels
            .get(&req.channel_id)
            .ok_or(WorpxError::ChannelNotFound(req.channel_id))?;
        if channel.phase != ChannelPhase::Active {
            return Err(WorpxError::ChannelNotActive {
                channel_id: channel.id,
                phase: channel.phase,
            });
        }
        if channel.other_party(&req.from) != Some(&req.to) {
            return Err(WorpxError::UnauthorizedParty {
                agent: req.from,
                entity: channel.id.to_string(),
            });
        }

        let nonce = self.nonces.allocate(&req.from, channel.chain);
        let intent = TransferIntent {
            from: req.from,
            to: req.to,
            channel_id: channel.id,
            chain: channel.chain,
            token: channel.token,
            amount: req.amount,
            nonce,
            priority: req.priority,
            gas_price: req.gas_price,
            signature: req.signature,
        };
        let from = intent.from.clone();
        let chain = intent.chain;

        match self.mempool.admit(intent) {
            Some(entry_id) => {
                tracing::info!(%entry_id, agent = %from, %chain, nonce, "transfer submitted");
                Ok(TransferTicket { entry_id, nonce })
            }
            None => {
                // A fresh nonce cannot collide unless the sequence was reset.
                self.nonces.release(&from, chain, nonce)?;
                Err(WorpxError::Internal(format!(
                    "nonce {nonce} for {from} on {chain} already admitted"
                )))
            }
        }
    }

    /// Withdraw a transfer that is still waiting in the mempool. Its nonce
    /// is released and its dedup key forgotten.
    ///
    /// # Errors
    /// - `EntryNotFound` once the entry was processed, pruned or evicted
    /// - `UnauthorizedParty` unless `requested_by` is the payer
    pub fn cancel_transfer(&self, id: &EntryId, requested_by: &AgentId) -> Result<MempoolEntry> {
        let entry = self.mempool.get(id).ok_or(WorpxError::EntryNotFound(*id))?;
        if &entry.intent.from != requested_by {
            return Err(WorpxError::UnauthorizedParty {
                agent: requested_by.clone(),
                entity: format!("mempool entry {id}"),
            });
        }
        let entry = self.mempool.remove(id).ok_or(WorpxError::EntryNotFound(*id))?;
        let intent = &entry.intent;
        self.nonces.release(&intent.from, intent.chain, intent.nonce)?;
        tracing::info!(entry_id = %id, agent = %intent.from, nonce = intent.nonce, "transfer cancelled");
        Ok(entry)
    }

    /// Pop up to `max` transfers in service order, apply each to its channel
    /// and queue the resulting settlement entry.
    ///
    /// Within one pass a payer's transfers are applied in ascending nonce
    /// order, in the slots service order gave that payer; other payers keep
    /// their positions.
    ///
    /// A transfer the channel rejects has its nonce released and its dedup
    /// key forgotten, so a corrected resubmission is admitted.
    pub fn process_pending(&self, max: usize) -> ProcessReport {
        let mut report = ProcessReport::default();
        let popped = sequence_by_nonce(self.mempool.pop_highest_priority(max));
        for entry in popped {
            match self.process_entry(&entry) {
                Ok((receipt, flushed)) => {
                    report.applied.push(receipt);
                    report.flushed.extend(flushed);
                }
                Err(err) => {
                    tracing::warn!(entry_id = %entry.id, error = %err, "transfer rejected");
                    self.abandon(&entry);
                    report.rejected.push((entry.id, err));
                }
            }
        }
        if !report.applied.is_empty() || !report.rejected.is_empty() {
            tracing::info!(
                applied = report.applied.len(),
                rejected = report.rejected.len(),
                flushed = report.flushed.len(),
                "processed pending transfers"
            );
        }
        report
    }

    fn process_entry(
        &self,
        entry: &MempoolEntry,
    ) -> Result<(PaymentReceipt, Option<SettlementBatch>)> {
        let intent = &entry.intent;
        if !self.nonces.is_pending(&intent.from, intent.chain, intent.nonce) {
            return Err(WorpxError::NonceNotAllocated {
                agent: intent.from.clone(),
                chain: intent.chain,
                nonce: intent.nonce,
            });
        }
        let receipt = self
            .channels
            .apply_payment(&intent.channel_id, &intent.from, intent.amount)?;

        let outcome = self.settlement.queue_entry(SettlementEntry {
            channel_id: intent.channel_id,
            from: intent.from.clone(),
            to: receipt.to.clone(),
            chain: intent.chain,
            token: intent.token.clone(),
            amount: intent.amount,
            nonce: intent.nonce,
            signature: intent.signature.clone(),
        });
        match outcome {
            Ok(QueueOutcome::Flushed(batch)) => Ok((receipt, Some(batch))),
            Ok(QueueOutcome::Queued { .. } | QueueOutcome::Duplicate) => Ok((receipt, None)),
            Err(err) => {
                // The payment already moved channel state; keep the nonce.
                tracing::error!(
                    channel_id = %intent.channel_id,
                    nonce = intent.nonce,
                    error = %err,
                    "payment applied but settlement queueing failed"
                );
                Ok((receipt, None))
            }
        }
    }

    fn abandon(&self, entry: &MempoolEntry) {
        let intent = &entry.intent;
        if let Err(err) = self.nonces.release(&intent.from, intent.chain, intent.nonce) {
            tracing::warn!(entry_id = %entry.id, error = %err, "nonce not released");
        }
        self.mempool.forget(&intent.dedup_key());
    }

    /// The chain confirmed a batch: finalize it and confirm every entry's
    /// nonce against the transaction hash.
    ///
    /// # Errors
    /// `BatchNotFound` or `InvalidBatchTransition` from finalization.
    pub fn on_batch_confirmed(&self, id: &BatchId, tx_hash: &str) -> Result<SettlementBatch> {
        let batch = self.settlement.finalize_batch(id, tx_hash)?;
        for entry in &batch.entries {
            if let Err(err) = self
                .nonces
                .confirm(&entry.from, entry.chain, entry.nonce, tx_hash)
            {
                tracing::error!(
                    batch_id = %id,
                    agent = %entry.from,
                    nonce = entry.nonce,
                    error = %err,
                    "finalized entry nonce could not be confirmed"
                );
            }
        }
        Ok(batch)
    }

    /// The chain rejected a batch: mark it failed and resubmit if retries
    /// remain. Once retries are exhausted the batch's channels are handed
    /// to the dispute resolver: each channel's counterparty files a
    /// `timeout` dispute against its initiator, unless the channel already
    /// has an open dispute.
    ///
    /// # Errors
    /// `BatchNotFound`, `InvalidBatchTransition`, `BatchNotRetryable`.
    pub fn on_batch_failed(&self, id: &BatchId, reason: &str) -> Result<FailureOutcome> {
        let failed = self.settlement.fail_batch(id, reason)?;
        match self.settlement.retry_batch(id) {
            Ok(retry) => Ok(FailureOutcome::Retried(retry)),
            Err(WorpxError::RetryLimitExceeded { attempts, .. }) => {
                tracing::error!(batch_id = %id, attempts, "settlement batch abandoned after retries");
                let filed = failed
                    .channels()
                    .into_iter()
                    .filter_map(|channel_id| self.file_once(&channel_id, DisputeReason::Timeout))
                    .collect();
                Ok(FailureOutcome::Escalated(filed))
            }
            Err(err) => Err(err),
        }
    }

    /// Move an ACTIVE channel to DISPUTING and file a dispute against the
    /// other party. Nothing is filed if the transition is rejected.
    ///
    /// # Errors
    /// `ChannelNotFound`, `UnauthorizedParty`, `InvalidTransition`.
    pub fn contest_channel(
        &self,
        channel_id: &ChannelId,
        initiator: &AgentId,
        reason: DisputeReason,
    ) -> Result<Dispute> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or(WorpxError::ChannelNotFound(*channel_id))?;
        let respondent = channel
            .other_party(initiator)
            .cloned()
            .ok_or_else(|| WorpxError::UnauthorizedParty {
                agent: initiator.clone(),
                entity: channel_id.to_string(),
            })?;

        self.channels.transition(channel_id, ChannelPhase::Disputing)?;
        self.disputes
            .file(*channel_id, initiator.clone(), respondent, reason)
    }

    /// File a `payment_mismatch` dispute for every flagged channel in the
    /// report that has no open dispute yet. The counterparty (the payee) is
    /// the initiator.
    pub fn escalate_discrepancies(&self, report: &ReconciliationReport) -> Vec<Dispute> {
        report
            .discrepancies()
            .filter_map(|flagged| self.file_once(&flagged.channel_id, DisputeReason::PaymentMismatch))
            .collect()
    }

    /// File a dispute by the channel's counterparty against its initiator,
    /// unless one is already open on the channel.
    fn file_once(&self, channel_id: &ChannelId, reason: DisputeReason) -> Option<Dispute> {
        let Some(Channel {
            id,
            initiator,
            counterparty,
            ..
        }) = self.channels.get(channel_id)
        else {
            tracing::warn!(%channel_id, ?reason, "escalation for unknown channel");
            return None;
        };
        let open = self
            .disputes
            .disputes_for_channel(&id)
            .iter()
            .any(|d| !d.status.is_terminal());
        if open {
            return None;
        }
        match self.disputes.file(id, counterparty, initiator, reason) {
            Ok(dispute) => Some(dispute),
            Err(err) => {
                tracing::warn!(channel_id = %id, error = %err, "escalation not filed");
                None
            }
        }
    }

    /// Run every periodic maintenance pass once: escrow expiry, mempool
    /// pruning (releasing the pruned nonces), dispute expiry and interval
    /// flushes.
    ///
    /// # Errors
    /// `ArithmeticOverflow` from an interval flush. The other passes have
    /// already run by then.
    pub fn sweep(&self) -> Result<SweepReport> {
        let expired_escrows = self.escrow.expire_stale();

        let pruned = self.mempool.prune_expired();
        for entry in &pruned {
            let intent = &entry.intent;
            if let Err(err) = self.nonces.release(&intent.from, intent.chain, intent.nonce) {
                tracing::warn!(entry_id = %entry.id, error = %err, "pruned entry nonce not released");
            }
        }

        let expired_disputes = self.disputes.expire_stale();
        let flushed_batches = self
            .settlement
            .flush_due()?
            .into_iter()
            .map(|b| b.id)
            .collect();

        let report = SweepReport {
            expired_escrows,
            pruned_entries: pruned.len(),
            expired_disputes,
            flushed_batches,
        };
        if !report.is_empty() {
            tracing::info!(
                escrows = report.expired_escrows.len(),
                pruned = report.pruned_entries,
                disputes = report.expired_disputes.len(),
                batches = report.flushed_batches.len(),
                "sweep complete"
            );
        }
        Ok(report)
    }
}

/// Reorder each payer's entries by nonce within the slots service order
/// gave that payer.
fn sequence_by_nonce(entries: Vec<MempoolEntry>) -> Vec<MempoolEntry> {
    let mut slots_by_payer: HashMap<(AgentId, Chain), Vec<usize>> = HashMap::new();
    for (slot, entry) in entries.iter().enumerate() {
        slots_by_payer
            .entry((entry.intent.from.clone(), entry.intent.chain))
            .or_default()
            .push(slot);
    }
    let mut slots: Vec<Option<MempoolEntry>> = entries.into_iter().map(Some).collect();
    for positions in slots_by_payer.values() {
        let mut group: Vec<MempoolEntry> = positions.iter().filter_map(|&i| slots[i].take()).collect();
        group.sort_by_key(|e| e.intent.nonce);
        for (&i, entry) in positions.iter().zip(group) {
            slots[i] = Some(entry);
        }
    }
    slots.into_iter().flatten().collect()
}
