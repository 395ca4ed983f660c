//! Channel registry: the single owner of channel state.
//!
//! Every mutation (transition, funding, payment) runs inside a
//! per-channel [`transact`] so that concurrent callers on the same channel
//! are serialized while unrelated channels proceed independently, and a
//! rejected mutation leaves the stored channel untouched.

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;
use worpx_types::{
    AgentId, Chain, Channel, ChannelConfig, ChannelId, ChannelPhase, EntityStore, MemoryStore,
    PaymentReceipt, Result, SharedClock, Token, WorpxError, amount, transact,
};

use crate::state_machine;

/// Owns all channels and enforces the lifecycle rules.
pub struct ChannelRegistry {
    store: Arc<dyn EntityStore<ChannelId, Channel>>,
    config: ChannelConfig,
    clock: SharedClock,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore<ChannelId, Channel>>,
        config: ChannelConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Registry backed by a fresh [`MemoryStore`].
    #[must_use]
    pub fn in_memory(config: ChannelConfig, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config, clock)
    }

    /// Open a channel in PROPOSED with nonce 0 and no deposit.
    ///
    /// # Errors
    /// `UnauthorizedParty` if the initiator names themselves as counterparty.
    pub fn propose(
        &self,
        initiator: AgentId,
        counterparty: AgentId,
        chain: Chain,
        token: impl Into<Token>,
    ) -> Result<Channel> {
        if initiator == counterparty {
            return Err(WorpxError::UnauthorizedParty {
                agent: initiator,
                entity: "channel with self".into(),
            });
        }
        let channel = Channel::proposed(initiator, counterparty, chain, token, self.clock.now());
        tracing::info!(
            channel_id = %channel.id,
            initiator = %channel.initiator,
            counterparty = %channel.counterparty,
            chain = %channel.chain,
            "channel proposed"
        );
        self.store.put(channel.id, channel.clone());
        Ok(channel)
    }

    /// Add `amount` to the deposit and attempt PROPOSED → FUNDED.
    ///
    /// Returns `Ok(false)` and leaves the channel untouched (deposit
    /// included) if the transition is not allowed. A zero amount is such a
    /// no-op.
    ///
    /// # Errors
    /// - `InvalidAmount` for a negative amount or one with too many decimals
    /// - `ChannelNotFound`
    /// - `ArithmeticOverflow` on deposit overflow
    pub fn fund(&self, id: &ChannelId, amount: Decimal) -> Result<bool> {
        if !amount.is_zero() {
            amount::validate_amount(amount)?;
        }
        let now = self.clock.now();
        let window = self.config.dispute_window();
        let outcome = transact(self.store.as_ref(), id, |ch: &mut Channel| {
            ch.deposit = ch
                .deposit
                .checked_add(amount)
                .ok_or(WorpxError::ArithmeticOverflow)?;
            state_machine::evaluate(ch, ChannelPhase::Funded, now, window)?.apply(ch);
            Ok(ch.deposit)
        })
        .ok_or(WorpxError::ChannelNotFound(*id))?;

        match outcome {
            Ok(deposit) => {
                tracing::info!(channel_id = %id, %deposit, "channel funded");
                Ok(true)
            }
            Err(WorpxError::InvalidTransition { from, reason, .. }) => {
                tracing::debug!(channel_id = %id, %from, %reason, "funding rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Move the channel to `target`.
    ///
    /// # Errors
    /// `ChannelNotFound`, or `InvalidTransition` when no rule matches or
    /// its guard fails (the channel is left untouched).
    pub fn transition(&self, id: &ChannelId, target: ChannelPhase) -> Result<Channel> {
        let now = self.clock.now();
        let window = self.config.dispute_window();
        let channel = transact(self.store.as_ref(), id, |ch: &mut Channel| {
            state_machine::evaluate(ch, target, now, window)?.apply(ch);
            Ok(ch.clone())
        })
        .ok_or(WorpxError::ChannelNotFound(*id))??;

        tracing::info!(
            channel_id = %id,
            phase = %channel.phase,
            version = channel.version,
            "channel transition"
        );
        Ok(channel)
    }

    /// Phases the channel can move to right now.
    ///
    /// # Errors
    /// `ChannelNotFound`.
    pub fn allowed_transitions(&self, id: &ChannelId) -> Result<Vec<ChannelPhase>> {
        let channel = self.require(id)?;
        Ok(state_machine::allowed(&channel, self.clock.now()))
    }

    /// Apply a payment from `payer` to the other party and advance the
    /// payment nonce.
    ///
    /// # Errors
    /// - `ChannelNotFound`
    /// - `ChannelNotActive` unless the channel is ACTIVE
    /// - `UnauthorizedParty` if `payer` is not a party
    /// - `InvalidAmount` for non-positive amounts
    /// - `ChannelCapacityExceeded` if cumulative payments would pass the deposit
    pub fn apply_payment(
        &self,
        id: &ChannelId,
        payer: &AgentId,
        amount: Decimal,
    ) -> Result<PaymentReceipt> {
        let amount = amount::validate_amount(amount)?;
        let now = self.clock.now();
        let receipt = transact(self.store.as_ref(), id, |ch: &mut Channel| {
            if ch.phase != ChannelPhase::Active {
                return Err(WorpxError::ChannelNotActive {
                    channel_id: ch.id,
                    phase: ch.phase,
                });
            }
            let payee = ch
                .other_party(payer)
                .cloned()
                .ok_or_else(|| WorpxError::UnauthorizedParty {
                    agent: payer.clone(),
                    entity: ch.id.to_string(),
                })?;
            let remaining = ch.remaining_capacity();
            if amount > remaining {
                return Err(WorpxError::ChannelCapacityExceeded {
                    requested: amount,
                    remaining,
                });
            }

            ch.applied += amount;
            ch.nonce += 1;
            ch.last_activity = now;
            Ok(PaymentReceipt {
                channel_id: ch.id,
                from: payer.clone(),
                to: payee,
                amount,
                channel_nonce: ch.nonce,
                cumulative: ch.applied,
                applied_at: now,
            })
        })
        .ok_or(WorpxError::ChannelNotFound(*id))??;

        tracing::debug!(
            channel_id = %id,
            from = %receipt.from,
            %amount,
            nonce = receipt.channel_nonce,
            cumulative = %receipt.cumulative,
            "payment applied"
        );
        Ok(receipt)
    }

    #[must_use]
    pub fn get(&self, id: &ChannelId) -> Option<Channel> {
        self.store.get(id)
    }

    /// Deposit not yet consumed by payments.
    ///
    /// # Errors
    /// `ChannelNotFound`.
    pub fn remaining_capacity(&self, id: &ChannelId) -> Result<Decimal> {
        Ok(self.require(id)?.remaining_capacity())
    }

    /// Non-closed channels with no activity for longer than `max_idle`.
    #[must_use]
    pub fn stale_channels(&self, max_idle: Duration) -> Vec<Channel> {
        let cutoff = self.clock.now() - max_idle;
        self.store
            .keys()
            .into_iter()
            .filter_map(|id| self.store.get(&id))
            .filter(|ch| !ch.phase.is_terminal() && ch.last_activity < cutoff)
            .collect()
    }

    /// Channels in which `agent` is either party.
    #[must_use]
    pub fn channels_for_agent(&self, agent: &AgentId) -> Vec<Channel> {
        self.store
            .keys()
            .into_iter()
            .filter_map(|id| self.store.get(&id))
            .filter(|ch| ch.is_party(agent))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn require(&self, id: &ChannelId) -> Result<Channel> {
        self.store.get(id).ok_or(WorpxError::ChannelNotFound(*id))
    }
}
