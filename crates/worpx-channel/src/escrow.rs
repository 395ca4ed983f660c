//! Escrow vault: conditionally locked funds, independent of channel state.
//!
//! The vault owns every [`EscrowDeposit`] and a running locked balance per
//! `(chain, token)`. The balance rises on `lock` and falls exactly once,
//! when a deposit reaches RELEASED or REFUNDED. `expire_stale` only
//! records intent (LOCKED → EXPIRED); the funds move on the following
//! `refund`.

use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use rust_decimal::Decimal;
use worpx_types::{
    AgentId, Chain, EntityStore, EscrowConfig, EscrowDeposit, EscrowId, EscrowStatus,
    MemoryStore, ReleaseCondition, Result, SharedClock, Token, WorpxError, amount, transact,
};

/// Parameters of a new escrow lock.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub depositor: AgentId,
    pub beneficiary: AgentId,
    pub chain: Chain,
    pub token: Token,
    pub amount: Decimal,
    pub condition: ReleaseCondition,
    /// Falls back to the configured default TTL.
    pub ttl: Option<Duration>,
}

/// Owns escrow deposits and the per-token locked balances.
pub struct EscrowVault {
    store: Arc<dyn EntityStore<EscrowId, EscrowDeposit>>,
    locked: DashMap<(Chain, Token), Decimal>,
    config: EscrowConfig,
    clock: SharedClock,
}

impl EscrowVault {
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore<EscrowId, EscrowDeposit>>,
        config: EscrowConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            locked: DashMap::new(),
            config,
            clock,
        }
    }

    #[must_use]
    pub fn in_memory(config: EscrowConfig, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config, clock)
    }

    /// Lock funds against a release condition.
    ///
    /// # Errors
    /// `InvalidAmount` for non-positive amounts or a non-positive TTL.
    pub fn lock(&self, req: LockRequest) -> Result<EscrowId> {
        let amount = amount::validate_amount(req.amount)?;
        let ttl = req.ttl.unwrap_or_else(|| self.config.default_ttl());
        if ttl <= Duration::zero() {
            return Err(WorpxError::InvalidAmount {
                reason: format!("escrow ttl must be positive, got {ttl}"),
            });
        }

        let now = self.clock.now();
        let deposit = EscrowDeposit {
            id: EscrowId::new(),
            depositor: req.depositor,
            beneficiary: req.beneficiary,
            chain: req.chain,
            token: req.token,
            amount,
            condition: req.condition,
            status: EscrowStatus::Locked,
            created_at: now,
            expires_at: now + ttl,
            settled_at: None,
        };
        let id = deposit.id;
        self.adjust_locked(deposit.chain, &deposit.token, amount);
        tracing::info!(
            escrow_id = %id,
            depositor = %deposit.depositor,
            beneficiary = %deposit.beneficiary,
            %amount,
            condition = deposit.condition.kind(),
            "escrow locked"
        );
        self.store.put(id, deposit);
        Ok(id)
    }

    /// Release the funds to the beneficiary.
    ///
    /// Returns `Ok(false)` if the condition does not hold yet.
    ///
    /// # Errors
    /// - `EscrowNotFound`
    /// - `UnauthorizedParty` if `requested_by` is neither depositor nor beneficiary
    /// - `EscrowNotLocked` once the deposit has left LOCKED
    pub fn release(&self, id: &EscrowId, requested_by: &AgentId) -> Result<bool> {
        let now = self.clock.now();
        self.settle(id, requested_by, EscrowStatus::Released, |d| {
            d.condition.evaluate(now)
        })
    }

    /// Return the funds to the depositor.
    ///
    /// Allowed from LOCKED once expired, or from EXPIRED. Returns
    /// `Ok(false)` if the deposit has not expired yet.
    ///
    /// # Errors
    /// - `EscrowNotFound`
    /// - `UnauthorizedParty` if `requested_by` is neither depositor nor beneficiary
    /// - `EscrowNotLocked` once the deposit is RELEASED or REFUNDED
    pub fn refund(&self, id: &EscrowId, requested_by: &AgentId) -> Result<bool> {
        let now = self.clock.now();
        self.settle(id, requested_by, EscrowStatus::Refunded, |d| {
            d.status == EscrowStatus::Expired || d.is_expired_at(now)
        })
    }

    /// Shared terminal transition. The status table decides whether the
    /// move is legal at all; `ready` decides, under the per-deposit lock,
    /// whether it may happen now.
    fn settle<F>(
        &self,
        id: &EscrowId,
        requested_by: &AgentId,
        target: EscrowStatus,
        ready: F,
    ) -> Result<bool>
    where
        F: FnOnce(&EscrowDeposit) -> bool,
    {
        let now = self.clock.now();
        let settled = transact(self.store.as_ref(), id, |d: &mut EscrowDeposit| {
            if !d.is_party(requested_by) {
                return Err(WorpxError::UnauthorizedParty {
                    agent: requested_by.clone(),
                    entity: d.id.to_string(),
                });
            }
            if !d.status.can_transition_to(target) {
                return Err(not_locked(d));
            }
            if !ready(d) {
                return Ok(None);
            }
            d.status = target;
            d.settled_at = Some(now);
            Ok(Some((d.chain, d.token.clone(), d.amount)))
        })
        .ok_or(WorpxError::EscrowNotFound(*id))??;

        let Some((chain, token, amount)) = settled else {
            tracing::debug!(escrow_id = %id, %target, "escrow not ready");
            return Ok(false);
        };
        self.adjust_locked(chain, &token, -amount);
        tracing::info!(escrow_id = %id, status = %target, by = %requested_by, %amount, "escrow settled");
        Ok(true)
    }

    /// Mark every LOCKED deposit past its expiry as EXPIRED. Funds stay
    /// locked until `refund`. Idempotent.
    pub fn expire_stale(&self) -> Vec<EscrowId> {
        let now = self.clock.now();
        let expired: Vec<EscrowId> = self
            .store
            .keys()
            .into_iter()
            .filter(|id| {
                let outcome = transact(self.store.as_ref(), id, |d: &mut EscrowDeposit| {
                    if d.status.can_transition_to(EscrowStatus::Expired) && d.is_expired_at(now) {
                        d.status = EscrowStatus::Expired;
                        Ok(true)
                    } else {
                        Ok(false)
                    }
                });
                matches!(outcome, Some(Ok(true)))
            })
            .collect();
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "escrow deposits expired");
        }
        expired
    }

    /// Attach the execution reference to a skill-completion condition.
    ///
    /// # Errors
    /// `EscrowNotFound`, `EscrowNotLocked`, or `ConditionMismatch` if the
    /// deposit is not skill-completion backed.
    pub fn record_execution(&self, id: &EscrowId, execution_id: impl Into<String>) -> Result<()> {
        let execution_id = execution_id.into();
        transact(self.store.as_ref(), id, |d: &mut EscrowDeposit| {
            if d.status != EscrowStatus::Locked {
                return Err(not_locked(d));
            }
            match &mut d.condition {
                ReleaseCondition::SkillCompletion {
                    execution_id: slot, ..
                } => {
                    *slot = Some(execution_id);
                    Ok(())
                }
                _ => Err(WorpxError::ConditionMismatch {
                    escrow_id: d.id,
                    expected: "skill_completion",
                }),
            }
        })
        .ok_or(WorpxError::EscrowNotFound(*id))?
    }

    /// Add a signer to a multi-signature condition. Returns `Ok(false)` if
    /// that signer already signed.
    ///
    /// # Errors
    /// `EscrowNotFound`, `EscrowNotLocked`, or `ConditionMismatch` if the
    /// deposit is not multi-sig backed.
    pub fn add_signature(&self, id: &EscrowId, signer: impl Into<String>) -> Result<bool> {
        let signer = signer.into();
        transact(self.store.as_ref(), id, |d: &mut EscrowDeposit| {
            if d.status != EscrowStatus::Locked {
                return Err(not_locked(d));
            }
            match &mut d.condition {
                ReleaseCondition::MultiSig { signatures, .. } => {
                    if signatures.contains(&signer) {
                        Ok(false)
                    } else {
                        signatures.push(signer);
                        Ok(true)
                    }
                }
                _ => Err(WorpxError::ConditionMismatch {
                    escrow_id: d.id,
                    expected: "multi_sig",
                }),
            }
        })
        .ok_or(WorpxError::EscrowNotFound(*id))?
    }

    /// Whether `release` would succeed now (ignoring caller authorization).
    ///
    /// # Errors
    /// `EscrowNotFound`.
    pub fn can_release(&self, id: &EscrowId) -> Result<bool> {
        let d = self.store.get(id).ok_or(WorpxError::EscrowNotFound(*id))?;
        Ok(d.status == EscrowStatus::Locked && d.condition.evaluate(self.clock.now()))
    }

    #[must_use]
    pub fn get(&self, id: &EscrowId) -> Option<EscrowDeposit> {
        self.store.get(id)
    }

    /// Deposits where `agent` is depositor or beneficiary, oldest first.
    #[must_use]
    pub fn deposits_for_agent(&self, agent: &AgentId) -> Vec<EscrowDeposit> {
        let mut out: Vec<EscrowDeposit> = self
            .store
            .keys()
            .into_iter()
            .filter_map(|id| self.store.get(&id))
            .filter(|d| d.is_party(agent))
            .collect();
        out.sort_by_key(|d| (d.created_at, d.id));
        out
    }

    /// Funds currently locked for `(chain, token)`, EXPIRED deposits included.
    #[must_use]
    pub fn total_locked(&self, chain: Chain, token: &str) -> Decimal {
        self.locked
            .get(&(chain, token.to_string()))
            .map_or(Decimal::ZERO, |v| *v)
    }

    fn adjust_locked(&self, chain: Chain, token: &str, delta: Decimal) {
        *self
            .locked
            .entry((chain, token.to_string()))
            .or_insert(Decimal::ZERO) += delta;
    }
}

fn not_locked(d: &EscrowDeposit) -> WorpxError {
    WorpxError::EscrowNotLocked {
        escrow_id: d.id,
        status: d.status,
    }
}
