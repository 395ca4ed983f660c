//! Dispute resolver.
//!
//! ```text
//! file ──▶ FILED ──first evidence──▶ EVIDENCE_PHASE ──escalate──▶ ARBITRATION ──resolve──▶ RESOLVED
//!
//! auto_resolve: any non-terminal status ──▶ RESOLVED (evidence-count heuristic)
//! expire_stale: any non-terminal status past its deadline ──▶ EXPIRED
//! ```
//!
//! Each dispute is mutated inside its own [`transact`], so evidence,
//! escalation and expiry on one dispute serialize and never half-apply.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use worpx_types::{
    AgentId, ChannelId, Dispute, DisputeConfig, DisputeId, DisputeReason, DisputeStatus,
    EntityStore, Evidence, MemoryStore, Outcome, Resolution, Result, SharedClock, WorpxError,
    transact,
};

pub struct DisputeResolver {
    store: Arc<dyn EntityStore<DisputeId, Dispute>>,
    config: DisputeConfig,
    clock: SharedClock,
}

impl DisputeResolver {
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore<DisputeId, Dispute>>,
        config: DisputeConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    #[must_use]
    pub fn in_memory(config: DisputeConfig, clock: SharedClock) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config, clock)
    }

    /// Open a dispute in FILED with the evidence deadline set.
    ///
    /// # Errors
    /// `UnauthorizedParty` if the initiator names themselves as respondent.
    pub fn file(
        &self,
        channel_id: ChannelId,
        initiator: AgentId,
        respondent: AgentId,
        reason: DisputeReason,
    ) -> Result<Dispute> {
        if initiator == respondent {
            return Err(WorpxError::UnauthorizedParty {
                agent: initiator,
                entity: format!("dispute against self on channel {channel_id}"),
            });
        }
        let now = self.clock.now();
        let dispute = Dispute {
            id: DisputeId::new(),
            channel_id,
            initiator,
            respondent,
            reason,
            evidence: Vec::new(),
            status: DisputeStatus::Filed,
            resolution: None,
            filed_at: now,
            deadline_at: now + self.config.evidence_window(),
            resolved_at: None,
        };
        tracing::info!(
            dispute_id = %dispute.id,
            %channel_id,
            initiator = %dispute.initiator,
            respondent = %dispute.respondent,
            ?reason,
            deadline = %dispute.deadline_at,
            "dispute filed"
        );
        self.store.put(dispute.id, dispute.clone());
        Ok(dispute)
    }

    /// Record an evidence hash from one of the two parties. The first piece
    /// of evidence moves FILED → EVIDENCE_PHASE.
    ///
    /// # Errors
    /// - `DisputeNotFound`
    /// - `UnauthorizedParty` if `agent` is neither initiator nor respondent
    /// - `WrongDisputePhase` from ARBITRATION onward
    /// - `DisputeDeadlinePassed` once the evidence deadline has lapsed
    pub fn submit_evidence(
        &self,
        id: &DisputeId,
        agent: &AgentId,
        description: impl Into<String>,
        data_hash: impl Into<String>,
    ) -> Result<Dispute> {
        let now = self.clock.now();
        let evidence = Evidence {
            submitted_by: agent.clone(),
            description: description.into(),
            data_hash: data_hash.into(),
            submitted_at: now,
        };
        let dispute = transact(self.store.as_ref(), id, |d: &mut Dispute| {
            if !d.is_party(agent) {
                return Err(WorpxError::UnauthorizedParty {
                    agent: agent.clone(),
                    entity: format!("dispute {}", d.id),
                });
            }
            if !d.status.accepts_evidence() {
                return Err(wrong_phase(d, "submit evidence"));
            }
            if d.deadline_passed(now) {
                return Err(WorpxError::DisputeDeadlinePassed(d.id));
            }
            d.evidence.push(evidence);
            d.status = DisputeStatus::EvidencePhase;
            Ok(d.clone())
        })
        .ok_or(WorpxError::DisputeNotFound(*id))??;

        tracing::info!(
            dispute_id = %id,
            %agent,
            items = dispute.evidence.len(),
            "dispute evidence submitted"
        );
        Ok(dispute)
    }

    /// EVIDENCE_PHASE → ARBITRATION; the deadline becomes the arbitration
    /// deadline.
    ///
    /// # Errors
    /// `DisputeNotFound`, or `WrongDisputePhase` unless in EVIDENCE_PHASE.
    pub fn escalate(&self, id: &DisputeId) -> Result<Dispute> {
        let now = self.clock.now();
        let window = self.config.arbitration_window();
        let dispute = transact(self.store.as_ref(), id, |d: &mut Dispute| {
            if d.status != DisputeStatus::EvidencePhase {
                return Err(wrong_phase(d, "escalate"));
            }
            d.status = DisputeStatus::Arbitration;
            d.deadline_at = now + window;
            Ok(d.clone())
        })
        .ok_or(WorpxError::DisputeNotFound(*id))??;

        tracing::info!(dispute_id = %id, deadline = %dispute.deadline_at, "dispute escalated to arbitration");
        Ok(dispute)
    }

    /// Record an arbitrator's decision. Only disputes in ARBITRATION can be
    /// resolved this way.
    ///
    /// # Errors
    /// `DisputeNotFound`, `WrongDisputePhase`, or `InvalidAmount` for a
    /// negative refund or penalty.
    pub fn resolve(&self, id: &DisputeId, resolution: Resolution) -> Result<Dispute> {
        for (field, value) in [
            ("refund", resolution.refund_amount),
            ("penalty", resolution.penalty_amount),
        ] {
            if value < Decimal::ZERO {
                return Err(WorpxError::InvalidAmount {
                    reason: format!("{field} amount must not be negative, got {value}"),
                });
            }
        }
        let now = self.clock.now();
        let dispute = transact(self.store.as_ref(), id, |d: &mut Dispute| {
            if d.status != DisputeStatus::Arbitration {
                return Err(wrong_phase(d, "resolve"));
            }
            finish(d, resolution, now);
            Ok(d.clone())
        })
        .ok_or(WorpxError::DisputeNotFound(*id))??;

        log_resolution(&dispute, "dispute resolved by arbitration");
        Ok(dispute)
    }

    /// Resolve on evidence counts alone: if exactly one party submitted
    /// evidence that party wins, otherwise the outcome is a split.
    ///
    /// # Errors
    /// `DisputeNotFound`, or `WrongDisputePhase` if already terminal.
    pub fn auto_resolve(&self, id: &DisputeId) -> Result<Dispute> {
        let now = self.clock.now();
        let dispute = transact(self.store.as_ref(), id, |d: &mut Dispute| {
            if d.status.is_terminal() {
                return Err(wrong_phase(d, "auto-resolve"));
            }
            let from_initiator = d.evidence_count(&d.initiator);
            let from_respondent = d.evidence_count(&d.respondent);
            let outcome = match (from_initiator > 0, from_respondent > 0) {
                (true, false) => Outcome::InitiatorWins,
                (false, true) => Outcome::RespondentWins,
                _ => Outcome::Split,
            };
            let notes = format!(
                "auto-resolved on evidence: initiator {from_initiator}, respondent {from_respondent}"
            );
            finish(d, Resolution::without_amounts(outcome, notes), now);
            Ok(d.clone())
        })
        .ok_or(WorpxError::DisputeNotFound(*id))??;

        log_resolution(&dispute, "dispute auto-resolved");
        Ok(dispute)
    }

    /// Expire every non-terminal dispute whose current deadline has passed.
    pub fn expire_stale(&self) -> Vec<DisputeId> {
        let now = self.clock.now();
        let expired: Vec<DisputeId> = self
            .store
            .keys()
            .into_iter()
            .filter(|id| {
                let outcome = transact(self.store.as_ref(), id, |d: &mut Dispute| {
                    if d.status.is_terminal() || !d.deadline_passed(now) {
                        return Ok(false);
                    }
                    d.status = DisputeStatus::Expired;
                    d.resolved_at = Some(now);
                    Ok(true)
                });
                matches!(outcome, Some(Ok(true)))
            })
            .collect();
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "disputes expired");
        }
        expired
    }

    #[must_use]
    pub fn get(&self, id: &DisputeId) -> Option<Dispute> {
        self.store.get(id)
    }

    /// Disputes in which `agent` is initiator or respondent, oldest first.
    #[must_use]
    pub fn disputes_by_agent(&self, agent: &AgentId) -> Vec<Dispute> {
        let mut out: Vec<Dispute> = self
            .store
            .keys()
            .into_iter()
            .filter_map(|id| self.store.get(&id))
            .filter(|d| d.is_party(agent))
            .collect();
        out.sort_by_key(|d| (d.filed_at, d.id));
        out
    }

    /// Disputes on one channel, oldest first.
    #[must_use]
    pub fn disputes_for_channel(&self, channel_id: &ChannelId) -> Vec<Dispute> {
        let mut out: Vec<Dispute> = self
            .store
            .keys()
            .into_iter()
            .filter_map(|id| self.store.get(&id))
            .filter(|d| &d.channel_id == channel_id)
            .collect();
        out.sort_by_key(|d| (d.filed_at, d.id));
        out
    }

    /// Number of disputes not yet resolved or expired.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.store
            .keys()
            .into_iter()
            .filter_map(|id| self.store.get(&id))
            .filter(|d| !d.status.is_terminal())
            .count()
    }
}

fn wrong_phase(d: &Dispute, operation: &'static str) -> WorpxError {
    WorpxError::WrongDisputePhase {
        dispute_id: d.id,
        status: d.status,
        operation,
    }
}

fn finish(d: &mut Dispute, resolution: Resolution, now: DateTime<Utc>) {
    d.status = DisputeStatus::Resolved;
    d.resolution = Some(resolution);
    d.resolved_at = Some(now);
}

fn log_resolution(dispute: &Dispute, message: &'static str) {
    let (outcome, refund) = dispute
        .resolution
        .as_ref()
        .map_or((Outcome::Void, Decimal::ZERO), |r| (r.outcome, r.refund_amount));
    tracing::info!(
        dispute_id = %dispute.id,
        channel_id = %dispute.channel_id,
        %outcome,
        %refund,
        "{message}"
    );
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use worpx_types::ManualClock;

    use super::*;

    fn setup() -> (DisputeResolver, Arc<ManualClock>, Dispute) {
        let clock = ManualClock::at_epoch();
        let resolver = DisputeResolver::in_memory(DisputeConfig::default(), clock.clone());
        let dispute = resolver
            .file(
                ChannelId::new(),
                AgentId::from("alice"),
                AgentId::from("bob"),
                DisputeReason::NonDelivery,
            )
            .unwrap();
        (resolver, clock, dispute)
    }

    #[test]
    fn filing_sets_evidence_deadline() {
        let (_resolver, _clock, d) = setup();
        assert_eq!(d.status, DisputeStatus::Filed);
        assert_eq!(d.deadline_at - d.filed_at, Duration::hours(24));
    }

    #[test]
    fn cannot_dispute_self() {
        let (resolver, _clock, _d) = setup();
        let err = resolver
            .file(
                ChannelId::new(),
                AgentId::from("alice"),
                AgentId::from("alice"),
                DisputeReason::Timeout,
            )
            .unwrap_err();
        assert!(matches!(err, WorpxError::UnauthorizedParty { .. }));
    }

    #[test]
    fn evidence_moves_to_evidence_phase() {
        let (resolver, _clock, d) = setup();
        let d = resolver
            .submit_evidence(&d.id, &AgentId::from("alice"), "no output", "0xaa")
            .unwrap();
        assert_eq!(d.status, DisputeStatus::EvidencePhase);
        assert_eq!(d.evidence.len(), 1);
    }

    #[test]
    fn outsider_evidence_rejected() {
        let (resolver, _clock, d) = setup();
        let err = resolver
            .submit_evidence(&d.id, &AgentId::from("mallory"), "noise", "0xff")
            .unwrap_err();
        assert!(matches!(err, WorpxError::UnauthorizedParty { .. }));
        assert!(resolver.get(&d.id).unwrap().evidence.is_empty());
    }

    #[test]
    fn evidence_after_deadline_rejected() {
        let (resolver, clock, d) = setup();
        clock.advance(Duration::hours(24) + Duration::seconds(1));
        let err = resolver
            .submit_evidence(&d.id, &AgentId::from("bob"), "late", "0x01")
            .unwrap_err();
        assert!(matches!(err, WorpxError::DisputeDeadlinePassed(_)));
    }

    #[test]
    fn evidence_rejected_in_arbitration() {
        let (resolver, _clock, d) = setup();
        resolver
            .submit_evidence(&d.id, &AgentId::from("alice"), "log", "0x01")
            .unwrap();
        let escalated = resolver.escalate(&d.id).unwrap();
        assert_eq!(escalated.status, DisputeStatus::Arbitration);
        assert!(escalated.deadline_at > d.deadline_at);

        let err = resolver
            .submit_evidence(&d.id, &AgentId::from("bob"), "reply", "0x02")
            .unwrap_err();
        assert!(matches!(err, WorpxError::WrongDisputePhase { .. }));
    }

    #[test]
    fn escalate_requires_evidence_phase() {
        let (resolver, _clock, d) = setup();
        let err = resolver.escalate(&d.id).unwrap_err();
        assert!(matches!(err, WorpxError::WrongDisputePhase { .. }));
    }

    #[test]
    fn resolve_only_from_arbitration() {
        let (resolver, _clock, d) = setup();
        let decision = Resolution {
            outcome: Outcome::InitiatorWins,
            refund_amount: Decimal::new(500, 2),
            penalty_amount: Decimal::new(50, 2),
            arbitrator_notes: "work not delivered".into(),
        };
        assert!(resolver.resolve(&d.id, decision.clone()).is_err());

        resolver
            .submit_evidence(&d.id, &AgentId::from("alice"), "log", "0x01")
            .unwrap();
        resolver.escalate(&d.id).unwrap();
        let resolved = resolver.resolve(&d.id, decision.clone()).unwrap();
        assert_eq!(resolved.status, DisputeStatus::Resolved);
        assert_eq!(resolved.resolution, Some(decision.clone()));

        let err = resolver.resolve(&d.id, decision).unwrap_err();
        assert!(matches!(err, WorpxError::WrongDisputePhase { .. }));
    }

    #[test]
    fn negative_refund_rejected() {
        let (resolver, _clock, d) = setup();
        let mut decision = Resolution::without_amounts(Outcome::Split, "");
        decision.refund_amount = Decimal::new(-1, 0);
        assert!(matches!(
            resolver.resolve(&d.id, decision).unwrap_err(),
            WorpxError::InvalidAmount { .. }
        ));
    }

    #[test]
    fn auto_resolve_without_evidence_splits() {
        let (resolver, clock, d) = setup();
        clock.advance(Duration::hours(24) + Duration::minutes(1));
        let d = resolver.auto_resolve(&d.id).unwrap();
        assert_eq!(d.status, DisputeStatus::Resolved);
        assert_eq!(d.resolution.unwrap().outcome, Outcome::Split);
    }

    #[test]
    fn auto_resolve_with_both_sides_splits() {
        let (resolver, clock, d) = setup();
        resolver
            .submit_evidence(&d.id, &AgentId::from("alice"), "a", "0x01")
            .unwrap();
        resolver
            .submit_evidence(&d.id, &AgentId::from("bob"), "b", "0x02")
            .unwrap();
        clock.advance(Duration::hours(25));
        let d = resolver.auto_resolve(&d.id).unwrap();
        assert_eq!(d.resolution.unwrap().outcome, Outcome::Split);
    }

    #[test]
    fn auto_resolve_favours_sole_submitter() {
        let (resolver, _clock, d) = setup();
        resolver
            .submit_evidence(&d.id, &AgentId::from("bob"), "delivered", "0x03")
            .unwrap();
        let d = resolver.auto_resolve(&d.id).unwrap();
        assert_eq!(d.resolution.unwrap().outcome, Outcome::RespondentWins);
        assert!(resolver.auto_resolve(&d.id).is_err());
    }

    #[test]
    fn sweep_expires_lapsed_disputes_once() {
        let (resolver, clock, d) = setup();
        let other = resolver
            .file(
                ChannelId::new(),
                AgentId::from("carol"),
                AgentId::from("alice"),
                DisputeReason::PaymentMismatch,
            )
            .unwrap();
        resolver.auto_resolve(&other.id).unwrap();

        assert!(resolver.expire_stale().is_empty());
        clock.advance(Duration::hours(24) + Duration::seconds(1));
        assert_eq!(resolver.expire_stale(), vec![d.id]);
        assert!(resolver.expire_stale().is_empty());
        assert_eq!(resolver.get(&d.id).unwrap().status, DisputeStatus::Expired);
        assert_eq!(resolver.active_count(), 0);
    }

    #[test]
    fn queries_by_agent_and_channel() {
        let (resolver, _clock, d) = setup();
        resolver
            .file(
                d.channel_id,
                AgentId::from("bob"),
                AgentId::from("carol"),
                DisputeReason::IncorrectResult,
            )
            .unwrap();
        assert_eq!(resolver.disputes_by_agent(&AgentId::from("alice")).len(), 1);
        assert_eq!(resolver.disputes_by_agent(&AgentId::from("bob")).len(), 2);
        assert_eq!(resolver.disputes_for_channel(&d.channel_id).len(), 2);
        assert_eq!(resolver.active_count(), 2);
    }
}
