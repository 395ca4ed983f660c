//! Net settlement and the conservation invariant.
//!
//! ```text
//! ∀ token: Σ_agent net(agent, token) == 0
//! ```
//!
//! Each entry debits its sender and credits its receiver by the same
//! amount, so a well-formed batch always nets to exactly zero per token.
//! A nonzero residual means the batch is malformed; it must never be
//! submitted and is never auto-corrected.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use worpx_types::{AgentId, ChannelId, Result, SettlementEntry, Token, WorpxError};

/// Signed per-`(agent, token)` balance change. Debits are negative,
/// credits positive.
pub type NetSettlement = BTreeMap<(AgentId, Token), Decimal>;

/// Reduce entries to per-agent signed balances.
///
/// # Errors
/// `ArithmeticOverflow` if a running balance overflows.
pub fn compute_net_settlement<'a, I>(entries: I) -> Result<NetSettlement>
where
    I: IntoIterator<Item = &'a SettlementEntry>,
{
    let mut net = NetSettlement::new();
    for entry in entries {
        let debit = net
            .entry((entry.from.clone(), entry.token.clone()))
            .or_insert(Decimal::ZERO);
        *debit = debit
            .checked_sub(entry.amount)
            .ok_or(WorpxError::ArithmeticOverflow)?;

        let credit = net
            .entry((entry.to.clone(), entry.token.clone()))
            .or_insert(Decimal::ZERO);
        *credit = credit
            .checked_add(entry.amount)
            .ok_or(WorpxError::ArithmeticOverflow)?;
    }
    Ok(net)
}

/// Verify that balances sum to exactly zero for every token.
///
/// # Errors
/// `ConservationViolation` carrying the first nonzero per-token residual.
pub fn verify_conservation(net: &NetSettlement) -> Result<()> {
    let mut residuals: BTreeMap<&str, Decimal> = BTreeMap::new();
    for ((_, token), delta) in net {
        *residuals.entry(token.as_str()).or_insert(Decimal::ZERO) += *delta;
    }
    if let Some((token, residual)) = residuals.into_iter().find(|(_, r)| !r.is_zero()) {
        tracing::error!(%token, %residual, "conservation violation: net settlement is nonzero");
        return Err(WorpxError::ConservationViolation { residual });
    }
    Ok(())
}

/// Total amount per channel, the expected side of a reconciliation.
#[must_use]
pub fn expected_by_channel<'a, I>(entries: I) -> BTreeMap<ChannelId, Decimal>
where
    I: IntoIterator<Item = &'a SettlementEntry>,
{
    let mut out = BTreeMap::new();
    for entry in entries {
        *out.entry(entry.channel_id).or_insert(Decimal::ZERO) += entry.amount;
    }
    out
}

#[cfg(test)]
mod tests {
    use worpx_types::Chain;

    use super::*;

    fn entry(from: &str, to: &str, amount: Decimal) -> SettlementEntry {
        SettlementEntry {
            channel_id: ChannelId::from_bytes([3; 16]),
            from: AgentId::from(from),
            to: AgentId::from(to),
            chain: Chain::Base,
            token: "USDC".into(),
            amount,
            nonce: 0,
            signature: String::new(),
        }
    }

    fn key(agent: &str) -> (AgentId, Token) {
        (AgentId::from(agent), "USDC".to_string())
    }

    #[test]
    fn debits_negative_credits_positive() {
        let entries = vec![
            entry("alice", "bob", Decimal::new(500, 2)),
            entry("bob", "carol", Decimal::new(200, 2)),
            entry("alice", "carol", Decimal::new(100, 2)),
        ];
        let net = compute_net_settlement(&entries).unwrap();
        assert_eq!(net[&key("alice")], Decimal::new(-600, 2));
        assert_eq!(net[&key("bob")], Decimal::new(300, 2));
        assert_eq!(net[&key("carol")], Decimal::new(300, 2));
        assert!(verify_conservation(&net).is_ok());
    }

    #[test]
    fn nonzero_residual_is_a_violation() {
        let mut net = NetSettlement::new();
        net.insert(key("alice"), Decimal::new(-500, 2));
        net.insert(key("bob"), Decimal::new(499, 2));
        let err = verify_conservation(&net).unwrap_err();
        match err {
            WorpxError::ConservationViolation { residual } => {
                assert_eq!(residual, Decimal::new(-1, 2));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn tokens_are_conserved_independently() {
        let mut net = NetSettlement::new();
        net.insert(key("alice"), Decimal::new(-5, 0));
        net.insert((AgentId::from("bob"), "EURC".into()), Decimal::new(5, 0));
        assert!(verify_conservation(&net).is_err());
    }

    #[test]
    fn sub_cent_amounts_stay_exact() {
        let entries: Vec<_> = (0..1000)
            .map(|_| entry("alice", "bob", Decimal::new(1, 6)))
            .collect();
        let net = compute_net_settlement(&entries).unwrap();
        assert_eq!(net[&key("bob")], Decimal::new(1, 3));
        assert!(verify_conservation(&net).is_ok());
    }

    #[test]
    fn expected_totals_per_channel() {
        let mut other = entry("bob", "alice", Decimal::ONE);
        other.channel_id = ChannelId::from_bytes([9; 16]);
        let entries = vec![
            entry("alice", "bob", Decimal::new(500, 2)),
            entry("alice", "bob", Decimal::new(350, 2)),
            other,
        ];
        let totals = expected_by_channel(&entries);
        assert_eq!(totals[&ChannelId::from_bytes([3; 16])], Decimal::new(850, 2));
        assert_eq!(totals[&ChannelId::from_bytes([9; 16])], Decimal::ONE);
    }
}
