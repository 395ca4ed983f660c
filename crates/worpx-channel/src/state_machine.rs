//! # Channel state machine
//!
//! ```text
//!   ┌──────────┐ deposit > 0 ┌────────┐      ┌────────┐
//!   │ PROPOSED ├────────────▶│ FUNDED ├─────▶│ ACTIVE │◀──────────────┐
//!   └──────────┘             └────────┘      └─┬────┬─┘               │
//!                                              │    │ open window     │ before deadline
//!                                              │    ▼                 │
//!                                              │  ┌───────────┐       │
//!                                              │  │ DISPUTING ├───────┘
//!                                              │  └─────┬─────┘
//!                                              │        │ at/after deadline
//!                                              ▼        ▼
//!                                            ┌──────────┐      ┌────────┐
//!                                            │ SETTLING ├─────▶│ CLOSED │
//!                                            └──────────┘      └────────┘
//! ```
//!
//! The rule table is data only. Guards are named predicates and effects are
//! named derivations; [`evaluate`] is a pure function from the current
//! channel to a [`StateDelta`] that the caller commits. Every accepted delta
//! bumps the channel version by exactly one; the payment nonce is left to
//! payment application.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use worpx_types::{Channel, ChannelPhase, Result, WorpxError};

/// Predicate that must hold for a rule to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// The channel holds a strictly positive deposit.
    PositiveDeposit,
    /// A dispute deadline is set and `now` is strictly before it.
    BeforeDisputeDeadline,
    /// A dispute deadline is set and `now` is at or after it.
    AtOrAfterDisputeDeadline,
}

impl Guard {
    #[must_use]
    pub fn holds(self, channel: &Channel, now: DateTime<Utc>) -> bool {
        match self {
            Self::PositiveDeposit => channel.deposit > Decimal::ZERO,
            Self::BeforeDisputeDeadline => channel.dispute_deadline.is_some_and(|d| now < d),
            Self::AtOrAfterDisputeDeadline => channel.dispute_deadline.is_some_and(|d| now >= d),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::PositiveDeposit => "deposit must be positive",
            Self::BeforeDisputeDeadline => "dispute deadline has passed",
            Self::AtOrAfterDisputeDeadline => "dispute deadline not yet reached",
        }
    }
}

/// Derived-state update attached to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Set the dispute deadline one dispute window from now.
    OpenDisputeWindow,
    /// Drop the dispute deadline.
    ClearDisputeWindow,
    /// Stamp the close time.
    MarkClosed,
}

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionRule {
    pub from: ChannelPhase,
    pub to: ChannelPhase,
    pub guard: Option<Guard>,
    pub effect: Option<Effect>,
}

const fn rule(
    from: ChannelPhase,
    to: ChannelPhase,
    guard: Option<Guard>,
    effect: Option<Effect>,
) -> TransitionRule {
    TransitionRule {
        from,
        to,
        guard,
        effect,
    }
}

/// The complete set of legal channel transitions.
pub const TRANSITIONS: &[TransitionRule] = &[
    rule(
        ChannelPhase::Proposed,
        ChannelPhase::Funded,
        Some(Guard::PositiveDeposit),
        None,
    ),
    rule(ChannelPhase::Funded, ChannelPhase::Active, None, None),
    rule(
        ChannelPhase::Active,
        ChannelPhase::Disputing,
        None,
        Some(Effect::OpenDisputeWindow),
    ),
    rule(ChannelPhase::Active, ChannelPhase::Settling, None, None),
    rule(
        ChannelPhase::Disputing,
        ChannelPhase::Active,
        Some(Guard::BeforeDisputeDeadline),
        Some(Effect::ClearDisputeWindow),
    ),
    rule(
        ChannelPhase::Disputing,
        ChannelPhase::Settling,
        Some(Guard::AtOrAfterDisputeDeadline),
        None,
    ),
    rule(
        ChannelPhase::Settling,
        ChannelPhase::Closed,
        None,
        Some(Effect::MarkClosed),
    ),
];

/// Update produced by an accepted transition; applied with [`StateDelta::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDelta {
    pub phase: ChannelPhase,
    pub version: u64,
    pub last_activity: DateTime<Utc>,
    /// `Some(x)` replaces the dispute deadline with `x`.
    pub dispute_deadline: Option<Option<DateTime<Utc>>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl StateDelta {
    pub fn apply(self, channel: &mut Channel) {
        channel.phase = self.phase;
        channel.version = self.version;
        channel.last_activity = self.last_activity;
        if let Some(deadline) = self.dispute_deadline {
            channel.dispute_deadline = deadline;
        }
        if let Some(closed_at) = self.closed_at {
            channel.closed_at = Some(closed_at);
        }
    }
}

impl Effect {
    fn derive(self, delta: &mut StateDelta, now: DateTime<Utc>, dispute_window: Duration) {
        match self {
            Self::OpenDisputeWindow => delta.dispute_deadline = Some(Some(now + dispute_window)),
            Self::ClearDisputeWindow => delta.dispute_deadline = Some(None),
            Self::MarkClosed => delta.closed_at = Some(now),
        }
    }
}

/// Look up the rule for `from → to`.
#[must_use]
pub fn find_rule(from: ChannelPhase, to: ChannelPhase) -> Option<&'static TransitionRule> {
    TRANSITIONS.iter().find(|r| r.from == from && r.to == to)
}

/// Decide whether `channel` may move to `target` at `now`.
///
/// # Errors
/// `InvalidTransition` if no rule exists or its guard does not hold.
pub fn evaluate(
    channel: &Channel,
    target: ChannelPhase,
    now: DateTime<Utc>,
    dispute_window: Duration,
) -> Result<StateDelta> {
    let reject = |reason: &str| WorpxError::InvalidTransition {
        from: channel.phase,
        to: target,
        reason: reason.to_string(),
    };

    let rule = find_rule(channel.phase, target).ok_or_else(|| reject("no such transition"))?;
    if let Some(guard) = rule.guard.filter(|g| !g.holds(channel, now)) {
        return Err(reject(guard.describe()));
    }

    let mut delta = StateDelta {
        phase: target,
        version: channel.version + 1,
        last_activity: now,
        dispute_deadline: None,
        closed_at: None,
    };
    if let Some(effect) = rule.effect {
        effect.derive(&mut delta, now, dispute_window);
    }
    Ok(delta)
}

/// Targets reachable from the channel's current phase whose guards hold.
#[must_use]
pub fn allowed(channel: &Channel, now: DateTime<Utc>) -> Vec<ChannelPhase> {
    TRANSITIONS
        .iter()
        .filter(|r| r.from == channel.phase)
        .filter(|r| r.guard.is_none_or(|g| g.holds(channel, now)))
        .map(|r| r.to)
        .collect()
}
