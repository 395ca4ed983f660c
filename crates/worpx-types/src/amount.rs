//! Fixed-point amount helpers.
//!
//! All money is `rust_decimal::Decimal`: exact base-10 arithmetic, so the
//! conservation check (Σ net = 0) never hides binary floating-point error.

use rust_decimal::Decimal;

use crate::{Result, WorpxError, constants};

/// Validate an amount entering the ledger: strictly positive, with at most
/// [`constants::MAX_AMOUNT_SCALE`] fractional digits.
pub fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(WorpxError::InvalidAmount {
            reason: format!("amount must be positive, got {amount}"),
        });
    }
    if amount.scale() > constants::MAX_AMOUNT_SCALE {
        return Err(WorpxError::InvalidAmount {
            reason: format!(
                "amount {amount} has {} fractional digits, max {}",
                amount.scale(),
                constants::MAX_AMOUNT_SCALE
            ),
        });
    }
    Ok(amount)
}

/// Render an amount with at least [`constants::AMOUNT_SCALE`] decimals.
#[must_use]
pub fn to_fixed(amount: Decimal) -> Decimal {
    let mut out = amount;
    if out.scale() < constants::AMOUNT_SCALE {
        out.rescale(constants::AMOUNT_SCALE);
    }
    out
}

/// Checked sum; `ArithmeticOverflow` instead of a panic.
pub fn checked_sum<I: IntoIterator<Item = Decimal>>(amounts: I) -> Result<Decimal> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, a| acc.checked_add(a))
        .ok_or(WorpxError::ArithmeticOverflow)
}

/// The reconciliation epsilon, `0.000001`.
#[must_use]
pub fn reconcile_epsilon() -> Decimal {
    Decimal::new(constants::RECONCILE_EPSILON_UNITS, constants::AMOUNT_SCALE)
}
