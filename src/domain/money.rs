//! Money rounding rules.
//!
//! Every cash amount the ledger books (commission, stamp duty, transfer fee,
//! dividend credits, deposits) is rounded to [`MONEY_SCALE`] decimal places
//! with round-half-up. Trade notionals (`price * volume`) are exact products
//! and are never rounded, so cash plus marked position value balances to the
//! last digit.

use rust_decimal::{Decimal, RoundingStrategy};

use super::error::LedgerError;

/// Smallest currency unit: 0.01.
pub const MONEY_SCALE: u32 = 2;

/// Round half-up (away from zero) to the smallest currency unit.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Exact notional value of `volume` units at `price`.
pub fn notional(price: Decimal, volume: i64) -> Result<Decimal, LedgerError> {
    checked_mul(price, Decimal::from(volume), "notional")
}

/// `a * b`, or a validation error on `field` when the product does not fit
/// in a `Decimal`.
pub fn checked_mul(a: Decimal, b: Decimal, field: &str) -> Result<Decimal, LedgerError> {
    a.checked_mul(b)
        .ok_or_else(|| LedgerError::validation(field, format!("{a} * {b} overflows")))
}

pub fn checked_add(a: Decimal, b: Decimal, field: &str) -> Result<Decimal, LedgerError> {
    a.checked_add(b)
        .ok_or_else(|| LedgerError::validation(field, format!("{a} + {b} overflows")))
}

pub fn checked_sub(a: Decimal, b: Decimal, field: &str) -> Result<Decimal, LedgerError> {
    a.checked_sub(b)
        .ok_or_else(|| LedgerError::validation(field, format!("{a} - {b} overflows")))
}
