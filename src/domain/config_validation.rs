//! Configuration validation.
//!
//! Validates every config section up front so later builders can assume
//! well-formed values.

use crate::domain::adjustment::AdjustmentMode;
use crate::domain::cost::StampDutyBasis;
use crate::domain::error::LedgerError;
use crate::ports::config_port::ConfigPort;
use rust_decimal::Decimal;

pub fn validate_config(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    validate_costs(config)?;
    validate_transfer_fees(config)?;
    validate_account(config)?;
    validate_concentration(config)?;
    validate_adjustment(config)?;
    sqlite_pool_size(config)?;
    Ok(())
}

pub const DEFAULT_SQLITE_POOL_SIZE: u32 = 4;
pub const MAX_SQLITE_POOL_SIZE: u32 = 64;

/// `[sqlite] pool_size`, defaulting when absent. Present values must be an
/// integer from 1 to [`MAX_SQLITE_POOL_SIZE`].
pub fn sqlite_pool_size(config: &dyn ConfigPort) -> Result<u32, LedgerError> {
    let Some(raw) = config.get_string("sqlite", "pool_size") else {
        return Ok(DEFAULT_SQLITE_POOL_SIZE);
    };
    match raw.trim().parse::<u32>() {
        Ok(size) if (1..=MAX_SQLITE_POOL_SIZE).contains(&size) => Ok(size),
        _ => Err(invalid(
            "sqlite",
            "pool_size",
            format!("expected an integer from 1 to {MAX_SQLITE_POOL_SIZE}, got {raw:?}"),
        )),
    }
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> LedgerError {
    LedgerError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn non_negative(config: &dyn ConfigPort, section: &str, key: &str) -> Result<(), LedgerError> {
    let value = config.get_decimal(section, key, Decimal::ZERO)?;
    if value < Decimal::ZERO {
        return Err(invalid(section, key, format!("{key} must be non-negative")));
    }
    Ok(())
}

fn validate_costs(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    for key in ["commission_rate", "min_commission", "stamp_duty_rate"] {
        non_negative(config, "costs", key)?;
    }
    if let Some(basis) = config.get_string("costs", "stamp_duty_basis") {
        if StampDutyBasis::parse(&basis).is_none() {
            return Err(invalid(
                "costs",
                "stamp_duty_basis",
                format!("unknown basis {basis:?}, expected direction or offset"),
            ));
        }
    }
    Ok(())
}

fn validate_transfer_fees(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    for section in ["transfer_fee", "transfer_fee_min"] {
        for exchange in config.section_keys(section) {
            non_negative(config, section, &exchange)?;
        }
    }
    Ok(())
}

fn validate_account(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    if let Some(id) = config.get_string("account", "id") {
        if id.trim().is_empty() {
            return Err(invalid("account", "id", "id must not be empty"));
        }
    }
    let cash = config.get_decimal("account", "initial_cash", Decimal::ONE)?;
    if cash <= Decimal::ZERO {
        return Err(invalid(
            "account",
            "initial_cash",
            "initial_cash must be positive",
        ));
    }
    Ok(())
}

fn validate_concentration(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    for key in ["max_symbol_weight", "max_sector_weight", "warning_level"] {
        let value = config.get_decimal("concentration", key, Decimal::ONE)?;
        if value <= Decimal::ZERO || value > Decimal::ONE {
            return Err(invalid(
                "concentration",
                key,
                format!("{key} must be between 0 (exclusive) and 1"),
            ));
        }
    }
    Ok(())
}

fn validate_adjustment(config: &dyn ConfigPort) -> Result<(), LedgerError> {
    if let Some(mode) = config.get_string("adjustment", "mode") {
        if AdjustmentMode::parse(&mode).is_none() {
            return Err(invalid(
                "adjustment",
                "mode",
                format!("unknown mode {mode:?}, expected none, forward or backward"),
            ));
        }
    }
    Ok(())
}
