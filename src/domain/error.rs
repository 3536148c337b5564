//! Domain error types.

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Top-level error type for ledgercore.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("conflicting corporate action for {symbol} on {ex_date}")]
    ConflictingEvent { symbol: String, ex_date: NaiveDate },

    #[error("insufficient funds in {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient position in {symbol}: requested {requested}, held {held}")]
    InsufficientPosition {
        symbol: String,
        requested: i64,
        held: i64,
    },

    #[error("ledger invariant violated in {account_id}: {reason}")]
    InternalInvariant { account_id: String, reason: String },

    #[error("account {account_id} is halted pending manual reset")]
    AccountHalted { account_id: String },

    #[error("unknown account: {account_id}")]
    UnknownAccount { account_id: String },

    #[error("account already registered: {account_id}")]
    DuplicateAccount { account_id: String },

    #[error("lock poisoned for account {account_id}")]
    LockPoisoned { account_id: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("database error: {reason}")]
    Database { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        LedgerError::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Business-rule rejections leave the ledger untouched and are safe to retry
    /// with different inputs.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientFunds { .. } | LedgerError::InsufficientPosition { .. }
        )
    }
}

impl From<&LedgerError> for std::process::ExitCode {
    fn from(err: &LedgerError) -> Self {
        let code: u8 = match err {
            LedgerError::Io(_) => 1,
            LedgerError::ConfigParse { .. }
            | LedgerError::ConfigMissing { .. }
            | LedgerError::ConfigInvalid { .. } => 2,
            LedgerError::Data { .. } | LedgerError::Database { .. } => 3,
            LedgerError::Validation { .. }
            | LedgerError::ConflictingEvent { .. }
            | LedgerError::UnknownAccount { .. }
            | LedgerError::DuplicateAccount { .. } => 4,
            LedgerError::InsufficientFunds { .. } | LedgerError::InsufficientPosition { .. } => 5,
            LedgerError::InternalInvariant { .. }
            | LedgerError::AccountHalted { .. }
            | LedgerError::LockPoisoned { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}
