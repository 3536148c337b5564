//! Corporate-action (dividend / bonus / rights) events.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::error::LedgerError;

/// One ex-date worth of corporate actions for a symbol. All per-share
/// amounts are relative to one pre-event share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DividendEvent {
    pub symbol: String,
    pub ex_date: NaiveDate,
    pub cash_dividend_per_share: Decimal,
    pub bonus_share_ratio: Decimal,
    pub rights_issue_ratio: Decimal,
    pub rights_issue_price: Decimal,
}

impl DividendEvent {
    /// Cash-dividend-only event.
    pub fn cash(symbol: &str, ex_date: NaiveDate, per_share: Decimal) -> Self {
        DividendEvent {
            symbol: symbol.to_string(),
            ex_date,
            cash_dividend_per_share: per_share,
            bonus_share_ratio: Decimal::ZERO,
            rights_issue_ratio: Decimal::ZERO,
            rights_issue_price: Decimal::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.symbol.trim().is_empty() {
            return Err(LedgerError::validation("symbol", "must not be empty"));
        }
        for (field, value) in [
            ("cash_dividend_per_share", self.cash_dividend_per_share),
            ("bonus_share_ratio", self.bonus_share_ratio),
            ("rights_issue_ratio", self.rights_issue_ratio),
            ("rights_issue_price", self.rights_issue_price),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(LedgerError::validation(
                    field,
                    format!(
                        "{} on {} must be non-negative, got {}",
                        self.symbol, self.ex_date, value
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Theoretical ex-rights price:
    /// (prior_close - dividend + rights_ratio * rights_price) / (1 + bonus_ratio + rights_ratio)
    pub fn ex_rights_price(&self, prior_close: Decimal) -> Decimal {
        let numerator = prior_close - self.cash_dividend_per_share
            + self.rights_issue_ratio * self.rights_issue_price;
        let denominator = Decimal::ONE + self.bonus_share_ratio + self.rights_issue_ratio;
        numerator / denominator
    }

    /// ex_rights_price / prior_close. `None` when the prior close is not
    /// positive or the event would wipe out the whole price.
    pub fn price_ratio(&self, prior_close: Decimal) -> Option<Decimal> {
        if prior_close <= Decimal::ZERO {
            return None;
        }
        let adjusted = self.ex_rights_price(prior_close);
        if adjusted <= Decimal::ZERO {
            return None;
        }
        Some(adjusted / prior_close)
    }

    /// True when the event changes the share count of a holder.
    pub fn changes_share_count(&self) -> bool {
        !self.bonus_share_ratio.is_zero() || !self.rights_issue_ratio.is_zero()
    }
}
