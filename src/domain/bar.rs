//! Price bar representation.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use super::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interval {
    Minute,
    Hour,
    Daily,
    Weekly,
}

impl Interval {
    pub fn parse(s: &str) -> Option<Interval> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "minute" => Some(Interval::Minute),
            "1h" | "hour" => Some(Interval::Hour),
            "d" | "1d" | "daily" => Some(Interval::Daily),
            "w" | "1w" | "weekly" => Some(Interval::Weekly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute => "1m",
            Interval::Hour => "1h",
            Interval::Daily => "d",
            Interval::Weekly => "w",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub symbol: String,
    pub exchange: String,
    pub interval: Interval,
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub turnover: Decimal,
}

impl Bar {
    /// Trading date the bar belongs to.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Prices must be strictly positive; volume and turnover non-negative.
    pub fn validate(&self) -> Result<(), LedgerError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if value <= Decimal::ZERO {
                return Err(LedgerError::validation(
                    field,
                    format!("{} bar at {} has non-positive price", self.symbol, self.timestamp),
                ));
            }
        }
        if self.volume.is_sign_negative() || self.turnover.is_sign_negative() {
            return Err(LedgerError::validation(
                "volume",
                format!(
                    "{} bar at {} has negative volume or turnover",
                    self.symbol, self.timestamp
                ),
            ));
        }
        Ok(())
    }

    /// Copy of the bar with prices scaled by `factor` and volume scaled by
    /// its inverse, leaving turnover untouched.
    pub fn scaled(&self, factor: Decimal) -> Bar {
        Bar {
            open: self.open * factor,
            high: self.high * factor,
            low: self.low * factor,
            close: self.close * factor,
            volume: self.volume / factor,
            ..self.clone()
        }
    }
}
