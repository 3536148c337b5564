//! Executed trades as delivered by a broker or simulator.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use super::error::LedgerError;
use super::money;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Direction> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "long" => Some(Direction::Buy),
            "sell" | "short" => Some(Direction::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

/// Whether a trade opens or closes a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    Open,
    Close,
}

impl Offset {
    pub fn parse(s: &str) -> Option<Offset> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(Offset::Open),
            "close" => Some(Offset::Close),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Offset::Open => "open",
            Offset::Close => "close",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub exchange: String,
    pub timestamp: NaiveDateTime,
    pub direction: Direction,
    pub offset: Offset,
    pub price: Decimal,
    pub volume: i64,
}

impl Trade {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.symbol.trim().is_empty() {
            return Err(LedgerError::validation("symbol", "must not be empty"));
        }
        if self.price <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "price",
                format!("must be positive, got {}", self.price),
            ));
        }
        if self.volume <= 0 {
            return Err(LedgerError::validation(
                "volume",
                format!("must be positive, got {}", self.volume),
            ));
        }
        Ok(())
    }

    pub fn notional(&self) -> Result<Decimal, LedgerError> {
        money::notional(self.price, self.volume)
    }
}
