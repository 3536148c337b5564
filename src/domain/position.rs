//! Per-symbol position tracking with weighted-average cost basis.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use super::cost::CostBreakdown;
use super::error::LedgerError;
use super::money;
use super::trade::{Direction, Trade};

/// Long-only position in one symbol.
///
/// `book_cost` is the total acquisition cost (notional plus buy-side costs)
/// still attached to the open volume; `average_cost_basis` is always
/// `book_cost / volume`, or zero when flat.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub exchange: String,
    pub volume: i64,
    pub average_cost_basis: Decimal,
    pub book_cost: Decimal,
    pub realized_pnl: Decimal,
    pub last_price: Decimal,
    pub last_update: Option<NaiveDateTime>,
}

/// Effect of one trade on a position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionChange {
    pub volume_before: i64,
    pub volume_after: i64,
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn new(symbol: &str, exchange: &str) -> Self {
        Position {
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            volume: 0,
            average_cost_basis: Decimal::ZERO,
            book_cost: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            last_price: Decimal::ZERO,
            last_update: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.volume == 0
    }

    pub fn market_value(&self, price: Decimal) -> Result<Decimal, LedgerError> {
        money::notional(price, self.volume)
    }

    /// (mark - average_cost_basis) * volume.
    pub fn unrealized_pnl(&self, mark_price: Decimal) -> Result<Decimal, LedgerError> {
        money::checked_sub(self.market_value(mark_price)?, self.book_cost, "unrealized_pnl")
    }

    /// Unrealized PnL relative to book cost, zero when flat.
    pub fn profit_ratio(&self, mark_price: Decimal) -> Result<Decimal, LedgerError> {
        if self.book_cost.is_zero() {
            Ok(Decimal::ZERO)
        } else {
            Ok(self.unrealized_pnl(mark_price)? / self.book_cost)
        }
    }

    /// Apply a trade and its costs. Buys raise volume and recompute the
    /// cost basis; sells realize PnL against the current basis. On error
    /// the position is left exactly as it was.
    pub fn apply_trade(
        &mut self,
        trade: &Trade,
        cost: &CostBreakdown,
    ) -> Result<PositionChange, LedgerError> {
        trade.validate()?;
        if trade.symbol != self.symbol {
            return Err(LedgerError::validation(
                "symbol",
                format!("trade for {} applied to {} position", trade.symbol, self.symbol),
            ));
        }

        let volume_before = self.volume;
        let notional = trade.notional()?;
        let realized = match trade.direction {
            Direction::Buy => {
                let acquired = money::checked_add(notional, cost.total, "book_cost")?;
                let book_cost = money::checked_add(self.book_cost, acquired, "book_cost")?;
                let volume = checked_volume(self.volume, trade.volume)?;
                self.book_cost = book_cost;
                self.volume = volume;
                self.average_cost_basis = book_cost / Decimal::from(volume);
                Decimal::ZERO
            }
            Direction::Sell => {
                if trade.volume > self.volume {
                    return Err(LedgerError::InsufficientPosition {
                        symbol: self.symbol.clone(),
                        requested: trade.volume,
                        held: self.volume,
                    });
                }
                let released = if trade.volume == self.volume {
                    self.book_cost
                } else {
                    let sold = Decimal::from(trade.volume);
                    money::checked_mul(self.book_cost, sold, "book_cost")?
                        / Decimal::from(self.volume)
                };
                let realized = money::checked_sub(notional - released, cost.total, "realized_pnl")?;
                let realized_total =
                    money::checked_add(self.realized_pnl, realized, "realized_pnl")?;
                self.book_cost -= released;
                self.volume -= trade.volume;
                self.realized_pnl = realized_total;
                if self.volume == 0 {
                    self.book_cost = Decimal::ZERO;
                    self.average_cost_basis = Decimal::ZERO;
                }
                realized
            }
        };

        self.last_price = trade.price;
        self.last_update = Some(trade.timestamp);

        Ok(PositionChange {
            volume_before,
            volume_after: self.volume,
            realized_pnl: realized,
        })
    }

    /// Add bonus shares without changing book cost; the average basis falls
    /// accordingly.
    pub fn add_bonus_shares(&mut self, shares: i64) -> Result<(), LedgerError> {
        if shares <= 0 || self.volume == 0 {
            return Ok(());
        }
        self.volume = checked_volume(self.volume, shares)?;
        self.average_cost_basis = self.book_cost / Decimal::from(self.volume);
        Ok(())
    }

    pub fn update_price(&mut self, price: Decimal, at: NaiveDateTime) {
        self.last_price = price;
        self.last_update = Some(at);
    }
}

fn checked_volume(held: i64, added: i64) -> Result<i64, LedgerError> {
    held.checked_add(added).ok_or_else(|| {
        LedgerError::validation("volume", format!("{held} + {added} shares overflows"))
    })
}
