//! Cash and positions for one account, with an append-only equity curve.

use chrono::{NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, error, warn};

use super::corporate_action::DividendEvent;
use super::cost::{CostBreakdown, TradingCostCalculator};
use super::error::LedgerError;
use super::money::{self, round_money};
use super::position::Position;
use super::trade::{Direction, Trade};

#[derive(Debug, Clone, PartialEq)]
pub struct AccountConfig {
    pub id: String,
    pub initial_cash: Decimal,
}

/// One mark-to-market observation. Never modified once appended.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub cash: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub equity: Decimal,
}

/// An accepted trade together with what it cost and what it realized.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub trade: Trade,
    pub cost: CostBreakdown,
    pub realized_pnl: Decimal,
    pub cash_after: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CashFlowKind {
    Deposit,
    Withdrawal,
    Dividend,
}

/// Non-trade cash movement. `amount` is signed from the account's view.
#[derive(Debug, Clone, PartialEq)]
pub struct CashFlow {
    pub timestamp: NaiveDateTime,
    pub kind: CashFlowKind,
    pub amount: Decimal,
    pub symbol: Option<String>,
}

/// Read-only copy of an account's state.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub account_id: String,
    pub initial_cash: Decimal,
    pub cash: Decimal,
    pub market_value: Decimal,
    pub equity: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub positions: Vec<Position>,
    pub halted: bool,
}

/// Every mutation checks that cash plus the marked value of all positions,
/// total book cost and total realized PnL stay representable, so the
/// read-only totals below never overflow.
#[derive(Debug, Clone)]
pub struct AccountLedger {
    id: String,
    initial_cash: Decimal,
    cash: Decimal,
    positions: BTreeMap<String, Position>,
    calculator: TradingCostCalculator,
    equity_curve: Vec<EquityPoint>,
    trades: Vec<TradeRecord>,
    cash_flows: Vec<CashFlow>,
    halted: bool,
}

impl AccountLedger {
    pub fn new(
        config: AccountConfig,
        calculator: TradingCostCalculator,
    ) -> Result<Self, LedgerError> {
        if config.id.trim().is_empty() {
            return Err(LedgerError::validation("account_id", "must not be empty"));
        }
        if config.initial_cash <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "initial_cash",
                format!("must be positive, got {}", config.initial_cash),
            ));
        }
        Ok(AccountLedger {
            id: config.id,
            initial_cash: config.initial_cash,
            cash: config.initial_cash,
            positions: BTreeMap::new(),
            calculator,
            equity_curve: Vec::new(),
            trades: Vec::new(),
            cash_flows: Vec::new(),
            halted: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn initial_cash(&self) -> Decimal {
        self.initial_cash
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Every position ever opened, including zeroed ones.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Open (non-flat) positions only.
    pub fn position_count(&self) -> usize {
        self.positions.values().filter(|p| !p.is_flat()).count()
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    pub fn cash_flows(&self) -> &[CashFlow] {
        &self.cash_flows
    }

    pub fn calculator(&self) -> &TradingCostCalculator {
        &self.calculator
    }

    pub fn cost_breakdown(&self, trade: &Trade) -> Result<CostBreakdown, LedgerError> {
        self.calculator.cost_of(trade)
    }

    /// Σ volume × last known price.
    pub fn market_value(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.last_price * Decimal::from(p.volume))
            .sum()
    }

    pub fn equity(&self) -> Decimal {
        self.cash + self.market_value()
    }

    pub fn total_unrealized_pnl(&self) -> Decimal {
        let book_cost: Decimal = self.positions.values().map(|p| p.book_cost).sum();
        self.market_value() - book_cost
    }

    pub fn total_realized_pnl(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// Apply one fill. Either the whole trade is booked or nothing changes.
    pub fn apply_trade(&mut self, trade: &Trade) -> Result<TradeRecord, LedgerError> {
        if self.halted {
            return Err(LedgerError::AccountHalted {
                account_id: self.id.clone(),
            });
        }
        trade.validate()?;
        let cost = self.calculator.cost_of(trade)?;
        let notional = cost.notional;

        let mut position = self
            .positions
            .get(&trade.symbol)
            .cloned()
            .unwrap_or_else(|| Position::new(&trade.symbol, &trade.exchange));
        let volume_before = position.volume;

        let cash_after = match trade.direction {
            Direction::Buy => {
                let required = money::checked_add(notional, cost.total, "required_cash")?;
                if required > self.cash {
                    warn!(
                        account = %self.id,
                        symbol = %trade.symbol,
                        %required,
                        available = %self.cash,
                        "buy rejected: insufficient funds"
                    );
                    return Err(LedgerError::InsufficientFunds {
                        account_id: self.id.clone(),
                        required,
                        available: self.cash,
                    });
                }
                self.cash - required
            }
            Direction::Sell => {
                let cash_after = money::checked_add(self.cash, notional - cost.total, "cash")?;
                if cash_after < Decimal::ZERO {
                    let required = cost.total - notional;
                    warn!(
                        account = %self.id,
                        symbol = %trade.symbol,
                        %required,
                        available = %self.cash,
                        "sell rejected: costs exceed proceeds and cash"
                    );
                    return Err(LedgerError::InsufficientFunds {
                        account_id: self.id.clone(),
                        required,
                        available: self.cash,
                    });
                }
                cash_after
            }
        };

        let change = position.apply_trade(trade, &cost).inspect_err(|err| {
            warn!(account = %self.id, symbol = %trade.symbol, %err, "trade rejected");
        })?;

        let others = self.positions.values().filter(|p| p.symbol != trade.symbol);
        check_representable(cash_after, others.chain([&position]), |p| p.last_price)?;
        let held_before = money::notional(trade.price, volume_before)?;
        let held_after = money::notional(trade.price, position.volume)?;
        let value_before = money::checked_add(self.cash, held_before, "equity")?;
        let value_after = money::checked_add(cash_after, held_after, "equity")?;
        if let Err(reason) = check_conservation(value_before, cash_after, value_after, cost.total) {
            return Err(self.halt(reason));
        }

        self.cash = cash_after;
        self.positions.insert(trade.symbol.clone(), position);
        let record = TradeRecord {
            trade: trade.clone(),
            cost,
            realized_pnl: change.realized_pnl,
            cash_after,
        };
        self.trades.push(record.clone());

        debug!(
            account = %self.id,
            symbol = %trade.symbol,
            direction = trade.direction.as_str(),
            volume = trade.volume,
            price = %trade.price,
            cost = %record.cost.total,
            cash = %self.cash,
            "trade applied"
        );
        Ok(record)
    }

    /// Update last prices from `prices` and append one equity point.
    /// Symbols without a supplied price keep their previous mark.
    pub fn mark_to_market(
        &mut self,
        timestamp: NaiveDateTime,
        prices: &HashMap<String, Decimal>,
    ) -> Result<EquityPoint, LedgerError> {
        if let Some(last) = self.equity_curve.last() {
            if timestamp < last.timestamp {
                return Err(LedgerError::validation(
                    "timestamp",
                    format!("{timestamp} precedes last equity point {}", last.timestamp),
                ));
            }
        }
        for (symbol, price) in prices {
            if *price <= Decimal::ZERO {
                return Err(LedgerError::validation(
                    "price",
                    format!("mark for {symbol} must be positive, got {price}"),
                ));
            }
        }
        check_representable(self.cash, self.positions.values(), |p| {
            prices.get(&p.symbol).copied().unwrap_or(p.last_price)
        })?;

        for position in self.positions.values_mut() {
            if let Some(price) = prices.get(&position.symbol) {
                position.update_price(*price, timestamp);
            }
        }

        let market_value = self.market_value();
        let point = EquityPoint {
            timestamp,
            cash: self.cash,
            market_value,
            unrealized_pnl: self.total_unrealized_pnl(),
            equity: self.cash + market_value,
        };
        self.equity_curve.push(point.clone());
        Ok(point)
    }

    pub fn deposit(&mut self, amount: Decimal, at: NaiveDateTime) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "amount",
                format!("deposit must be positive, got {amount}"),
            ));
        }
        let cash = money::checked_add(self.cash, amount, "cash")?;
        check_representable(cash, self.positions.values(), |p| p.last_price)?;
        self.cash = cash;
        self.cash_flows.push(CashFlow {
            timestamp: at,
            kind: CashFlowKind::Deposit,
            amount,
            symbol: None,
        });
        debug!(account = %self.id, %amount, cash = %self.cash, "deposit");
        Ok(())
    }

    pub fn withdraw(&mut self, amount: Decimal, at: NaiveDateTime) -> Result<(), LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::validation(
                "amount",
                format!("withdrawal must be positive, got {amount}"),
            ));
        }
        if amount > self.cash {
            return Err(LedgerError::InsufficientFunds {
                account_id: self.id.clone(),
                required: amount,
                available: self.cash,
            });
        }
        self.cash -= amount;
        self.cash_flows.push(CashFlow {
            timestamp: at,
            kind: CashFlowKind::Withdrawal,
            amount: -amount,
            symbol: None,
        });
        debug!(account = %self.id, %amount, cash = %self.cash, "withdrawal");
        Ok(())
    }

    /// Book a corporate action against the held position: the cash dividend
    /// is credited (rounded to the cent) and bonus shares are added, floored
    /// to whole shares. Rights are never subscribed automatically.
    ///
    /// Returns the cash credited.
    pub fn apply_corporate_action(
        &mut self,
        event: &DividendEvent,
    ) -> Result<Decimal, LedgerError> {
        event.validate()?;
        let Some(held_position) = self.positions.get(&event.symbol) else {
            return Ok(Decimal::ZERO);
        };
        if held_position.is_flat() {
            return Ok(Decimal::ZERO);
        }

        let mut position = held_position.clone();
        let held = Decimal::from(position.volume);
        let bonus = if event.changes_share_count() {
            money::checked_mul(event.bonus_share_ratio, held, "bonus_share_ratio")?
                .floor()
                .to_i64()
                .ok_or_else(|| {
                    LedgerError::validation(
                        "bonus_share_ratio",
                        format!("bonus on {} shares of {} overflows", held, event.symbol),
                    )
                })?
        } else {
            0
        };
        let dividend = round_money(money::checked_mul(
            event.cash_dividend_per_share,
            held,
            "cash_dividend_per_share",
        )?);

        position.add_bonus_shares(bonus)?;
        let cash = money::checked_add(self.cash, dividend, "cash")?;
        let others = self.positions.values().filter(|p| p.symbol != event.symbol);
        check_representable(cash, others.chain([&position]), |p| p.last_price)?;

        self.positions.insert(event.symbol.clone(), position);
        if dividend > Decimal::ZERO {
            self.cash = cash;
            self.cash_flows.push(CashFlow {
                timestamp: event.ex_date.and_time(NaiveTime::MIN),
                kind: CashFlowKind::Dividend,
                amount: dividend,
                symbol: Some(event.symbol.clone()),
            });
        }
        if !event.rights_issue_ratio.is_zero() {
            debug!(
                account = %self.id,
                symbol = %event.symbol,
                "rights issue not subscribed"
            );
        }

        debug!(
            account = %self.id,
            symbol = %event.symbol,
            ex_date = %event.ex_date,
            %dividend,
            bonus,
            "corporate action applied"
        );
        Ok(dividend)
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            account_id: self.id.clone(),
            initial_cash: self.initial_cash,
            cash: self.cash,
            market_value: self.market_value(),
            equity: self.equity(),
            unrealized_pnl: self.total_unrealized_pnl(),
            realized_pnl: self.total_realized_pnl(),
            positions: self.positions.values().cloned().collect(),
            halted: self.halted,
        }
    }

    /// Clear the halt flag after an invariant breach has been investigated.
    pub fn reset_halt(&mut self) {
        if self.halted {
            warn!(account = %self.id, "halt manually reset");
        }
        self.halted = false;
    }

    fn halt(&mut self, reason: String) -> LedgerError {
        error!(account = %self.id, %reason, "ledger invariant violated, halting account");
        self.halted = true;
        LedgerError::InternalInvariant {
            account_id: self.id.clone(),
            reason,
        }
    }
}

/// Equity measured at the trade price must move by exactly `-cost` and cash
/// must stay non-negative. Funds are checked before this runs, so a failure
/// here is a bookkeeping bug.
fn check_conservation(
    value_before: Decimal,
    cash_after: Decimal,
    value_after: Decimal,
    cost: Decimal,
) -> Result<(), String> {
    if cash_after < Decimal::ZERO {
        return Err(format!("cash would go negative: {cash_after}"));
    }
    if value_after != value_before - cost {
        return Err(format!(
            "equity moved from {value_before} to {value_after} with cost {cost}"
        ));
    }
    Ok(())
}

/// Rejects a prospective state whose account totals would not fit in a
/// `Decimal`. `price_of` gives the mark each position is valued at.
fn check_representable<'a>(
    cash: Decimal,
    positions: impl IntoIterator<Item = &'a Position>,
    price_of: impl Fn(&Position) -> Decimal,
) -> Result<(), LedgerError> {
    let start = (cash, Decimal::ZERO, Decimal::ZERO);
    positions
        .into_iter()
        .try_fold(start, |(equity, book_cost, realized), p| {
            Ok::<_, LedgerError>((
                money::checked_add(equity, p.market_value(price_of(p))?, "equity")?,
                money::checked_add(book_cost, p.book_cost, "book_cost")?,
                money::checked_add(realized, p.realized_pnl, "realized_pnl")?,
            ))
        })?;
    Ok(())
}
