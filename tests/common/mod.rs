#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use ledgercore::domain::account::{AccountConfig, AccountLedger};
pub use ledgercore::domain::bar::{Bar, Interval};
pub use ledgercore::domain::corporate_action::DividendEvent;
use ledgercore::domain::cost::{CostConfig, TradingCostCalculator};
use ledgercore::domain::error::LedgerError;
use ledgercore::domain::registry::AccountRegistry;
pub use ledgercore::domain::trade::{Direction, Offset, Trade};
use ledgercore::ports::data_port::DataPort;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

pub struct MockDataPort {
    pub bars: HashMap<String, Vec<Bar>>,
    pub events: HashMap<String, Vec<DividendEvent>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            bars: HashMap::new(),
            events: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, symbol: &str, bars: Vec<Bar>) -> Self {
        self.bars.insert(symbol.to_string(), bars);
        self
    }

    pub fn with_events(mut self, symbol: &str, events: Vec<DividendEvent>) -> Self {
        self.events.insert(symbol.to_string(), events);
        self
    }

    pub fn with_error(mut self, symbol: &str, reason: &str) -> Self {
        self.errors.insert(symbol.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, LedgerError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(LedgerError::Data {
                reason: reason.clone(),
            });
        }
        Ok(self
            .bars
            .get(symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.date() >= start_date && b.date() <= end_date)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_dividend_events(&self, symbol: &str) -> Result<Vec<DividendEvent>, LedgerError> {
        if let Some(reason) = self.errors.get(symbol) {
            return Err(LedgerError::Data {
                reason: reason.clone(),
            });
        }
        Ok(self.events.get(symbol).cloned().unwrap_or_default())
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

/// Daily bar closing at 15:00 with a flat OHLC at `close`.
pub fn make_bar(symbol: &str, day: &str, close: Decimal) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        exchange: "SSE".to_string(),
        interval: Interval::Daily,
        timestamp: date(day).and_hms_opt(15, 0, 0).unwrap(),
        open: close,
        high: close,
        low: close,
        close,
        volume: dec!(1000),
        turnover: close * dec!(1000),
    }
}

pub fn make_trade(
    symbol: &str,
    ts: &str,
    direction: Direction,
    price: Decimal,
    volume: i64,
) -> Trade {
    let offset = match direction {
        Direction::Buy => Offset::Open,
        Direction::Sell => Offset::Close,
    };
    Trade {
        symbol: symbol.to_string(),
        exchange: "SSE".to_string(),
        timestamp: at(ts),
        direction,
        offset,
        price,
        volume,
    }
}

pub fn buy(symbol: &str, ts: &str, price: Decimal, volume: i64) -> Trade {
    make_trade(symbol, ts, Direction::Buy, price, volume)
}

pub fn sell(symbol: &str, ts: &str, price: Decimal, volume: i64) -> Trade {
    make_trade(symbol, ts, Direction::Sell, price, volume)
}

/// 0.5 cash plus 0.3 bonus shares per share held.
pub fn bonus_event(symbol: &str, ex_date: &str) -> DividendEvent {
    DividendEvent {
        symbol: symbol.to_string(),
        ex_date: date(ex_date),
        cash_dividend_per_share: dec!(0.5),
        bonus_share_ratio: dec!(0.3),
        rights_issue_ratio: Decimal::ZERO,
        rights_issue_price: Decimal::ZERO,
    }
}

pub fn default_calculator() -> TradingCostCalculator {
    TradingCostCalculator::new(CostConfig::default()).unwrap()
}

pub fn make_ledger(id: &str, initial_cash: Decimal) -> AccountLedger {
    AccountLedger::new(
        AccountConfig {
            id: id.to_string(),
            initial_cash,
        },
        default_calculator(),
    )
    .unwrap()
}

pub fn make_registry(accounts: &[(&str, Decimal)]) -> AccountRegistry {
    let registry = AccountRegistry::new();
    for (id, cash) in accounts {
        registry.open_account(make_ledger(id, *cash)).unwrap();
    }
    registry
}
