//! Portfolio-level roll-up of many accounts.
//!
//! Concentration figures are advisory: lines over their limit are flagged,
//! nothing is blocked here.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, BTreeSet};

use super::account::{AccountSnapshot, EquityPoint};
use super::error::LedgerError;
use super::money;
use super::registry::AccountRegistry;
use crate::ports::sector_port::SectorPort;

/// Sector name used for symbols the classifier does not know.
pub const UNCLASSIFIED: &str = "UNCLASSIFIED";

#[derive(Debug, Clone, PartialEq)]
pub struct ConcentrationThresholds {
    pub max_symbol_weight: Decimal,
    pub max_sector_weight: Decimal,
    /// Fraction of a limit at which a line turns from normal to warning.
    pub warning_level: Decimal,
}

impl Default for ConcentrationThresholds {
    fn default() -> Self {
        ConcentrationThresholds {
            max_symbol_weight: dec!(0.3),
            max_sector_weight: dec!(0.5),
            warning_level: dec!(0.8),
        }
    }
}

impl ConcentrationThresholds {
    pub fn validate(&self) -> Result<(), LedgerError> {
        for (field, value) in [
            ("max_symbol_weight", self.max_symbol_weight),
            ("max_sector_weight", self.max_sector_weight),
            ("warning_level", self.warning_level),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(LedgerError::validation(
                    field,
                    format!("must be in (0, 1], got {value}"),
                ));
            }
        }
        Ok(())
    }

    fn status(&self, weight: Decimal, limit: Decimal) -> ExposureStatus {
        if weight > limit {
            ExposureStatus::Breach
        } else if weight >= limit * self.warning_level {
            ExposureStatus::Warning
        } else {
            ExposureStatus::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureStatus {
    Normal,
    Warning,
    Breach,
}

impl ExposureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExposureStatus::Normal => "normal",
            ExposureStatus::Warning => "warning",
            ExposureStatus::Breach => "breach",
        }
    }
}

/// Exposure to one symbol or sector across all accounts.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureLine {
    pub key: String,
    pub market_value: Decimal,
    /// market_value / total portfolio equity.
    pub weight: Decimal,
    pub limit: Decimal,
    pub status: ExposureStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioTotals {
    pub accounts: usize,
    pub halted_accounts: usize,
    pub cash: Decimal,
    pub market_value: Decimal,
    pub equity: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioReport {
    pub totals: PortfolioTotals,
    pub symbol_exposure: Vec<ExposureLine>,
    pub sector_exposure: Vec<ExposureLine>,
    pub equity_curve: Vec<EquityPoint>,
}

/// What the aggregator needs from one account.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountView {
    pub snapshot: AccountSnapshot,
    pub equity_curve: Vec<EquityPoint>,
}

#[derive(Debug, Clone)]
pub struct PortfolioAggregator {
    thresholds: ConcentrationThresholds,
}

impl PortfolioAggregator {
    pub fn new(thresholds: ConcentrationThresholds) -> Result<Self, LedgerError> {
        thresholds.validate()?;
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &ConcentrationThresholds {
        &self.thresholds
    }

    /// Snapshot every account in `registry` and summarize them.
    pub fn aggregate(
        &self,
        registry: &AccountRegistry,
        sectors: &dyn SectorPort,
    ) -> Result<PortfolioReport, LedgerError> {
        let mut views = Vec::new();
        for id in registry.account_ids()? {
            let view = registry.with_account(&id, |ledger| {
                Ok(AccountView {
                    snapshot: ledger.snapshot(),
                    equity_curve: ledger.equity_curve().to_vec(),
                })
            })?;
            views.push(view);
        }
        self.summarize(&views, sectors)
    }

    pub fn summarize(
        &self,
        views: &[AccountView],
        sectors: &dyn SectorPort,
    ) -> Result<PortfolioReport, LedgerError> {
        let totals = totals(views)?;

        let mut by_symbol: BTreeMap<String, Decimal> = BTreeMap::new();
        let mut by_sector: BTreeMap<String, Decimal> = BTreeMap::new();
        for view in views {
            for position in view.snapshot.positions.iter().filter(|p| !p.is_flat()) {
                let value = position.market_value(position.last_price)?;
                let symbol_total = by_symbol.entry(position.symbol.clone()).or_default();
                *symbol_total = money::checked_add(*symbol_total, value, "market_value")?;
                let sector = sectors
                    .sector_of(&position.symbol)
                    .unwrap_or_else(|| UNCLASSIFIED.to_string());
                let sector_total = by_sector.entry(sector).or_default();
                *sector_total = money::checked_add(*sector_total, value, "market_value")?;
            }
        }

        let symbol_exposure =
            self.exposure_lines(by_symbol, totals.equity, self.thresholds.max_symbol_weight);
        let sector_exposure =
            self.exposure_lines(by_sector, totals.equity, self.thresholds.max_sector_weight);

        for line in symbol_exposure.iter().chain(&sector_exposure) {
            if line.status == ExposureStatus::Breach {
                tracing::warn!(
                    key = %line.key,
                    weight = %line.weight,
                    limit = %line.limit,
                    "concentration limit exceeded"
                );
            }
        }

        Ok(PortfolioReport {
            totals,
            symbol_exposure,
            sector_exposure,
            equity_curve: combined_equity_curve(views)?,
        })
    }

    fn exposure_lines(
        &self,
        values: BTreeMap<String, Decimal>,
        equity: Decimal,
        limit: Decimal,
    ) -> Vec<ExposureLine> {
        let mut lines: Vec<ExposureLine> = values
            .into_iter()
            .map(|(key, market_value)| {
                let weight = if equity > Decimal::ZERO {
                    market_value / equity
                } else {
                    Decimal::ZERO
                };
                ExposureLine {
                    key,
                    market_value,
                    weight,
                    limit,
                    status: self.thresholds.status(weight, limit),
                }
            })
            .collect();
        lines.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.key.cmp(&b.key)));
        lines
    }
}

fn totals(views: &[AccountView]) -> Result<PortfolioTotals, LedgerError> {
    let mut totals = PortfolioTotals {
        accounts: views.len(),
        halted_accounts: 0,
        cash: Decimal::ZERO,
        market_value: Decimal::ZERO,
        equity: Decimal::ZERO,
        unrealized_pnl: Decimal::ZERO,
        realized_pnl: Decimal::ZERO,
    };
    for view in views {
        let snap = &view.snapshot;
        if snap.halted {
            totals.halted_accounts += 1;
        }
        totals.cash = money::checked_add(totals.cash, snap.cash, "cash")?;
        totals.market_value =
            money::checked_add(totals.market_value, snap.market_value, "market_value")?;
        totals.equity = money::checked_add(totals.equity, snap.equity, "equity")?;
        totals.unrealized_pnl =
            money::checked_add(totals.unrealized_pnl, snap.unrealized_pnl, "unrealized_pnl")?;
        totals.realized_pnl =
            money::checked_add(totals.realized_pnl, snap.realized_pnl, "realized_pnl")?;
    }
    Ok(totals)
}

/// Sum of all accounts' equity curves on the union of their timestamps.
///
/// At each timestamp an account contributes its latest point at or before
/// it; before its first point it contributes its initial cash.
pub fn combined_equity_curve(views: &[AccountView]) -> Result<Vec<EquityPoint>, LedgerError> {
    let timestamps: BTreeSet<_> = views
        .iter()
        .flat_map(|v| v.equity_curve.iter().map(|p| p.timestamp))
        .collect();

    let mut cursors = vec![0usize; views.len()];
    let mut combined = Vec::with_capacity(timestamps.len());
    for timestamp in timestamps {
        let mut point = EquityPoint {
            timestamp,
            cash: Decimal::ZERO,
            market_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            equity: Decimal::ZERO,
        };
        for (view, cursor) in views.iter().zip(cursors.iter_mut()) {
            let curve = &view.equity_curve;
            while *cursor < curve.len() && curve[*cursor].timestamp <= timestamp {
                *cursor += 1;
            }
            match cursor.checked_sub(1).map(|i| &curve[i]) {
                Some(latest) => point.add(latest)?,
                None => {
                    let initial_cash = view.snapshot.initial_cash;
                    point.cash = money::checked_add(point.cash, initial_cash, "cash")?;
                    point.equity = money::checked_add(point.equity, initial_cash, "equity")?;
                }
            }
        }
        combined.push(point);
    }
    Ok(combined)
}

impl EquityPoint {
    fn add(&mut self, other: &EquityPoint) -> Result<(), LedgerError> {
        self.cash = money::checked_add(self.cash, other.cash, "cash")?;
        self.market_value =
            money::checked_add(self.market_value, other.market_value, "market_value")?;
        self.unrealized_pnl =
            money::checked_add(self.unrealized_pnl, other.unrealized_pnl, "unrealized_pnl")?;
        self.equity = money::checked_add(self.equity, other.equity, "equity")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::Position;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::collections::HashMap;

    struct MapSectors(HashMap<String, String>);

    impl SectorPort for MapSectors {
        fn sector_of(&self, symbol: &str) -> Option<String> {
            self.0.get(symbol).cloned()
        }
    }

    fn sectors() -> MapSectors {
        MapSectors(
            [("600000", "Banks"), ("601398", "Banks"), ("600519", "Beverages")]
                .iter()
                .map(|(s, c)| (s.to_string(), c.to_string()))
                .collect(),
        )
    }

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, day)
            .unwrap()
            .and_hms_opt(15, 0, 0)
            .unwrap()
    }

    fn sample_position(symbol: &str, volume: i64, price: Decimal) -> Position {
        Position {
            volume,
            book_cost: price * Decimal::from(volume),
            average_cost_basis: price,
            last_price: price,
            ..Position::new(symbol, "SSE")
        }
    }

    fn sample_view(id: &str, cash: Decimal, positions: Vec<Position>) -> AccountView {
        let market_value: Decimal = positions
            .iter()
            .map(|p| p.market_value(p.last_price).unwrap())
            .sum();
        AccountView {
            snapshot: AccountSnapshot {
                account_id: id.into(),
                initial_cash: dec!(100000),
                cash,
                market_value,
                equity: cash + market_value,
                unrealized_pnl: Decimal::ZERO,
                realized_pnl: Decimal::ZERO,
                positions,
                halted: false,
            },
            equity_curve: Vec::new(),
        }
    }

    fn point(day: u32, equity: Decimal) -> EquityPoint {
        EquityPoint {
            timestamp: ts(day),
            cash: equity,
            market_value: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            equity,
        }
    }

    fn aggregator() -> PortfolioAggregator {
        PortfolioAggregator::new(ConcentrationThresholds::default()).unwrap()
    }

    #[test]
    fn totals_sum_accounts() {
        let views = vec![
            sample_view("a", dec!(50000), vec![sample_position("600000", 1000, dec!(10))]),
            sample_view("b", dec!(80000), vec![]),
        ];
        let report = aggregator().summarize(&views, &sectors()).unwrap();
        assert_eq!(report.totals.accounts, 2);
        assert_eq!(report.totals.cash, dec!(130000));
        assert_eq!(report.totals.market_value, dec!(10000));
        assert_eq!(report.totals.equity, dec!(140000));
    }

    #[test]
    fn symbol_exposure_status() {
        // equity 100000: 600519 at 35% breaches, 600000 at 25% warns (>= 24%)
        let views = vec![sample_view(
            "a",
            dec!(40000),
            vec![
                sample_position("600519", 100, dec!(350)),
                sample_position("600000", 2500, dec!(10)),
            ],
        )];
        let report = aggregator().summarize(&views, &sectors()).unwrap();
        let lines = &report.symbol_exposure;
        assert_eq!(lines[0].key, "600519");
        assert_eq!(lines[0].weight, dec!(0.35));
        assert_eq!(lines[0].status, ExposureStatus::Breach);
        assert_eq!(lines[1].key, "600000");
        assert_eq!(lines[1].status, ExposureStatus::Warning);
    }

    #[test]
    fn sector_exposure_merges_symbols_and_accounts() {
        let views = vec![
            sample_view("a", dec!(90000), vec![sample_position("600000", 1000, dec!(10))]),
            sample_view("b", dec!(90000), vec![sample_position("601398", 2000, dec!(5))]),
        ];
        let report = aggregator().summarize(&views, &sectors()).unwrap();
        assert_eq!(report.sector_exposure.len(), 1);
        let banks = &report.sector_exposure[0];
        assert_eq!(banks.key, "Banks");
        assert_eq!(banks.market_value, dec!(20000));
        assert_eq!(banks.weight, dec!(0.1));
        assert_eq!(banks.status, ExposureStatus::Normal);
    }

    #[test]
    fn unknown_symbols_are_unclassified() {
        let views = vec![sample_view(
            "a",
            dec!(90000),
            vec![sample_position("000001", 1000, dec!(10))],
        )];
        let report = aggregator().summarize(&views, &sectors()).unwrap();
        assert_eq!(report.sector_exposure[0].key, UNCLASSIFIED);
    }

    #[test]
    fn flat_positions_are_ignored() {
        let mut flat = sample_position("600000", 0, dec!(10));
        flat.book_cost = Decimal::ZERO;
        let views = vec![sample_view("a", dec!(100000), vec![flat])];
        let report = aggregator().summarize(&views, &sectors()).unwrap();
        assert!(report.symbol_exposure.is_empty());
        assert!(report.sector_exposure.is_empty());
    }

    #[test]
    fn combined_curve_carries_forward_and_uses_initial_cash() {
        let mut a = sample_view("a", dec!(100000), vec![]);
        a.equity_curve = vec![point(1, dec!(101000)), point(3, dec!(102000))];
        let mut b = sample_view("b", dec!(100000), vec![]);
        b.equity_curve = vec![point(2, dec!(99000))];

        let curve = combined_equity_curve(&[a, b]).unwrap();
        let equities: Vec<Decimal> = curve.iter().map(|p| p.equity).collect();
        assert_eq!(
            equities,
            vec![dec!(201000), dec!(200000), dec!(201000)]
        );
        assert_eq!(curve[0].timestamp, ts(1));
        assert_eq!(curve[2].timestamp, ts(3));
    }

    #[test]
    fn totals_that_overflow_are_an_error() {
        let views = vec![
            sample_view("a", Decimal::MAX, vec![]),
            sample_view("b", Decimal::MAX, vec![]),
        ];
        let err = aggregator().summarize(&views, &sectors()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field, .. } if field == "cash"));
    }

    #[test]
    fn thresholds_validated() {
        let bad = ConcentrationThresholds {
            max_symbol_weight: dec!(1.5),
            ..ConcentrationThresholds::default()
        };
        assert!(PortfolioAggregator::new(bad).is_err());
        let zero = ConcentrationThresholds {
            warning_level: Decimal::ZERO,
            ..ConcentrationThresholds::default()
        };
        assert!(zero.validate().is_err());
    }
}
