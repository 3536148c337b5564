//! Ex-dividend / ex-rights price adjustment.
//!
//! Factor tables are built per (symbol, mode) from the registered
//! corporate actions and the registered reference closes, then cached behind
//! an `Arc` so any number of readers can share them. Registering a new event
//! or more history for a symbol drops that symbol's cached tables.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use super::bar::Bar;
use super::corporate_action::DividendEvent;
use super::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdjustmentMode {
    /// Raw prices.
    None,
    /// Earliest prices anchored at factor 1, later prices scaled up.
    Forward,
    /// Latest prices anchored at factor 1, earlier prices scaled down.
    Backward,
}

impl AdjustmentMode {
    pub fn parse(s: &str) -> Option<AdjustmentMode> {
        match s.trim().to_lowercase().as_str() {
            "none" | "raw" => Some(AdjustmentMode::None),
            "forward" => Some(AdjustmentMode::Forward),
            "backward" => Some(AdjustmentMode::Backward),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentMode::None => "none",
            AdjustmentMode::Forward => "forward",
            AdjustmentMode::Backward => "backward",
        }
    }
}

/// Missing or unusable corporate-action data behind an adjusted result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataGap {
    /// No reference bar before the ex-date, so the event ratio is unknown.
    MissingPriorClose { ex_date: NaiveDate },
    /// The event would take the ex-rights price to zero or below.
    DegenerateEvent { ex_date: NaiveDate },
    /// Bars fall outside the range the event feed is known to cover.
    UncoveredRange { from: NaiveDate, to: NaiveDate },
}

impl DataGap {
    /// Whether the gap can distort factors applied to bars in `[first, last]`.
    fn affects(&self, mode: AdjustmentMode, first: NaiveDate, last: NaiveDate) -> bool {
        match self {
            DataGap::MissingPriorClose { ex_date } | DataGap::DegenerateEvent { ex_date } => {
                match mode {
                    AdjustmentMode::None => false,
                    AdjustmentMode::Backward => *ex_date > first,
                    AdjustmentMode::Forward => *ex_date <= last,
                }
            }
            DataGap::UncoveredRange { from, to } => *from <= last && *to >= first,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactorPoint {
    pub date: NaiveDate,
    pub factor: Decimal,
}

/// Cumulative adjustment factors for one symbol in one mode.
///
/// `factor_at(d)` is the factor of the last point dated on or before `d`,
/// or `base` when `d` precedes every point.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorTable {
    pub symbol: String,
    pub mode: AdjustmentMode,
    pub base: Decimal,
    pub points: Vec<FactorPoint>,
    pub gaps: Vec<DataGap>,
}

impl FactorTable {
    pub fn identity(symbol: &str, mode: AdjustmentMode) -> Self {
        FactorTable {
            symbol: symbol.to_string(),
            mode,
            base: Decimal::ONE,
            points: Vec::new(),
            gaps: Vec::new(),
        }
    }

    pub fn factor_at(&self, date: NaiveDate) -> Decimal {
        let idx = self.points.partition_point(|p| p.date <= date);
        if idx == 0 {
            self.base
        } else {
            self.points[idx - 1].factor
        }
    }

    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// Bars rewritten by a factor table, tagged with how trustworthy they are.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedSeries {
    pub symbol: String,
    pub mode: AdjustmentMode,
    pub bars: Vec<Bar>,
    /// Set whenever any gap touches the series; callers must not treat an
    /// incomplete series as exact.
    pub incomplete: bool,
    pub gaps: Vec<DataGap>,
}

/// Build a factor table from chronologically sorted events and reference
/// closes keyed by bar timestamp.
pub fn build_table(
    symbol: &str,
    mode: AdjustmentMode,
    events: &[DividendEvent],
    closes: &BTreeMap<NaiveDateTime, Decimal>,
) -> FactorTable {
    if mode == AdjustmentMode::None {
        return FactorTable::identity(symbol, mode);
    }

    let mut gaps = Vec::new();
    let mut ratios: Vec<(NaiveDate, Decimal)> = Vec::with_capacity(events.len());

    for event in events {
        let ex_start = event.ex_date.and_time(chrono::NaiveTime::MIN);
        let prior_close = closes.range(..ex_start).next_back().map(|(_, close)| *close);
        match prior_close {
            None => gaps.push(DataGap::MissingPriorClose {
                ex_date: event.ex_date,
            }),
            Some(close) => match event.price_ratio(close) {
                Some(ratio) => ratios.push((event.ex_date, ratio)),
                None => gaps.push(DataGap::DegenerateEvent {
                    ex_date: event.ex_date,
                }),
            },
        }
    }

    let (base, points) = match mode {
        AdjustmentMode::Backward => {
            let mut points = Vec::with_capacity(ratios.len());
            let mut cumulative = Decimal::ONE;
            for (date, ratio) in ratios.iter().rev() {
                points.push(FactorPoint {
                    date: *date,
                    factor: cumulative,
                });
                cumulative *= *ratio;
            }
            points.reverse();
            (cumulative, points)
        }
        AdjustmentMode::Forward => {
            let mut points = Vec::with_capacity(ratios.len());
            let mut cumulative = Decimal::ONE;
            for (date, ratio) in &ratios {
                cumulative /= *ratio;
                points.push(FactorPoint {
                    date: *date,
                    factor: cumulative,
                });
            }
            (Decimal::ONE, points)
        }
        AdjustmentMode::None => unreachable!("handled above"),
    };

    FactorTable {
        symbol: symbol.to_string(),
        mode,
        base,
        points,
        gaps,
    }
}

/// Sort by timestamp and keep the first bar seen for each timestamp.
fn sorted_unique(bars: &[Bar]) -> Vec<Bar> {
    let mut sorted: Vec<Bar> = bars.to_vec();
    sorted.sort_by_key(|b| b.timestamp);
    sorted.dedup_by_key(|b| b.timestamp);
    sorted
}

fn closes_of(bars: &[Bar]) -> BTreeMap<NaiveDateTime, Decimal> {
    let mut closes = BTreeMap::new();
    for bar in bars {
        closes.entry(bar.timestamp).or_insert(bar.close);
    }
    closes
}

#[derive(Debug, Default)]
pub struct PriceAdjustmentEngine {
    events: HashMap<String, BTreeMap<NaiveDate, DividendEvent>>,
    history: HashMap<String, BTreeMap<NaiveDateTime, Decimal>>,
    coverage: HashMap<String, (NaiveDate, NaiveDate)>,
    tables: RwLock<HashMap<(String, AdjustmentMode), Arc<FactorTable>>>,
}

impl PriceAdjustmentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one corporate action. Re-registering an identical event is a
    /// no-op; a different event on the same symbol and ex-date is rejected.
    pub fn register_event(&mut self, event: DividendEvent) -> Result<(), LedgerError> {
        event.validate()?;

        let by_date = self.events.entry(event.symbol.clone()).or_default();
        if let Some(existing) = by_date.get(&event.ex_date) {
            if *existing == event {
                return Ok(());
            }
            return Err(LedgerError::ConflictingEvent {
                symbol: event.symbol,
                ex_date: event.ex_date,
            });
        }

        tracing::debug!(
            symbol = %event.symbol,
            ex_date = %event.ex_date,
            "registered corporate action"
        );
        let symbol = event.symbol.clone();
        by_date.insert(event.ex_date, event);
        self.invalidate(&symbol);
        Ok(())
    }

    /// Register several events, stopping at the first invalid one. Events
    /// registered before the failure stay registered.
    pub fn register_events<I>(&mut self, events: I) -> Result<usize, LedgerError>
    where
        I: IntoIterator<Item = DividendEvent>,
    {
        let mut count = 0;
        for event in events {
            self.register_event(event)?;
            count += 1;
        }
        Ok(count)
    }

    /// Register raw reference bars whose closes supply each event's prior
    /// close. Bars for other symbols are rejected.
    pub fn register_history(&mut self, symbol: &str, bars: &[Bar]) -> Result<(), LedgerError> {
        for bar in bars {
            if bar.symbol != symbol {
                return Err(LedgerError::validation(
                    "symbol",
                    format!("history bar for {} registered under {}", bar.symbol, symbol),
                ));
            }
            bar.validate()?;
        }
        let closes = self.history.entry(symbol.to_string()).or_default();
        for bar in bars {
            closes.insert(bar.timestamp, bar.close);
        }
        self.invalidate(symbol);
        Ok(())
    }

    /// Record that the event feed for `symbol` is complete over `[from, to]`.
    pub fn mark_coverage(
        &mut self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<(), LedgerError> {
        if from > to {
            return Err(LedgerError::validation(
                "coverage",
                format!("start {} is after end {}", from, to),
            ));
        }
        self.coverage.insert(symbol.to_string(), (from, to));
        Ok(())
    }

    pub fn events(&self, symbol: &str) -> Vec<DividendEvent> {
        self.events
            .get(symbol)
            .map(|by_date| by_date.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Build (or fetch from cache) the factor table for `symbol` in `mode`
    /// using the registered history.
    pub fn build_factor_table(&self, symbol: &str, mode: AdjustmentMode) -> Arc<FactorTable> {
        let key = (symbol.to_string(), mode);
        if let Some(table) = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(table);
        }

        let empty = BTreeMap::new();
        let closes = self.history.get(symbol).unwrap_or(&empty);
        let table = Arc::new(build_table(symbol, mode, &self.events(symbol), closes));

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(tables.entry(key).or_insert(table))
    }

    /// Return an adjusted copy of `bars`. Input is never mutated.
    ///
    /// When no history is registered for `symbol` the supplied bars are used
    /// as the reference closes and the table is not cached.
    pub fn apply(
        &self,
        bars: &[Bar],
        symbol: &str,
        mode: AdjustmentMode,
    ) -> Result<AdjustedSeries, LedgerError> {
        for bar in bars {
            if bar.symbol != symbol {
                return Err(LedgerError::validation(
                    "symbol",
                    format!("bar for {} passed to {} adjustment", bar.symbol, symbol),
                ));
            }
            bar.validate()?;
        }

        let sorted = sorted_unique(bars);
        if mode == AdjustmentMode::None || sorted.is_empty() {
            return Ok(AdjustedSeries {
                symbol: symbol.to_string(),
                mode,
                bars: sorted,
                incomplete: false,
                gaps: Vec::new(),
            });
        }

        let table = if self.history.contains_key(symbol) {
            self.build_factor_table(symbol, mode)
        } else {
            Arc::new(build_table(symbol, mode, &self.events(symbol), &closes_of(&sorted)))
        };

        let first = sorted[0].date();
        let last = sorted[sorted.len() - 1].date();

        let mut gaps: Vec<DataGap> = table
            .gaps
            .iter()
            .filter(|gap| gap.affects(mode, first, last))
            .cloned()
            .collect();
        gaps.extend(self.coverage_gaps(symbol, first, last));

        let adjusted: Vec<Bar> = sorted
            .iter()
            .map(|bar| bar.scaled(table.factor_at(bar.date())))
            .collect();

        let incomplete = !gaps.is_empty();
        if incomplete {
            tracing::warn!(
                symbol,
                mode = mode.as_str(),
                gaps = gaps.len(),
                "adjusted series is incomplete"
            );
        }

        Ok(AdjustedSeries {
            symbol: symbol.to_string(),
            mode,
            bars: adjusted,
            incomplete,
            gaps,
        })
    }

    /// Adjust a single price as of `date`.
    pub fn adjusted_price(
        &self,
        price: Decimal,
        date: NaiveDate,
        symbol: &str,
        mode: AdjustmentMode,
    ) -> Result<Decimal, LedgerError> {
        if price <= Decimal::ZERO {
            return Err(LedgerError::validation("price", "must be positive"));
        }
        if mode == AdjustmentMode::None {
            return Ok(price);
        }
        Ok(price * self.build_factor_table(symbol, mode).factor_at(date))
    }

    fn coverage_gaps(&self, symbol: &str, first: NaiveDate, last: NaiveDate) -> Vec<DataGap> {
        match self.coverage.get(symbol) {
            None => vec![DataGap::UncoveredRange {
                from: first,
                to: last,
            }],
            Some(&(from, to)) => {
                let mut gaps = Vec::new();
                if first < from {
                    gaps.push(DataGap::UncoveredRange {
                        from: first,
                        to: (from - chrono::Duration::days(1)).min(last),
                    });
                }
                if last > to {
                    gaps.push(DataGap::UncoveredRange {
                        from: (to + chrono::Duration::days(1)).max(first),
                        to: last,
                    });
                }
                gaps
            }
        }
    }

    fn invalidate(&mut self, symbol: &str) {
        self.tables
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(s, _), _| s != symbol);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bar::Interval;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn make_bar(day: NaiveDate, close: Decimal) -> Bar {
        Bar {
            symbol: "600000".into(),
            exchange: "SSE".into(),
            interval: Interval::Daily,
            timestamp: day.and_hms_opt(15, 0, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1000),
            turnover: close * dec!(1000),
        }
    }

    fn bonus_event(ex_date: NaiveDate) -> DividendEvent {
        DividendEvent {
            symbol: "600000".into(),
            ex_date,
            cash_dividend_per_share: dec!(0.5),
            bonus_share_ratio: dec!(0.3),
            rights_issue_ratio: Decimal::ZERO,
            rights_issue_price: Decimal::ZERO,
        }
    }

    fn split_event(ex_date: NaiveDate) -> DividendEvent {
        DividendEvent {
            symbol: "600000".into(),
            ex_date,
            cash_dividend_per_share: Decimal::ZERO,
            bonus_share_ratio: Decimal::ONE,
            rights_issue_ratio: Decimal::ZERO,
            rights_issue_price: Decimal::ZERO,
        }
    }

    fn engine_with(events: Vec<DividendEvent>, bars: &[Bar]) -> PriceAdjustmentEngine {
        let mut engine = PriceAdjustmentEngine::new();
        engine.register_events(events).unwrap();
        engine.register_history("600000", bars).unwrap();
        engine
            .mark_coverage("600000", date(2000, 1, 1), date(2100, 1, 1))
            .unwrap();
        engine
    }

    #[test]
    fn mode_parse() {
        assert_eq!(AdjustmentMode::parse("Backward"), Some(AdjustmentMode::Backward));
        assert_eq!(AdjustmentMode::parse("forward"), Some(AdjustmentMode::Forward));
        assert_eq!(AdjustmentMode::parse("none"), Some(AdjustmentMode::None));
        assert_eq!(AdjustmentMode::parse("qfq"), None);
    }

    #[test]
    fn backward_table_scales_history_down() {
        let bars = vec![
            make_bar(date(2024, 6, 19), dec!(20.0)),
            make_bar(date(2024, 6, 20), dec!(15.0)),
        ];
        let engine = engine_with(vec![bonus_event(date(2024, 6, 20))], &bars);
        let table = engine.build_factor_table("600000", AdjustmentMode::Backward);

        assert_eq!(table.base, dec!(0.75));
        assert_eq!(table.factor_at(date(2024, 6, 19)), dec!(0.75));
        assert_eq!(table.factor_at(date(2024, 6, 20)), Decimal::ONE);
        assert_eq!(table.factor_at(date(2025, 1, 1)), Decimal::ONE);
        assert!(table.is_complete());
    }

    #[test]
    fn forward_table_scales_later_prices_up() {
        let bars = vec![
            make_bar(date(2024, 6, 19), dec!(20.0)),
            make_bar(date(2024, 6, 20), dec!(10.0)),
        ];
        let engine = engine_with(vec![split_event(date(2024, 6, 20))], &bars);
        let table = engine.build_factor_table("600000", AdjustmentMode::Forward);

        assert_eq!(table.base, Decimal::ONE);
        assert_eq!(table.factor_at(date(2024, 6, 19)), Decimal::ONE);
        assert_eq!(table.factor_at(date(2024, 6, 20)), dec!(2));
    }

    #[test]
    fn backward_chain_multiplies_ratios() {
        let bars = vec![
            make_bar(date(2024, 1, 2), dec!(20)),
            make_bar(date(2024, 3, 1), dec!(10)),
            make_bar(date(2024, 6, 3), dec!(9)),
        ];
        let events = vec![
            split_event(date(2024, 3, 1)),
            DividendEvent::cash("600000", date(2024, 6, 3), dec!(1)),
        ];
        let engine = engine_with(events, &bars);
        let table = engine.build_factor_table("600000", AdjustmentMode::Backward);

        // split: 20 -> 10 (0.5); dividend: 10 -> 9 (0.9)
        assert_eq!(table.base, dec!(0.45));
        assert_eq!(table.factor_at(date(2024, 3, 1)), dec!(0.9));
        assert_eq!(table.factor_at(date(2024, 6, 3)), Decimal::ONE);
    }

    #[test]
    fn factor_changes_by_exact_event_ratio_across_ex_date() {
        let bars = vec![
            make_bar(date(2024, 1, 2), dec!(20)),
            make_bar(date(2024, 3, 1), dec!(10)),
            make_bar(date(2024, 6, 3), dec!(9)),
        ];
        let events = vec![
            split_event(date(2024, 3, 1)),
            DividendEvent::cash("600000", date(2024, 6, 3), dec!(1)),
        ];
        let engine = engine_with(events, &bars);
        for mode in [AdjustmentMode::Backward, AdjustmentMode::Forward] {
            let table = engine.build_factor_table("600000", mode);
            let before = table.factor_at(date(2024, 2, 29));
            let after = table.factor_at(date(2024, 3, 1));
            assert_eq!(before / after, dec!(0.5), "mode {:?}", mode);
        }
    }

    #[test]
    fn build_is_idempotent_and_cached() {
        let bars = vec![make_bar(date(2024, 6, 19), dec!(20.0))];
        let engine = engine_with(vec![bonus_event(date(2024, 6, 20))], &bars);

        let first = engine.build_factor_table("600000", AdjustmentMode::Backward);
        let second = engine.build_factor_table("600000", AdjustmentMode::Backward);
        assert!(Arc::ptr_eq(&first, &second));

        let fresh = build_table(
            "600000",
            AdjustmentMode::Backward,
            &engine.events("600000"),
            &closes_of(&bars),
        );
        assert_eq!(*first, fresh);
    }

    #[test]
    fn registering_event_invalidates_cache() {
        let bars = vec![
            make_bar(date(2024, 1, 2), dec!(20)),
            make_bar(date(2024, 6, 19), dec!(20)),
        ];
        let mut engine = engine_with(vec![bonus_event(date(2024, 6, 20))], &bars);
        let before = engine.build_factor_table("600000", AdjustmentMode::Backward);

        engine.register_event(split_event(date(2024, 3, 1))).unwrap();
        let after = engine.build_factor_table("600000", AdjustmentMode::Backward);

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.points.len(), 2);
    }

    #[test]
    fn duplicate_identical_event_is_noop() {
        let mut engine = PriceAdjustmentEngine::new();
        engine.register_event(bonus_event(date(2024, 6, 20))).unwrap();
        engine.register_event(bonus_event(date(2024, 6, 20))).unwrap();
        assert_eq!(engine.events("600000").len(), 1);
    }

    #[test]
    fn conflicting_event_rejected() {
        let mut engine = PriceAdjustmentEngine::new();
        engine.register_event(bonus_event(date(2024, 6, 20))).unwrap();
        let err = engine
            .register_event(split_event(date(2024, 6, 20)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ConflictingEvent { .. }));
        assert_eq!(engine.events("600000")[0], bonus_event(date(2024, 6, 20)));
    }

    #[test]
    fn negative_event_rejected_and_not_registered() {
        let mut engine = PriceAdjustmentEngine::new();
        let event = DividendEvent::cash("600000", date(2024, 6, 20), dec!(-0.1));
        assert!(matches!(
            engine.register_event(event),
            Err(LedgerError::Validation { .. })
        ));
        assert!(engine.events("600000").is_empty());
    }

    #[test]
    fn apply_backward_rewrites_prices_and_volume() {
        let bars = vec![
            make_bar(date(2024, 6, 19), dec!(20.0)),
            make_bar(date(2024, 6, 20), dec!(15.0)),
        ];
        let engine = engine_with(vec![bonus_event(date(2024, 6, 20))], &bars);
        let series = engine
            .apply(&bars, "600000", AdjustmentMode::Backward)
            .unwrap();

        assert!(!series.incomplete);
        assert_eq!(series.bars[0].close, dec!(15));
        assert_eq!(series.bars[0].volume, dec!(1000) / dec!(0.75));
        assert_eq!(series.bars[0].turnover, bars[0].turnover);
        assert_eq!(series.bars[1].close, dec!(15));
        assert_eq!(bars[0].close, dec!(20.0));
    }

    #[test]
    fn apply_sorts_and_dedups() {
        let bars = vec![
            make_bar(date(2024, 6, 20), dec!(15.0)),
            make_bar(date(2024, 6, 19), dec!(20.0)),
            make_bar(date(2024, 6, 20), dec!(99.0)),
        ];
        let engine = engine_with(vec![], &bars[..2]);
        let series = engine
            .apply(&bars, "600000", AdjustmentMode::Backward)
            .unwrap();
        assert_eq!(series.bars.len(), 2);
        assert_eq!(series.bars[0].date(), date(2024, 6, 19));
        assert_eq!(series.bars[1].close, dec!(15.0));
    }

    #[test]
    fn apply_none_mode_is_raw() {
        let bars = vec![make_bar(date(2024, 6, 19), dec!(20.0))];
        let engine = PriceAdjustmentEngine::new();
        let series = engine.apply(&bars, "600000", AdjustmentMode::None).unwrap();
        assert!(!series.incomplete);
        assert_eq!(series.bars, bars);
    }

    #[test]
    fn missing_prior_close_flags_incomplete() {
        let bars = vec![make_bar(date(2024, 6, 20), dec!(15.0))];
        let engine = engine_with(vec![bonus_event(date(2024, 6, 20))], &bars);
        let series = engine
            .apply(&bars, "600000", AdjustmentMode::Forward)
            .unwrap();
        assert!(series.incomplete);
        assert!(series.gaps.contains(&DataGap::MissingPriorClose {
            ex_date: date(2024, 6, 20)
        }));
        assert_eq!(series.bars[0].close, dec!(15.0));
    }

    #[test]
    fn uncovered_range_flags_incomplete() {
        let bars = vec![
            make_bar(date(2024, 1, 2), dec!(10)),
            make_bar(date(2024, 1, 3), dec!(10)),
        ];
        let mut engine = PriceAdjustmentEngine::new();
        engine.register_history("600000", &bars).unwrap();
        let series = engine
            .apply(&bars, "600000", AdjustmentMode::Backward)
            .unwrap();
        assert!(series.incomplete);
        assert_eq!(
            series.gaps,
            vec![DataGap::UncoveredRange {
                from: date(2024, 1, 2),
                to: date(2024, 1, 3)
            }]
        );

        engine
            .mark_coverage("600000", date(2024, 1, 3), date(2024, 12, 31))
            .unwrap();
        let series = engine
            .apply(&bars, "600000", AdjustmentMode::Backward)
            .unwrap();
        assert_eq!(
            series.gaps,
            vec![DataGap::UncoveredRange {
                from: date(2024, 1, 2),
                to: date(2024, 1, 2)
            }]
        );
    }

    #[test]
    fn gap_after_series_does_not_affect_forward_mode() {
        let bars = vec![make_bar(date(2024, 1, 2), dec!(10))];
        let engine = engine_with(vec![], &bars);
        let table = FactorTable {
            gaps: vec![DataGap::MissingPriorClose {
                ex_date: date(2024, 6, 1),
            }],
            ..FactorTable::identity("600000", AdjustmentMode::Forward)
        };
        let day = date(2024, 1, 2);
        assert!(!table.gaps[0].affects(AdjustmentMode::Forward, day, day));
        assert!(table.gaps[0].affects(AdjustmentMode::Backward, day, day));
        let series = engine.apply(&bars, "600000", AdjustmentMode::Forward).unwrap();
        assert!(!series.incomplete);
    }

    #[test]
    fn apply_without_history_uses_supplied_bars() {
        let bars = vec![
            make_bar(date(2024, 6, 19), dec!(20.0)),
            make_bar(date(2024, 6, 20), dec!(15.0)),
        ];
        let mut engine = PriceAdjustmentEngine::new();
        engine.register_event(bonus_event(date(2024, 6, 20))).unwrap();
        engine
            .mark_coverage("600000", date(2024, 1, 1), date(2024, 12, 31))
            .unwrap();
        let series = engine
            .apply(&bars, "600000", AdjustmentMode::Backward)
            .unwrap();
        assert!(!series.incomplete);
        assert_eq!(series.bars[0].close, dec!(15));
    }

    #[test]
    fn apply_rejects_foreign_symbol() {
        let mut bar = make_bar(date(2024, 6, 19), dec!(20.0));
        bar.symbol = "000001".into();
        let engine = PriceAdjustmentEngine::new();
        let err = engine
            .apply(&[bar], "600000", AdjustmentMode::Backward)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { field, .. } if field == "symbol"));
    }

    #[test]
    fn degenerate_event_is_skipped_and_flagged() {
        let bars = vec![
            make_bar(date(2024, 6, 19), dec!(1.0)),
            make_bar(date(2024, 6, 20), dec!(1.0)),
        ];
        let engine = engine_with(
            vec![DividendEvent::cash("600000", date(2024, 6, 20), dec!(2))],
            &bars,
        );
        let table = engine.build_factor_table("600000", AdjustmentMode::Backward);
        assert!(table.points.is_empty());
        assert_eq!(
            table.gaps,
            vec![DataGap::DegenerateEvent {
                ex_date: date(2024, 6, 20)
            }]
        );
    }

    #[test]
    fn adjusted_price_uses_table() {
        let bars = vec![make_bar(date(2024, 6, 19), dec!(20.0))];
        let engine = engine_with(vec![bonus_event(date(2024, 6, 20))], &bars);
        let price = engine
            .adjusted_price(dec!(20), date(2024, 6, 19), "600000", AdjustmentMode::Backward)
            .unwrap();
        assert_eq!(price, dec!(15));
        assert!(engine
            .adjusted_price(Decimal::ZERO, date(2024, 6, 19), "600000", AdjustmentMode::Backward)
            .is_err());
    }

    #[test]
    fn mark_coverage_rejects_inverted_range() {
        let mut engine = PriceAdjustmentEngine::new();
        assert!(engine
            .mark_coverage("600000", date(2024, 2, 1), date(2024, 1, 1))
            .is_err());
    }
}
