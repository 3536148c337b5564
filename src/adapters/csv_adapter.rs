//! CSV file adapters: bars and corporate actions (the [`DataPort`]), trade
//! and mark readers for replays, and the adjusted-bar writer.
//!
//! Data directory layout:
//!
//! ```text
//! <base>/bars/<symbol>.csv    timestamp,exchange,interval,open,high,low,close,volume,turnover
//! <base>/events/<symbol>.csv  ex_date,cash_dividend_per_share,bonus_share_ratio,rights_issue_ratio,rights_issue_price
//! ```

use crate::domain::adjustment::AdjustedSeries;
use crate::domain::bar::{Bar, Interval};
use crate::domain::corporate_action::DividendEvent;
use crate::domain::error::LedgerError;
use crate::domain::trade::{Direction, Offset, Trade};
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn bars_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join("bars").join(format!("{symbol}.csv"))
    }

    fn events_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join("events").join(format!("{symbol}.csv"))
    }
}

fn data_err(reason: impl Into<String>) -> LedgerError {
    LedgerError::Data {
        reason: reason.into(),
    }
}

fn read_file(path: &Path) -> Result<String, LedgerError> {
    fs::read_to_string(path)
        .map_err(|e| data_err(format!("failed to read {}: {}", path.display(), e)))
}

fn field<'a>(
    record: &'a csv::StringRecord,
    idx: usize,
    name: &str,
) -> Result<&'a str, LedgerError> {
    record
        .get(idx)
        .map(str::trim)
        .ok_or_else(|| data_err(format!("missing {name} column")))
}

fn decimal_field(
    record: &csv::StringRecord,
    idx: usize,
    name: &str,
) -> Result<Decimal, LedgerError> {
    let raw = field(record, idx, name)?;
    Decimal::from_str(raw).map_err(|e| data_err(format!("invalid {name} value {raw:?}: {e}")))
}

fn parse_date(raw: &str) -> Result<NaiveDate, LedgerError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| data_err(format!("invalid date {raw:?}: {e}")))
}

/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` or a bare date
/// (taken as midnight).
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, LedgerError> {
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(ts);
        }
    }
    parse_date(raw)
        .map(|d| d.and_time(NaiveTime::MIN))
        .map_err(|_| data_err(format!("invalid timestamp {raw:?}")))
}

fn records(content: &str) -> impl Iterator<Item = Result<csv::StringRecord, LedgerError>> + '_ {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes())
        .into_records()
        .map(|r| r.map_err(|e| data_err(format!("CSV parse error: {e}"))))
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, LedgerError> {
        let content = read_file(&self.bars_path(symbol))?;
        let mut bars = Vec::new();

        for record in records(&content) {
            let record = record?;
            let timestamp = parse_timestamp(field(&record, 0, "timestamp")?)?;
            if timestamp.date() < start_date || timestamp.date() > end_date {
                continue;
            }
            let interval_raw = field(&record, 2, "interval")?;
            let interval = Interval::parse(interval_raw)
                .ok_or_else(|| data_err(format!("invalid interval {interval_raw:?}")))?;

            bars.push(Bar {
                symbol: symbol.to_string(),
                exchange: field(&record, 1, "exchange")?.to_string(),
                interval,
                timestamp,
                open: decimal_field(&record, 3, "open")?,
                high: decimal_field(&record, 4, "high")?,
                low: decimal_field(&record, 5, "low")?,
                close: decimal_field(&record, 6, "close")?,
                volume: decimal_field(&record, 7, "volume")?,
                turnover: decimal_field(&record, 8, "turnover")?,
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    /// A symbol without an events file has no known corporate actions.
    fn fetch_dividend_events(&self, symbol: &str) -> Result<Vec<DividendEvent>, LedgerError> {
        let path = self.events_path(symbol);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = read_file(&path)?;
        let mut events = Vec::new();

        for record in records(&content) {
            let record = record?;
            events.push(DividendEvent {
                symbol: symbol.to_string(),
                ex_date: parse_date(field(&record, 0, "ex_date")?)?,
                cash_dividend_per_share: decimal_field(&record, 1, "cash_dividend_per_share")?,
                bonus_share_ratio: decimal_field(&record, 2, "bonus_share_ratio")?,
                rights_issue_ratio: decimal_field(&record, 3, "rights_issue_ratio")?,
                rights_issue_price: decimal_field(&record, 4, "rights_issue_price")?,
            });
        }

        events.sort_by_key(|e| e.ex_date);
        Ok(events)
    }
}

/// One row of a trades file.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountTrade {
    pub account_id: String,
    pub trade: Trade,
}

/// Read `account,symbol,exchange,timestamp,direction,offset,price,volume`
/// rows, in file order.
pub fn read_trades(path: &Path) -> Result<Vec<AccountTrade>, LedgerError> {
    let content = read_file(path)?;
    let mut trades = Vec::new();

    for (line, record) in records(&content).enumerate() {
        let record = record?;
        let direction_raw = field(&record, 4, "direction")?;
        let direction = Direction::parse(direction_raw)
            .ok_or_else(|| {
                data_err(format!("row {}: invalid direction {direction_raw:?}", line + 1))
            })?;
        let offset_raw = field(&record, 5, "offset")?;
        let offset = Offset::parse(offset_raw)
            .ok_or_else(|| data_err(format!("row {}: invalid offset {offset_raw:?}", line + 1)))?;
        let volume_raw = field(&record, 7, "volume")?;
        let volume: i64 = volume_raw
            .parse()
            .map_err(|e| {
                data_err(format!("row {}: invalid volume {volume_raw:?}: {e}", line + 1))
            })?;

        trades.push(AccountTrade {
            account_id: field(&record, 0, "account")?.to_string(),
            trade: Trade {
                symbol: field(&record, 1, "symbol")?.to_string(),
                exchange: field(&record, 2, "exchange")?.to_string(),
                timestamp: parse_timestamp(field(&record, 3, "timestamp")?)?,
                direction,
                offset,
                price: decimal_field(&record, 6, "price")?,
                volume,
            },
        });
    }

    Ok(trades)
}

/// Marks grouped by instant, each mapping symbol to price.
pub type MarkSchedule = BTreeMap<NaiveDateTime, HashMap<String, Decimal>>;

/// Read `timestamp,symbol,price` rows grouped by timestamp.
pub fn read_marks(path: &Path) -> Result<MarkSchedule, LedgerError> {
    let content = read_file(path)?;
    let mut marks = MarkSchedule::new();

    for record in records(&content) {
        let record = record?;
        let timestamp = parse_timestamp(field(&record, 0, "timestamp")?)?;
        let symbol = field(&record, 1, "symbol")?.to_string();
        let price = decimal_field(&record, 2, "price")?;
        marks.entry(timestamp).or_default().insert(symbol, price);
    }

    Ok(marks)
}

/// Write an adjusted series as CSV, one row per bar.
pub fn write_adjusted_bars<W: Write>(
    writer: W,
    series: &AdjustedSeries,
) -> Result<(), LedgerError> {
    let mut wtr = csv::Writer::from_writer(writer);
    let to_data_err = |e: csv::Error| data_err(format!("CSV write error: {e}"));

    wtr.write_record([
        "symbol", "exchange", "interval", "timestamp", "open", "high", "low", "close", "volume",
        "turnover", "mode", "incomplete",
    ])
    .map_err(to_data_err)?;

    for bar in &series.bars {
        wtr.write_record([
            bar.symbol.clone(),
            bar.exchange.clone(),
            bar.interval.as_str().to_string(),
            bar.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
            bar.turnover.to_string(),
            series.mode.as_str().to_string(),
            series.incomplete.to_string(),
        ])
        .map_err(to_data_err)?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::adjustment::AdjustmentMode;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        fs::create_dir_all(path.join("bars")).unwrap();
        fs::create_dir_all(path.join("events")).unwrap();

        let bars = "timestamp,exchange,interval,open,high,low,close,volume,turnover\n\
            2024-06-18,SSE,d,19.8,20.2,19.6,20.0,1000,20000\n\
            2024-06-20,SSE,d,15.0,15.3,14.9,15.1,1300,19630\n\
            2024-06-19,SSE,d,20.0,20.1,19.9,20.0,900,18000\n";
        fs::write(path.join("bars").join("600000.csv"), bars).unwrap();

        let events = "ex_date,cash_dividend_per_share,bonus_share_ratio,rights_issue_ratio,rights_issue_price\n\
            2024-06-20,0.5,0.3,0,0\n";
        fs::write(path.join("events").join("600000.csv"), events).unwrap();

        (dir, path)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fetch_bars_returns_sorted_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let bars = adapter
            .fetch_bars("600000", date(2024, 6, 1), date(2024, 6, 30))
            .unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].date(), date(2024, 6, 18));
        assert_eq!(bars[1].date(), date(2024, 6, 19));
        assert_eq!(bars[0].close, dec!(20.0));
        assert_eq!(bars[0].exchange, "SSE");
        assert_eq!(bars[0].interval, Interval::Daily);
        assert_eq!(bars[2].volume, dec!(1300));
    }

    #[test]
    fn fetch_bars_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let bars = adapter
            .fetch_bars("600000", date(2024, 6, 19), date(2024, 6, 19))
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date(), date(2024, 6, 19));
    }

    #[test]
    fn fetch_bars_errors_for_missing_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let err = adapter
            .fetch_bars("XYZ", date(2024, 1, 1), date(2024, 12, 31))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Data { .. }));
    }

    #[test]
    fn fetch_events_parses_rows() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let events = adapter.fetch_dividend_events("600000").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].ex_date, date(2024, 6, 20));
        assert_eq!(events[0].cash_dividend_per_share, dec!(0.5));
        assert_eq!(events[0].bonus_share_ratio, dec!(0.3));
    }

    #[test]
    fn fetch_events_empty_without_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        assert!(adapter.fetch_dividend_events("000001").unwrap().is_empty());
    }

    #[test]
    fn invalid_price_is_data_error() {
        let (_dir, path) = setup_test_data();
        fs::write(
            path.join("bars").join("BAD.csv"),
            "timestamp,exchange,interval,open,high,low,close,volume,turnover\n\
             2024-06-18,SSE,d,abc,1,1,1,1,1\n",
        )
        .unwrap();
        let adapter = CsvAdapter::new(path);
        let err = adapter
            .fetch_bars("BAD", date(2024, 1, 1), date(2024, 12, 31))
            .unwrap_err();
        assert!(err.to_string().contains("invalid open value"));
    }

    #[test]
    fn read_trades_parses_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.csv");
        fs::write(
            &path,
            "account,symbol,exchange,timestamp,direction,offset,price,volume\n\
             main,600000,SSE,2024-06-18 10:00:00,buy,open,10.0,1000\n\
             main,600000,SSE,2024-06-19T14:30:00,SELL,close,10.5,400\n",
        )
        .unwrap();

        let trades = read_trades(&path).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].account_id, "main");
        assert_eq!(trades[0].trade.direction, Direction::Buy);
        assert_eq!(trades[1].trade.offset, Offset::Close);
        assert_eq!(trades[1].trade.price, dec!(10.5));
        assert_eq!(trades[1].trade.volume, 400);
    }

    #[test]
    fn read_trades_rejects_bad_direction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.csv");
        fs::write(
            &path,
            "account,symbol,exchange,timestamp,direction,offset,price,volume\n\
             main,600000,SSE,2024-06-18,hold,open,10.0,1000\n",
        )
        .unwrap();
        let err = read_trades(&path).unwrap_err();
        assert!(err.to_string().contains("invalid direction"));
    }

    #[test]
    fn read_marks_groups_by_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marks.csv");
        fs::write(
            &path,
            "timestamp,symbol,price\n\
             2024-06-18 15:00:00,600000,10.2\n\
             2024-06-18 15:00:00,600519,1500\n\
             2024-06-19 15:00:00,600000,10.4\n",
        )
        .unwrap();

        let marks = read_marks(&path).unwrap();
        assert_eq!(marks.len(), 2);
        let first = marks.values().next().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first["600519"], dec!(1500));
    }

    #[test]
    fn write_adjusted_bars_emits_header_and_rows() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let bars = adapter
            .fetch_bars("600000", date(2024, 6, 1), date(2024, 6, 30))
            .unwrap();
        let series = AdjustedSeries {
            symbol: "600000".into(),
            mode: AdjustmentMode::Backward,
            bars,
            incomplete: true,
            gaps: Vec::new(),
        };

        let mut out = Vec::new();
        write_adjusted_bars(&mut out, &series).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("symbol,exchange,interval,timestamp"));
        assert!(lines[1].starts_with("600000,SSE,d,2024-06-18 00:00:00,19.8"));
        assert!(lines[1].ends_with("backward,true"));
    }
}
