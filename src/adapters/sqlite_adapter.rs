//! SQLite data adapter.
//!
//! Prices, ratios and volumes are stored as TEXT so decimals round-trip
//! exactly.

use crate::domain::bar::{Bar, Interval};
use crate::domain::config_validation::sqlite_pool_size;
use crate::domain::corporate_action::DividendEvent;
use crate::domain::error::LedgerError;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;
use chrono::{NaiveDate, NaiveDateTime};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use rust_decimal::Decimal;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Database {
        reason: e.to_string(),
    }
}

fn conversion_err(
    raw: &str,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(raw.len(), rusqlite::types::Type::Text, Box::new(e))
}

fn decimal_column(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_err(&raw, e))
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, LedgerError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| LedgerError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = sqlite_pool_size(config)?;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, LedgerError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), LedgerError> {
        let conn = self.pool.get().map_err(db_err)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bars (
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                interval TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                turnover TEXT NOT NULL,
                PRIMARY KEY (symbol, interval, timestamp)
            );
            CREATE TABLE IF NOT EXISTS dividend_events (
                symbol TEXT NOT NULL,
                ex_date TEXT NOT NULL,
                cash_dividend_per_share TEXT NOT NULL,
                bonus_share_ratio TEXT NOT NULL,
                rights_issue_ratio TEXT NOT NULL,
                rights_issue_price TEXT NOT NULL,
                PRIMARY KEY (symbol, ex_date)
            );",
        )
        .map_err(db_err)?;

        Ok(())
    }

    pub fn insert_bars(&self, bars: &[Bar]) -> Result<(), LedgerError> {
        let mut conn = self.pool.get().map_err(db_err)?;
        let tx = conn.transaction().map_err(db_err)?;

        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO bars
                 (symbol, exchange, interval, timestamp, open, high, low, close, volume, turnover)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    bar.symbol,
                    bar.exchange,
                    bar.interval.as_str(),
                    bar.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    bar.open.to_string(),
                    bar.high.to_string(),
                    bar.low.to_string(),
                    bar.close.to_string(),
                    bar.volume.to_string(),
                    bar.turnover.to_string()
                ],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn insert_events(&self, events: &[DividendEvent]) -> Result<(), LedgerError> {
        let mut conn = self.pool.get().map_err(db_err)?;
        let tx = conn.transaction().map_err(db_err)?;

        for event in events {
            tx.execute(
                "INSERT OR REPLACE INTO dividend_events
                 (symbol, ex_date, cash_dividend_per_share, bonus_share_ratio,
                  rights_issue_ratio, rights_issue_price)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.symbol,
                    event.ex_date.format(DATE_FORMAT).to_string(),
                    event.cash_dividend_per_share.to_string(),
                    event.bonus_share_ratio.to_string(),
                    event.rights_issue_ratio.to_string(),
                    event.rights_issue_price.to_string()
                ],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(())
    }
}

impl DataPort for SqliteAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, LedgerError> {
        let conn = self.pool.get().map_err(db_err)?;

        let query = "SELECT symbol, exchange, interval, timestamp, open, high, low, close, volume, turnover
                     FROM bars
                     WHERE symbol = ?1
                     ORDER BY timestamp ASC";

        let mut stmt = conn.prepare(query).map_err(db_err)?;
        let rows = stmt
            .query_map(params![symbol], |row| {
                let interval_raw: String = row.get(2)?;
                let interval = Interval::parse(&interval_raw).ok_or_else(|| {
                    conversion_err(
                        &interval_raw,
                        std::io::Error::other(format!("unknown interval {interval_raw:?}")),
                    )
                })?;
                let ts_raw: String = row.get(3)?;
                let timestamp = NaiveDateTime::parse_from_str(&ts_raw, TIMESTAMP_FORMAT)
                    .map_err(|e| conversion_err(&ts_raw, e))?;
                Ok(Bar {
                    symbol: row.get(0)?,
                    exchange: row.get(1)?,
                    interval,
                    timestamp,
                    open: decimal_column(row, 4)?,
                    high: decimal_column(row, 5)?,
                    low: decimal_column(row, 6)?,
                    close: decimal_column(row, 7)?,
                    volume: decimal_column(row, 8)?,
                    turnover: decimal_column(row, 9)?,
                })
            })
            .map_err(db_err)?;

        let mut bars = Vec::new();
        for row in rows {
            let bar = row.map_err(db_err)?;
            if bar.date() >= start_date && bar.date() <= end_date {
                bars.push(bar);
            }
        }

        Ok(bars)
    }

    fn fetch_dividend_events(&self, symbol: &str) -> Result<Vec<DividendEvent>, LedgerError> {
        let conn = self.pool.get().map_err(db_err)?;

        let query = "SELECT symbol, ex_date, cash_dividend_per_share, bonus_share_ratio,
                            rights_issue_ratio, rights_issue_price
                     FROM dividend_events
                     WHERE symbol = ?1
                     ORDER BY ex_date ASC";

        let mut stmt = conn.prepare(query).map_err(db_err)?;
        let rows = stmt
            .query_map(params![symbol], |row| {
                let date_raw: String = row.get(1)?;
                let ex_date = NaiveDate::parse_from_str(&date_raw, DATE_FORMAT)
                    .map_err(|e| conversion_err(&date_raw, e))?;
                Ok(DividendEvent {
                    symbol: row.get(0)?,
                    ex_date,
                    cash_dividend_per_share: decimal_column(row, 2)?,
                    bonus_share_ratio: decimal_column(row, 3)?,
                    rights_issue_ratio: decimal_column(row, 4)?,
                    rights_issue_price: decimal_column(row, 5)?,
                })
            })
            .map_err(db_err)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row.map_err(db_err)?);
        }

        Ok(events)
    }
}
