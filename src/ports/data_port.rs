//! Market data port trait.

use crate::domain::bar::Bar;
use crate::domain::corporate_action::DividendEvent;
use crate::domain::error::LedgerError;
use chrono::NaiveDate;

pub trait DataPort {
    /// Raw bars for `symbol` with timestamps on dates in `[start_date, end_date]`.
    fn fetch_bars(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<Bar>, LedgerError>;

    /// Every known corporate action for `symbol`.
    fn fetch_dividend_events(&self, symbol: &str) -> Result<Vec<DividendEvent>, LedgerError>;
}
