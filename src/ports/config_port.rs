//! Configuration access port trait.

use crate::domain::error::LedgerError;
use rust_decimal::Decimal;
use std::str::FromStr;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// Keys present in `section`, sorted. Empty when the section is absent.
    fn section_keys(&self, section: &str) -> Vec<String>;

    /// Decimal value or `default` when the key is absent. A present but
    /// unparseable value is an error rather than a silent default.
    fn get_decimal(
        &self,
        section: &str,
        key: &str,
        default: Decimal,
    ) -> Result<Decimal, LedgerError> {
        match self.get_string(section, key) {
            None => Ok(default),
            Some(raw) => Decimal::from_str(raw.trim()).map_err(|e| LedgerError::ConfigInvalid {
                section: section.to_string(),
                key: key.to_string(),
                reason: format!("{raw:?} is not a decimal: {e}"),
            }),
        }
    }
}
