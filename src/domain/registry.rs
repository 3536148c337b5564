//! Owned registry of named accounts.
//!
//! Each account sits behind its own mutex so trades for one account are
//! serialized while different accounts proceed independently. The map lock
//! is only held long enough to look up or insert an account handle.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};

use super::account::{AccountLedger, AccountSnapshot, EquityPoint, TradeRecord};
use super::cost::CostBreakdown;
use super::corporate_action::DividendEvent;
use super::error::LedgerError;
use super::position::Position;
use super::trade::Trade;

pub type AccountHandle = Arc<Mutex<AccountLedger>>;

#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: RwLock<BTreeMap<String, AccountHandle>>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_account(&self, ledger: AccountLedger) -> Result<AccountHandle, LedgerError> {
        let id = ledger.id().to_string();
        let mut accounts = self.accounts.write().map_err(|_| LedgerError::LockPoisoned {
            account_id: id.clone(),
        })?;
        if accounts.contains_key(&id) {
            return Err(LedgerError::DuplicateAccount { account_id: id });
        }
        let handle = Arc::new(Mutex::new(ledger));
        accounts.insert(id.clone(), Arc::clone(&handle));
        tracing::debug!(account = %id, "account opened");
        Ok(handle)
    }

    pub fn account(&self, account_id: &str) -> Result<AccountHandle, LedgerError> {
        let accounts = self.accounts.read().map_err(|_| LedgerError::LockPoisoned {
            account_id: account_id.to_string(),
        })?;
        accounts
            .get(account_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownAccount {
                account_id: account_id.to_string(),
            })
    }

    pub fn account_ids(&self) -> Result<Vec<String>, LedgerError> {
        let accounts = self.accounts.read().map_err(|_| LedgerError::LockPoisoned {
            account_id: "*".to_string(),
        })?;
        Ok(accounts.keys().cloned().collect())
    }

    /// Run `f` with exclusive access to one account.
    pub fn with_account<F, R>(&self, account_id: &str, f: F) -> Result<R, LedgerError>
    where
        F: FnOnce(&mut AccountLedger) -> Result<R, LedgerError>,
    {
        let handle = self.account(account_id)?;
        let mut ledger = handle.lock().map_err(|_| LedgerError::LockPoisoned {
            account_id: account_id.to_string(),
        })?;
        f(&mut ledger)
    }

    pub fn apply_trade(&self, account_id: &str, trade: &Trade) -> Result<TradeRecord, LedgerError> {
        self.with_account(account_id, |ledger| ledger.apply_trade(trade))
    }

    pub fn mark_to_market(
        &self,
        account_id: &str,
        timestamp: NaiveDateTime,
        prices: &HashMap<String, Decimal>,
    ) -> Result<EquityPoint, LedgerError> {
        self.with_account(account_id, |ledger| ledger.mark_to_market(timestamp, prices))
    }

    /// Book `event` against every account. Returns the total cash credited.
    pub fn apply_corporate_action(&self, event: &DividendEvent) -> Result<Decimal, LedgerError> {
        let mut credited = Decimal::ZERO;
        for id in self.account_ids()? {
            credited += self.with_account(&id, |ledger| ledger.apply_corporate_action(event))?;
        }
        Ok(credited)
    }

    pub fn get_position(
        &self,
        account_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, LedgerError> {
        self.with_account(account_id, |ledger| Ok(ledger.get_position(symbol).cloned()))
    }

    pub fn get_account_snapshot(&self, account_id: &str) -> Result<AccountSnapshot, LedgerError> {
        self.with_account(account_id, |ledger| Ok(ledger.snapshot()))
    }

    pub fn get_equity_curve(&self, account_id: &str) -> Result<Vec<EquityPoint>, LedgerError> {
        self.with_account(account_id, |ledger| Ok(ledger.equity_curve().to_vec()))
    }

    pub fn get_cost_breakdown(
        &self,
        account_id: &str,
        trade: &Trade,
    ) -> Result<CostBreakdown, LedgerError> {
        self.with_account(account_id, |ledger| ledger.cost_breakdown(trade))
    }

    pub fn reset_halt(&self, account_id: &str) -> Result<(), LedgerError> {
        self.with_account(account_id, |ledger| {
            ledger.reset_halt();
            Ok(())
        })
    }
}
