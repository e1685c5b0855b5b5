//! In-memory ledger
//!
//! Reference [`LedgerGateway`] used by the CLI and the tests. Wallets must be
//! opened explicitly; crediting an unknown wallet is an error.

use crate::ledger::{LedgerError, LedgerGateway, LedgerTransaction};
use crate::models::MemberId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Serializable ledger contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub wallets: BTreeMap<MemberId, i64>,
    pub transactions: Vec<LedgerTransaction>,
}

/// Mutex-guarded wallet table plus append-only transaction list
///
/// # Example
///
/// ```rust
/// use mlm_commission_core::ledger::{InMemoryLedger, LedgerGateway};
/// use mlm_commission_core::models::MemberId;
///
/// let ledger = InMemoryLedger::new();
/// let alice = MemberId::from("ALICE");
/// ledger.open_wallet(&alice).unwrap();
///
/// ledger.credit_wallet(&alice, 3_000).unwrap();
/// assert!(ledger.debit_wallet(&alice, 1_000).unwrap());
/// assert!(!ledger.debit_wallet(&alice, 5_000).unwrap());
/// assert_eq!(ledger.balance(&alice).unwrap(), Some(2_000));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerSnapshot>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        Self {
            state: Mutex::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> Result<LedgerSnapshot, LedgerError> {
        Ok(self.lock()?.clone())
    }

    /// Open a zero-balance wallet
    pub fn open_wallet(&self, member: &MemberId) -> Result<(), LedgerError> {
        let mut state = self.lock()?;
        if state.wallets.contains_key(member) {
            return Err(LedgerError::WalletExists(member.clone()));
        }
        state.wallets.insert(member.clone(), 0);
        Ok(())
    }

    /// Current balance, or None when the wallet does not exist
    pub fn balance(&self, member: &MemberId) -> Result<Option<i64>, LedgerError> {
        Ok(self.lock()?.wallets.get(member).copied())
    }

    /// Sum of every wallet balance
    pub fn total_balance(&self) -> Result<i64, LedgerError> {
        Ok(self.lock()?.wallets.values().sum())
    }

    pub fn transactions(&self) -> Result<Vec<LedgerTransaction>, LedgerError> {
        Ok(self.lock()?.transactions.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerSnapshot>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }
}

impl LedgerGateway for InMemoryLedger {
    fn credit_wallet(&self, member: &MemberId, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut state = self.lock()?;
        let balance = state
            .wallets
            .get_mut(member)
            .ok_or_else(|| LedgerError::WalletNotFound(member.clone()))?;
        *balance = balance.saturating_add(amount);
        Ok(())
    }

    fn debit_wallet(&self, member: &MemberId, amount: i64) -> Result<bool, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::NonPositiveAmount(amount));
        }
        let mut state = self.lock()?;
        let balance = state
            .wallets
            .get_mut(member)
            .ok_or_else(|| LedgerError::WalletNotFound(member.clone()))?;
        if *balance < amount {
            return Ok(false);
        }
        *balance -= amount;
        Ok(true)
    }

    fn record_transaction(&self, transaction: LedgerTransaction) -> Result<(), LedgerError> {
        self.lock()?.transactions.push(transaction);
        Ok(())
    }

    fn wallet_exists(&self, member: &MemberId) -> Result<bool, LedgerError> {
        Ok(self.lock()?.wallets.contains_key(member))
    }
}
