//! Ledger Gateway
//!
//! The wallet/transaction ledger is an external collaborator. The engine only
//! issues credit, debit and record-creation calls against it through
//! [`LedgerGateway`].
//!
//! # Critical Invariants
//!
//! 1. **Exact amounts**: every amount is i64 cents, never floating point
//! 2. **Append-only history**: transactions are never edited; a rollback
//!    appends a `Reversal` entry instead
//! 3. **Atomic balance mutation**: each credit/debit is one read-modify-write

pub mod memory;

use crate::models::MemberId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{InMemoryLedger, LedgerSnapshot};

/// Errors raised by a ledger gateway
#[derive(Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("Wallet not found for {0}")]
    WalletNotFound(MemberId),

    #[error("Wallet already exists for {0}")]
    WalletExists(MemberId),

    #[error("Ledger amounts must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Errors that mean the ledger itself cannot be used
    pub fn is_systemic(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Ledger transaction category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    DirectIncome,
    LevelIncome,
    RewardIncome,
    RoyaltyIncome,
    ScheduledPayout,
    Reversal,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransactionKind::DirectIncome => "direct_income",
            TransactionKind::LevelIncome => "level_income",
            TransactionKind::RewardIncome => "reward_income",
            TransactionKind::RoyaltyIncome => "royalty_income",
            TransactionKind::ScheduledPayout => "scheduled_payout",
            TransactionKind::Reversal => "reversal",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Reversed,
}

/// A ledger transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    /// Member whose activity funded the credit (None for system credits)
    pub sender: Option<MemberId>,
    pub receiver: MemberId,
    /// Amount (cents)
    pub amount: i64,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub remarks: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// A completed transaction
    pub fn completed(
        sender: Option<MemberId>,
        receiver: MemberId,
        amount: i64,
        kind: TransactionKind,
        remarks: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            amount,
            kind,
            status: TransactionStatus::Completed,
            remarks: remarks.into(),
            created_at,
        }
    }

    /// The compensating entry for `self`
    pub fn reversal(&self, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: Some(self.receiver.clone()),
            receiver: self.receiver.clone(),
            amount: self.amount,
            kind: TransactionKind::Reversal,
            status: TransactionStatus::Reversed,
            remarks: format!("Reversal of {} ({})", self.id, self.kind),
            created_at,
        }
    }
}

/// Wallet balance mutation and transaction-record creation
pub trait LedgerGateway: Send + Sync {
    /// Add `amount` to the member's wallet
    fn credit_wallet(&self, member: &MemberId, amount: i64) -> Result<(), LedgerError>;

    /// Remove `amount` from the member's wallet
    ///
    /// Returns `Ok(false)` without changing anything when the balance is too low.
    fn debit_wallet(&self, member: &MemberId, amount: i64) -> Result<bool, LedgerError>;

    fn record_transaction(&self, transaction: LedgerTransaction) -> Result<(), LedgerError>;

    fn wallet_exists(&self, member: &MemberId) -> Result<bool, LedgerError>;
}
