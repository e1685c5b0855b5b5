//! Posting: one atomic unit of commission settlement
//!
//! A `Posting` accumulates everything a distribution wants to do (wallet
//! credits, ledger transactions, store mutations) without touching shared
//! state, then applies it in one pass:
//!
//! ```text
//! 1. credit each wallet and record its ledger transaction
//! 2. commit the StoreBatch (validated in full, then applied)
//! 3. on any failure: debit every applied credit and append a Reversal
//!    entry for every recorded transaction
//! ```
//!
//! # Critical Invariants
//!
//! - **Pairing**: every wallet credit is staged together with its
//!   CommissionRecord via [`Posting::pay`], so one never lands without the other
//! - **All-or-nothing**: store mutations are applied only after every credit
//!   succeeded; a store rejection compensates the credits

use crate::ledger::{LedgerError, LedgerGateway, LedgerTransaction, TransactionKind};
use crate::models::{
    CommissionRecord, MemberId, RewardGrant, RoyaltyMembership, ScheduledCommission,
};
use crate::store::{CommissionStore, StageTransition, StoreBatch, StoreError};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Errors from committing a posting
#[derive(Debug, Error, PartialEq)]
pub enum SettlementError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Rollback incomplete ({failures} compensations failed) after: {cause}")]
    RollbackIncomplete {
        cause: Box<SettlementError>,
        failures: usize,
    },
}

impl SettlementError {
    pub fn is_systemic(&self) -> bool {
        match self {
            SettlementError::Ledger(e) => e.is_systemic(),
            SettlementError::Store(e) => e.is_systemic(),
            SettlementError::RollbackIncomplete { .. } => true,
        }
    }

    /// True when a scheduled row was flipped to paid by someone else first
    pub fn is_already_paid(&self) -> bool {
        matches!(self, SettlementError::Store(StoreError::AlreadyPaid(_)))
    }
}

#[derive(Debug, Clone)]
struct PendingCredit {
    member: MemberId,
    amount: i64,
    transaction: LedgerTransaction,
}

/// Summary of a committed posting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostingReceipt {
    /// Sum of wallet credits (cents)
    pub credited: i64,
    pub credits: usize,
    pub schedules: usize,
}

/// Staged settlement unit
///
/// # Example
///
/// ```rust
/// use mlm_commission_core::ledger::{InMemoryLedger, TransactionKind};
/// use mlm_commission_core::models::{CommissionKind, CommissionRecord, MemberId, TreeNode};
/// use mlm_commission_core::settlement::Posting;
/// use mlm_commission_core::store::{MemoryStore, TreeStore};
/// use chrono::Utc;
///
/// let store = MemoryStore::new();
/// let ledger = InMemoryLedger::new();
/// let root = MemberId::from("ROOT");
/// store.insert_node(TreeNode::root(root.clone(), None, Utc::now())).unwrap();
/// ledger.open_wallet(&root).unwrap();
///
/// let mut posting = Posting::new();
/// posting.pay(
///     CommissionRecord::new(root.clone(), root.clone(), CommissionKind::Royalty, 500, "gift", Utc::now()),
///     TransactionKind::RoyaltyIncome,
/// );
/// posting.add_commission(&root, 500);
///
/// let receipt = posting.commit(&store, &ledger, Utc::now()).unwrap();
/// assert_eq!(receipt.credited, 500);
/// assert_eq!(ledger.balance(&root).unwrap(), Some(500));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Posting {
    credits: Vec<PendingCredit>,
    batch: StoreBatch,
}

impl Posting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a wallet credit for `record.paid_to` together with the record
    ///
    /// Non-positive amounts are dropped.
    pub fn pay(&mut self, record: CommissionRecord, kind: TransactionKind) {
        if record.amount <= 0 {
            return;
        }
        let transaction = LedgerTransaction::completed(
            Some(record.paid_by.clone()),
            record.paid_to.clone(),
            record.amount,
            kind,
            record.description.clone(),
            record.earned_at,
        );
        self.credits.push(PendingCredit {
            member: record.paid_to.clone(),
            amount: record.amount,
            transaction,
        });
        self.batch.records.push(record);
    }

    pub fn add_commission(&mut self, member: &MemberId, amount: i64) {
        if amount > 0 {
            self.batch
                .commission_increments
                .push((member.clone(), amount));
        }
    }

    pub fn add_turnover(&mut self, member: &MemberId, amount: i64) {
        if amount > 0 {
            self.batch.turnover_increments.push((member.clone(), amount));
        }
    }

    pub fn schedule(&mut self, row: ScheduledCommission) {
        self.batch.new_schedules.push(row);
    }

    /// Flip a scheduled row to paid (conditional on it still being unpaid)
    pub fn mark_paid(&mut self, schedule: Uuid, at: DateTime<Utc>) {
        self.batch.paid_schedules.push(schedule);
        self.batch.paid_at = Some(at);
    }

    pub fn grant_reward(&mut self, grant: RewardGrant) {
        self.batch.reward_grants.push(grant);
    }

    pub fn join_club(&mut self, membership: RoyaltyMembership) {
        self.batch.memberships.push(membership);
    }

    /// Advance a trigger's stage in the same unit
    pub fn advance_trigger(&mut self, transition: StageTransition) {
        self.batch.trigger_transition = Some(transition);
    }

    /// Total staged wallet credits (cents)
    pub fn total_credited(&self) -> i64 {
        self.credits.iter().map(|c| c.amount).sum()
    }

    pub fn credit_count(&self) -> usize {
        self.credits.len()
    }

    pub fn batch(&self) -> &StoreBatch {
        &self.batch
    }

    pub fn is_empty(&self) -> bool {
        self.credits.is_empty() && self.batch.is_empty()
    }

    /// Apply the posting as one unit
    pub fn commit<S, L>(self, store: &S, ledger: &L, now: DateTime<Utc>) -> Result<PostingReceipt, SettlementError>
    where
        S: CommissionStore + ?Sized,
        L: LedgerGateway + ?Sized,
    {
        let receipt = PostingReceipt {
            credited: self.total_credited(),
            credits: self.credits.len(),
            schedules: self.batch.new_schedules.len(),
        };
        let Posting { credits, batch } = self;

        let mut applied = 0usize;
        let mut recorded = 0usize;
        let result = apply_credits(ledger, &credits, &mut applied, &mut recorded)
            .and_then(|()| store.commit(batch).map_err(SettlementError::from));

        match result {
            Ok(()) => {
                debug!(
                    credits = receipt.credits,
                    credited = receipt.credited,
                    schedules = receipt.schedules,
                    "Posting committed"
                );
                Ok(receipt)
            }
            Err(cause) => {
                warn!(error = %cause, applied, recorded, "Posting failed, rolling back");
                let failures = rollback(ledger, &credits[..applied], &credits[..recorded], now);
                if failures > 0 {
                    error!(failures, error = %cause, "Rollback incomplete");
                    return Err(SettlementError::RollbackIncomplete {
                        cause: Box::new(cause),
                        failures,
                    });
                }
                Err(cause)
            }
        }
    }
}

fn apply_credits<L: LedgerGateway + ?Sized>(
    ledger: &L,
    credits: &[PendingCredit],
    applied: &mut usize,
    recorded: &mut usize,
) -> Result<(), SettlementError> {
    for credit in credits {
        ledger.credit_wallet(&credit.member, credit.amount)?;
        *applied += 1;
        ledger.record_transaction(credit.transaction.clone())?;
        *recorded += 1;
    }
    Ok(())
}

/// Compensate applied credits; returns the number of compensations that failed
fn rollback<L: LedgerGateway + ?Sized>(
    ledger: &L,
    applied: &[PendingCredit],
    recorded: &[PendingCredit],
    now: DateTime<Utc>,
) -> usize {
    let mut failures = 0;

    for credit in applied.iter().rev() {
        match ledger.debit_wallet(&credit.member, credit.amount) {
            Ok(true) => {}
            Ok(false) => {
                warn!(member = %credit.member, amount = credit.amount, "Rollback debit refused: balance too low");
                failures += 1;
            }
            Err(e) => {
                warn!(member = %credit.member, amount = credit.amount, error = %e, "Rollback debit failed");
                failures += 1;
            }
        }
    }

    for credit in recorded.iter().rev() {
        if let Err(e) = ledger.record_transaction(credit.transaction.reversal(now)) {
            warn!(transaction = %credit.transaction.id, error = %e, "Reversal entry failed");
            failures += 1;
        }
    }

    failures
}
