//! Scheduled payment processor
//!
//! Drains matured scheduled commissions into the ledger. A flush for date `D`
//! selects unpaid rows whose `scheduled_date == D` (equality, not `<=`).
//!
//! Per row, in one posting:
//! 1. credit the beneficiary's wallet (missing wallet → skip, keep going)
//! 2. write the CommissionRecord and ledger transaction
//! 3. flip `is_paid` (conditional: a row paid concurrently is a skip)
//!
//! Direct-monthly payouts also increment the beneficiary's
//! `commission_earned`; reward installments were counted at grant time.

use crate::core::time::Clock;
use crate::ledger::{LedgerGateway, TransactionKind};
use crate::models::{CommissionKind, CommissionRecord, ScheduleKind, ScheduleSource, ScheduledCommission};
use crate::orchestrator::EngineError;
use crate::scheduler::lock::{JobKind, JobLockManager};
use crate::scheduler::report::BatchReport;
use crate::settlement::{Posting, SettlementError};
use crate::store::CommissionStore;
use chrono::NaiveDate;
use tracing::{info, warn};

pub struct ScheduledPaymentProcessor<'a, S: ?Sized, L: ?Sized> {
    store: &'a S,
    ledger: &'a L,
    locks: &'a JobLockManager,
    clock: &'a dyn Clock,
}

impl<'a, S, L> ScheduledPaymentProcessor<'a, S, L>
where
    S: CommissionStore + ?Sized,
    L: LedgerGateway + ?Sized,
{
    pub fn new(store: &'a S, ledger: &'a L, locks: &'a JobLockManager, clock: &'a dyn Clock) -> Self {
        Self {
            store,
            ledger,
            locks,
            clock,
        }
    }

    /// Pay every `kind` row due on `as_of`, under that kind's job lock
    pub fn run_due(&self, as_of: NaiveDate, kind: ScheduleKind) -> Result<BatchReport, EngineError> {
        let job = JobKind::ScheduledFlush(kind);
        let Some(lease) = self.locks.try_acquire(job)? else {
            info!(job = %job, as_of = %as_of, "Flush already running, skipping");
            return Ok(BatchReport::lock_held(job));
        };

        let mut report = BatchReport::new(job);
        for row in self.store.scheduled_due(as_of, kind)? {
            lease.renew()?;
            match self.pay(&row) {
                Ok(true) => report.processed(row.id()),
                Ok(false) => {
                    warn!(
                        schedule = %row.id(),
                        beneficiary = %row.beneficiary(),
                        "Beneficiary wallet missing, skipping row"
                    );
                    report.skipped(row.id(), "beneficiary wallet missing");
                }
                Err(e) if e.is_already_paid() => report.skipped(row.id(), "already paid"),
                Err(e) if e.is_systemic() => return Err(e.into()),
                Err(e) => {
                    warn!(schedule = %row.id(), error = %e, "Scheduled payment failed");
                    report.failed(row.id(), e.to_string());
                }
            }
        }

        info!(
            job = %job,
            as_of = %as_of,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Scheduled flush complete"
        );
        Ok(report)
    }

    /// Pay one row; `Ok(false)` when the beneficiary has no wallet
    fn pay(&self, row: &ScheduledCommission) -> Result<bool, SettlementError> {
        if !self.ledger.wallet_exists(row.beneficiary())? {
            return Ok(false);
        }

        let now = self.clock.now();
        let (kind, transaction_kind, description) = match row.source() {
            ScheduleSource::DirectMonthly => (
                CommissionKind::DirectMonthly,
                TransactionKind::ScheduledPayout,
                format!(
                    "Monthly direct income {} from {}",
                    row.installment(),
                    row.funded_by()
                ),
            ),
            ScheduleSource::RewardInstallment { tier } => (
                CommissionKind::Reward,
                TransactionKind::RewardIncome,
                format!("Reward {} installment {}", tier, row.installment()),
            ),
        };

        let mut posting = Posting::new();
        posting.pay(
            CommissionRecord::new(
                row.funded_by().clone(),
                row.beneficiary().clone(),
                kind,
                row.amount(),
                description,
                now,
            ),
            transaction_kind,
        );
        if kind == CommissionKind::DirectMonthly && self.store.node(row.beneficiary())?.is_some() {
            posting.add_commission(row.beneficiary(), row.amount());
        }
        posting.mark_paid(row.id(), now);
        posting.commit(self.store, self.ledger, now)?;
        Ok(true)
    }
}
