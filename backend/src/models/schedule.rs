//! Scheduled (deferred) commissions
//!
//! A `ScheduledCommission` is a date-keyed credit waiting for the payment
//! flush. Rows are created in batches (monthly direct income, reward
//! installments), flipped to paid exactly once, and never deleted.

use crate::models::node::MemberId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What created a scheduled row
///
/// Each source is flushed under its own job lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSource {
    /// Deferred part of direct income, paid to the structural parent
    DirectMonthly,

    /// Installment of a lifetime reward grant
    RewardInstallment { tier: String },
}

impl ScheduleSource {
    /// Lock/partition key ignoring the tier
    pub fn kind(&self) -> ScheduleKind {
        match self {
            ScheduleSource::DirectMonthly => ScheduleKind::DirectMonthly,
            ScheduleSource::RewardInstallment { .. } => ScheduleKind::RewardInstallment,
        }
    }
}

/// Flush partition of scheduled rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    DirectMonthly,
    RewardInstallment,
}

impl ScheduleKind {
    pub const ALL: [ScheduleKind; 2] = [ScheduleKind::DirectMonthly, ScheduleKind::RewardInstallment];
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleKind::DirectMonthly => f.write_str("direct_monthly"),
            ScheduleKind::RewardInstallment => f.write_str("reward_installment"),
        }
    }
}

/// A deferred commission awaiting its due date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledCommission {
    id: Uuid,
    beneficiary: MemberId,
    funded_by: MemberId,
    amount: i64,
    scheduled_date: NaiveDate,
    source: ScheduleSource,
    /// 1-based index within the batch that created this row
    installment: u32,
    is_paid: bool,
    paid_at: Option<DateTime<Utc>>,
}

impl ScheduledCommission {
    pub fn new(
        beneficiary: MemberId,
        funded_by: MemberId,
        amount: i64,
        scheduled_date: NaiveDate,
        source: ScheduleSource,
        installment: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            beneficiary,
            funded_by,
            amount,
            scheduled_date,
            source,
            installment,
            is_paid: false,
            paid_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn beneficiary(&self) -> &MemberId {
        &self.beneficiary
    }

    pub fn funded_by(&self) -> &MemberId {
        &self.funded_by
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn scheduled_date(&self) -> NaiveDate {
        self.scheduled_date
    }

    pub fn source(&self) -> &ScheduleSource {
        &self.source
    }

    pub fn installment(&self) -> u32 {
        self.installment
    }

    pub fn is_paid(&self) -> bool {
        self.is_paid
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    /// True when this row should be paid by a flush for `as_of`
    pub fn is_due_on(&self, as_of: NaiveDate) -> bool {
        !self.is_paid && self.scheduled_date == as_of
    }

    pub(crate) fn mark_paid(&mut self, at: DateTime<Utc>) {
        self.is_paid = true;
        self.paid_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_is_date_equality_not_range() {
        let row = ScheduledCommission::new(
            MemberId::from("P"),
            MemberId::from("C"),
            1_500,
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            ScheduleSource::DirectMonthly,
            1,
        );

        assert!(row.is_due_on(NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()));
        assert!(!row.is_due_on(NaiveDate::from_ymd_opt(2024, 5, 11).unwrap()));
        assert!(!row.is_due_on(NaiveDate::from_ymd_opt(2024, 5, 9).unwrap()));
    }

    #[test]
    fn test_paid_row_is_never_due() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let mut row = ScheduledCommission::new(
            MemberId::from("P"),
            MemberId::from("C"),
            1_500,
            date,
            ScheduleSource::RewardInstallment { tier: "T1".to_string() },
            3,
        );
        row.mark_paid(Utc::now());

        assert!(!row.is_due_on(date));
        assert_eq!(row.source().kind(), ScheduleKind::RewardInstallment);
    }
}
