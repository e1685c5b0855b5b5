//! Commission audit records
//!
//! Every credit the engine makes is mirrored by an append-only
//! `CommissionRecord`. Records enable:
//! - Auditing (each wallet credit has exactly one matching record)
//! - Reconciliation (sum of records per member == commission paid)
//! - Debugging (who funded what, and why)
//!
//! # Record Types
//!
//! - **Direct**: instant share paid to the referrer
//! - **DirectMonthly**: deferred direct share paid by the flush
//! - **Level**: per-rung share up the structural chain (and the root lump)
//! - **Reward**: lifetime reward installment paid by the flush
//! - **Royalty**: royalty club gift
//!
//! # Example
//!
//! ```rust
//! use mlm_commission_core::models::{CommissionKind, CommissionRecord, MemberId, RecordLog};
//! use chrono::Utc;
//!
//! let mut log = RecordLog::new();
//! log.append(CommissionRecord::new(
//!     MemberId::from("NEW"),
//!     MemberId::from("SPONSOR"),
//!     CommissionKind::Direct,
//!     30_000,
//!     "Direct income for NEW",
//!     Utc::now(),
//! ));
//!
//! assert_eq!(log.total_paid_to(&MemberId::from("SPONSOR")), 30_000);
//! ```

use crate::models::node::MemberId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Commission category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionKind {
    Direct,
    DirectMonthly,
    Level,
    Reward,
    Royalty,
}

impl fmt::Display for CommissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommissionKind::Direct => "direct",
            CommissionKind::DirectMonthly => "direct_monthly",
            CommissionKind::Level => "level",
            CommissionKind::Reward => "reward",
            CommissionKind::Royalty => "royalty",
        };
        f.write_str(name)
    }
}

/// Immutable audit entry for one credit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: Uuid,
    pub paid_by: MemberId,
    pub paid_to: MemberId,
    pub kind: CommissionKind,
    pub amount: i64,
    pub description: String,
    pub earned_at: DateTime<Utc>,
}

impl CommissionRecord {
    pub fn new(
        paid_by: MemberId,
        paid_to: MemberId,
        kind: CommissionKind,
        amount: i64,
        description: impl Into<String>,
        earned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            paid_by,
            paid_to,
            kind,
            amount,
            description: description.into(),
            earned_at,
        }
    }
}

/// Append-only collection of commission records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordLog {
    records: Vec<CommissionRecord>,
}

impl RecordLog {
    /// Create a new empty log
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    /// Append a record
    pub fn append(&mut self, record: CommissionRecord) {
        self.records.push(record);
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the log is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in append order
    pub fn records(&self) -> &[CommissionRecord] {
        &self.records
    }

    /// Records paid to a member, in append order
    pub fn paid_to<'a>(&'a self, member: &'a MemberId) -> impl Iterator<Item = &'a CommissionRecord> + 'a {
        self.records.iter().filter(move |r| &r.paid_to == member)
    }

    /// Records of one kind
    pub fn of_kind(&self, kind: CommissionKind) -> Vec<&CommissionRecord> {
        self.records.iter().filter(|r| r.kind == kind).collect()
    }

    /// Sum of all amounts paid to a member
    pub fn total_paid_to(&self, member: &MemberId) -> i64 {
        self.paid_to(member).map(|r| r.amount).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(to: &str, kind: CommissionKind, amount: i64) -> CommissionRecord {
        CommissionRecord::new(
            MemberId::from("SRC"),
            MemberId::from(to),
            kind,
            amount,
            "test",
            Utc::now(),
        )
    }

    #[test]
    fn test_record_log_basic() {
        let mut log = RecordLog::new();
        assert!(log.is_empty());

        log.append(record("A", CommissionKind::Direct, 100));
        log.append(record("A", CommissionKind::Level, 15));
        log.append(record("B", CommissionKind::Level, 15));

        assert_eq!(log.len(), 3);
        assert_eq!(log.total_paid_to(&MemberId::from("A")), 115);
        assert_eq!(log.of_kind(CommissionKind::Level).len(), 2);
    }

    #[test]
    fn test_kind_display_matches_serde() {
        let json = serde_json::to_string(&CommissionKind::DirectMonthly).unwrap();
        assert_eq!(json, format!("\"{}\"", CommissionKind::DirectMonthly));
    }
}
