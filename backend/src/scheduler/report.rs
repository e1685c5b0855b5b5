//! Batch reports
//!
//! Every scheduler entrypoint returns a `BatchReport`: counts plus a per-item
//! outcome list. Per-item failures are recorded here instead of failing the
//! batch.

use crate::scheduler::lock::JobKind;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Processed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    /// Trigger id, member id or schedule id
    pub item: String,
    pub status: ItemStatus,
    pub detail: Option<String>,
}

/// Outcome of one job invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub job: JobKind,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The job lock was held elsewhere; nothing was attempted
    pub lock_skipped: bool,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    pub fn new(job: JobKind) -> Self {
        Self {
            job,
            processed: 0,
            skipped: 0,
            failed: 0,
            lock_skipped: false,
            outcomes: Vec::new(),
        }
    }

    /// Report for an invocation that found its lock held
    pub fn lock_held(job: JobKind) -> Self {
        Self {
            lock_skipped: true,
            ..Self::new(job)
        }
    }

    pub fn processed(&mut self, item: impl ToString) {
        self.processed += 1;
        self.push(item, ItemStatus::Processed, None);
    }

    pub fn skipped(&mut self, item: impl ToString, reason: impl Into<String>) {
        self.skipped += 1;
        self.push(item, ItemStatus::Skipped, Some(reason.into()));
    }

    pub fn failed(&mut self, item: impl ToString, reason: impl Into<String>) {
        self.failed += 1;
        self.push(item, ItemStatus::Failed, Some(reason.into()));
    }

    pub fn total(&self) -> usize {
        self.processed + self.skipped + self.failed
    }

    fn push(&mut self, item: impl ToString, status: ItemStatus, detail: Option<String>) {
        self.outcomes.push(ItemOutcome {
            item: item.to_string(),
            status,
            detail,
        });
    }
}

/// Report plus whatever the sweep granted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepResult<T> {
    pub granted: Vec<T>,
    pub report: BatchReport,
}

impl<T> SweepResult<T> {
    pub fn new(job: JobKind) -> Self {
        Self {
            granted: Vec::new(),
            report: BatchReport::new(job),
        }
    }

    pub fn lock_held(job: JobKind) -> Self {
        Self {
            granted: Vec::new(),
            report: BatchReport::lock_held(job),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_follow_outcomes() {
        let mut report = BatchReport::new(JobKind::Royalty);
        report.processed("A");
        report.skipped("B", "already a member");
        report.failed("C", "wallet missing");

        assert_eq!(report.total(), 3);
        assert_eq!(report.outcomes[1].status, ItemStatus::Skipped);
        assert_eq!(report.outcomes[2].detail.as_deref(), Some("wallet missing"));
    }

    #[test]
    fn test_lock_held_report_is_empty() {
        let report = BatchReport::lock_held(JobKind::DirectIncome);
        assert!(report.lock_skipped);
        assert_eq!(report.total(), 0);
    }
}
