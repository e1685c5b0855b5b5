//! Scheduler support
//!
//! Pieces shared by the batch entrypoints an external scheduler invokes:
//! - `lock`: keyed job leases (at most one concurrent run per job kind)
//! - `report`: per-item outcome reporting
//! - `processor`: the due-date driven scheduled payment flush

pub mod lock;
pub mod processor;
pub mod report;

pub use lock::{JobKind, JobLease, JobLockManager, LockError};
pub use processor::ScheduledPaymentProcessor;
pub use report::{BatchReport, ItemOutcome, ItemStatus, SweepResult};
