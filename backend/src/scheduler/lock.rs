//! Job locks
//!
//! Keyed advisory leases, one key per [`JobKind`]. Acquiring a held,
//! unexpired lease fails fast with `None` so an overlapping invocation of the
//! same job exits without doing anything. Different job kinds never contend.
//!
//! # Lease lifecycle
//!
//! ```text
//! try_acquire ──▶ JobLease ──renew()──▶ JobLease ──drop──▶ released
//!                    │
//!                    └── not renewed within ttl ──▶ expired (may be taken over)
//! ```
//!
//! A lease that has been taken over reports `LockError::Lost` on `renew`, and
//! its drop leaves the new holder's lease untouched.

use crate::core::time::Clock;
use crate::models::ScheduleKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Independently lockable batch jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "job", content = "source", rename_all = "snake_case")]
pub enum JobKind {
    DirectIncome,
    LevelIncome,
    LifetimeReward,
    Royalty,
    WorkingIds,
    ScheduledFlush(ScheduleKind),
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::DirectIncome => f.write_str("direct_income"),
            JobKind::LevelIncome => f.write_str("level_income"),
            JobKind::LifetimeReward => f.write_str("lifetime_reward"),
            JobKind::Royalty => f.write_str("royalty"),
            JobKind::WorkingIds => f.write_str("working_ids"),
            JobKind::ScheduledFlush(kind) => write!(f, "scheduled_flush:{}", kind),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum LockError {
    #[error("Lock table poisoned")]
    Poisoned,

    #[error("Lease on {0} was lost (expired and taken over)")]
    Lost(JobKind),
}

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

/// Table of job leases
pub struct JobLockManager {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<JobKind, Lease>>,
}

impl fmt::Debug for JobLockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobLockManager")
            .field("ttl", &self.ttl)
            .field("leases", &self.leases)
            .finish()
    }
}

impl JobLockManager {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Take the lease for `job`, or `Ok(None)` if someone else holds it
    ///
    /// # Example
    ///
    /// ```rust
    /// use mlm_commission_core::core::time::SystemClock;
    /// use mlm_commission_core::scheduler::{JobKind, JobLockManager};
    /// use chrono::Duration;
    /// use std::sync::Arc;
    ///
    /// let locks = JobLockManager::new(Duration::minutes(15), Arc::new(SystemClock));
    ///
    /// let lease = locks.try_acquire(JobKind::Royalty).unwrap().unwrap();
    /// assert!(locks.try_acquire(JobKind::Royalty).unwrap().is_none());
    /// assert!(locks.try_acquire(JobKind::LevelIncome).unwrap().is_some());
    ///
    /// drop(lease);
    /// assert!(locks.try_acquire(JobKind::Royalty).unwrap().is_some());
    /// ```
    pub fn try_acquire(&self, job: JobKind) -> Result<Option<JobLease<'_>>, LockError> {
        let now = self.clock.now();
        let mut leases = self.lock()?;

        if let Some(existing) = leases.get(&job) {
            if existing.expires_at > now {
                debug!(job = %job, "Job lock held, skipping");
                return Ok(None);
            }
            warn!(job = %job, expired_at = %existing.expires_at, "Taking over expired job lock");
        }

        let token = Uuid::new_v4();
        leases.insert(
            job,
            Lease {
                token,
                expires_at: now + self.ttl,
            },
        );
        debug!(job = %job, "Job lock acquired");

        Ok(Some(JobLease {
            manager: self,
            job,
            token,
        }))
    }

    /// True when `job` has an unexpired lease
    pub fn is_held(&self, job: JobKind) -> Result<bool, LockError> {
        let now = self.clock.now();
        Ok(self
            .lock()?
            .get(&job)
            .is_some_and(|lease| lease.expires_at > now))
    }

    fn renew(&self, job: JobKind, token: Uuid) -> Result<(), LockError> {
        let now = self.clock.now();
        let mut leases = self.lock()?;
        match leases.get_mut(&job) {
            Some(lease) if lease.token == token => {
                lease.expires_at = now + self.ttl;
                Ok(())
            }
            _ => Err(LockError::Lost(job)),
        }
    }

    fn release(&self, job: JobKind, token: Uuid) {
        let Ok(mut leases) = self.leases.lock() else {
            return;
        };
        if leases.get(&job).is_some_and(|lease| lease.token == token) {
            leases.remove(&job);
            debug!(job = %job, "Job lock released");
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<JobKind, Lease>>, LockError> {
        self.leases.lock().map_err(|_| LockError::Poisoned)
    }
}

/// Held lease; released on drop
#[derive(Debug)]
pub struct JobLease<'a> {
    manager: &'a JobLockManager,
    job: JobKind,
    token: Uuid,
}

impl JobLease<'_> {
    pub fn job(&self) -> JobKind {
        self.job
    }

    /// Heartbeat: push the expiry out by another ttl
    pub fn renew(&self) -> Result<(), LockError> {
        self.manager.renew(self.job, self.token)
    }
}

impl Drop for JobLease<'_> {
    fn drop(&mut self) {
        self.manager.release(self.job, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::FixedClock;
    use chrono::TimeZone;

    fn manager() -> (Arc<FixedClock>, JobLockManager) {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let locks = JobLockManager::new(Duration::minutes(10), clock.clone());
        (clock, locks)
    }

    #[test]
    fn test_flush_kinds_lock_independently() {
        let (_, locks) = manager();
        let _direct = locks
            .try_acquire(JobKind::ScheduledFlush(ScheduleKind::DirectMonthly))
            .unwrap()
            .unwrap();
        assert!(locks
            .try_acquire(JobKind::ScheduledFlush(ScheduleKind::RewardInstallment))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_expired_lease_can_be_taken_over() {
        let (clock, locks) = manager();
        let stale = locks.try_acquire(JobKind::Royalty).unwrap().unwrap();

        clock.advance(Duration::minutes(11));
        let fresh = locks.try_acquire(JobKind::Royalty).unwrap().unwrap();

        assert_eq!(stale.renew(), Err(LockError::Lost(JobKind::Royalty)));
        drop(stale);
        // The stale guard must not release the new holder's lease
        assert!(locks.is_held(JobKind::Royalty).unwrap());
        assert!(fresh.renew().is_ok());
    }

    #[test]
    fn test_renew_extends_expiry() {
        let (clock, locks) = manager();
        let lease = locks.try_acquire(JobKind::LevelIncome).unwrap().unwrap();

        clock.advance(Duration::minutes(8));
        lease.renew().unwrap();
        clock.advance(Duration::minutes(8));

        assert!(locks.try_acquire(JobKind::LevelIncome).unwrap().is_none());
    }

    #[test]
    fn test_job_kind_display() {
        assert_eq!(
            JobKind::ScheduledFlush(ScheduleKind::RewardInstallment).to_string(),
            "scheduled_flush:reward_installment"
        );
    }
}
