//! Commission Engine
//!
//! Owns the distributors and exposes the entrypoints an external scheduler
//! (cron, the CLI) invokes:
//!
//! ```text
//! on_investment_approved(id)   place member (if needed) → direct → level
//! run_direct_income_sweep      Pending    triggers → DirectPaid
//! run_level_income_sweep       DirectPaid triggers → LevelPaid
//! run_scheduled_payment_flush  pay rows due on a date (per schedule kind)
//! run_lifetime_reward_sweep    grant reward tiers to qualifying parents
//! run_royalty_sweep            grant royalty club memberships
//! run_working_ids_sweep        flag working ids
//! mark_interest_sent(id)       LevelPaid → Complete (external write-back)
//! ```
//!
//! # Critical Invariants
//!
//! 1. **One run per job**: every sweep holds its job lease for its whole run;
//!    an overlapping invocation returns a `lock_skipped` report
//! 2. **Flag with the money**: a trigger's stage transition is committed in
//!    the same posting as the distribution it records
//! 3. **Partial failure**: per-item errors land in the report; only systemic
//!    errors (store/ledger unavailable, lock table poisoned) abort a sweep
//!
//! # Example
//!
//! ```rust
//! use mlm_commission_core::config::EngineConfig;
//! use mlm_commission_core::ledger::InMemoryLedger;
//! use mlm_commission_core::models::{MemberId, TriggerEvent, TriggerStage};
//! use mlm_commission_core::orchestrator::CommissionEngine;
//! use mlm_commission_core::store::MemoryStore;
//! use chrono::Utc;
//!
//! let engine = CommissionEngine::new(EngineConfig::default(), MemoryStore::new(), InMemoryLedger::new()).unwrap();
//! let root = MemberId::from("ROOT");
//! let alice = MemberId::from("ALICE");
//! engine.ledger().open_wallet(&root).unwrap();
//! engine.ledger().open_wallet(&alice).unwrap();
//! engine.place_member(root.clone(), None).unwrap();
//!
//! let trigger = TriggerEvent::new(alice.clone(), 1_000_000, "basic", Utc::now())
//!     .unwrap()
//!     .with_referral(root.clone());
//! let id = engine.submit_trigger(trigger).unwrap();
//! let outcome = engine.on_investment_approved(id).unwrap();
//!
//! assert!(outcome.newly_placed);
//! assert_eq!(outcome.stage, TriggerStage::LevelPaid);
//! assert_eq!(engine.ledger().balance(&root).unwrap(), Some(30_000 + 1_500 + 1_500 * 29));
//! ```

use crate::config::{ConfigError, EngineConfig};
use crate::core::time::{Clock, SystemClock};
use crate::distribution::{
    DirectCommissionDistributor, DistributionError, LevelIncomeDistributor,
    LifetimeRewardEvaluator, RoyaltyClubEvaluator,
};
use crate::ledger::{LedgerError, LedgerGateway};
use crate::models::{
    MemberId, RewardGrant, RoyaltyMembership, ScheduleKind, TreeNode, TriggerError, TriggerEvent,
    TriggerStage,
};
use crate::notify::{NoopNotifier, Notification, Notifier};
use crate::placement::{PlacementError, TreePlacementEngine};
use crate::scheduler::{
    BatchReport, JobKind, JobLockManager, LockError, ScheduledPaymentProcessor, SweepResult,
};
use crate::settlement::SettlementError;
use crate::store::{CommissionStore, StageTransition, StoreError};
use chrono::{Duration, NaiveDate};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

// ============================================================================
// Errors and outcomes
// ============================================================================

/// Engine-level errors
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Placement error: {0}")]
    Placement(#[from] PlacementError),

    #[error("Distribution error: {0}")]
    Distribution(#[from] DistributionError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Trigger {0} not found")]
    TriggerNotFound(Uuid),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),
}

/// Result of handling one approved investment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalOutcome {
    pub trigger: Uuid,
    pub member: MemberId,
    /// The member was seated by this call
    pub newly_placed: bool,
    /// Trigger stage after the call
    pub stage: TriggerStage,
}

// ============================================================================
// Engine
// ============================================================================

/// Commission engine over a store and a ledger gateway
pub struct CommissionEngine<S, L> {
    config: EngineConfig,
    store: S,
    ledger: L,
    clock: Arc<dyn Clock>,
    locks: JobLockManager,
    notifier: Arc<dyn Notifier>,

    placement: TreePlacementEngine,
    direct: DirectCommissionDistributor,
    level: LevelIncomeDistributor,
    rewards: LifetimeRewardEvaluator,
    royalty: RoyaltyClubEvaluator,
}

impl<S: CommissionStore, L: LedgerGateway> CommissionEngine<S, L> {
    /// Create an engine on the wall clock
    pub fn new(config: EngineConfig, store: S, ledger: L) -> Result<Self, EngineError> {
        Self::with_clock(config, store, ledger, Arc::new(SystemClock))
    }

    /// Create an engine on a caller-supplied clock
    pub fn with_clock(
        config: EngineConfig,
        store: S,
        ledger: L,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let ttl_secs = i64::try_from(config.lock_ttl_secs)
            .map_err(|_| ConfigError::Invalid("lock_ttl_secs out of range".to_string()))?;
        let locks = JobLockManager::new(Duration::seconds(ttl_secs), clock.clone());

        Ok(Self {
            placement: TreePlacementEngine::new(config.traversal_step_limit),
            direct: DirectCommissionDistributor::from_config(&config),
            level: LevelIncomeDistributor::from_config(&config),
            rewards: LifetimeRewardEvaluator::from_config(&config),
            royalty: RoyaltyClubEvaluator::from_config(&config),
            config,
            store,
            ledger,
            clock,
            locks,
            notifier: Arc::new(NoopNotifier),
        })
    }

    /// Builder: send grant notifications to `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn locks(&self) -> &JobLockManager {
        &self.locks
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ------------------------------------------------------------------------
    // Triggers and placement
    // ------------------------------------------------------------------------

    /// Register an approved investment
    pub fn submit_trigger(&self, trigger: TriggerEvent) -> Result<Uuid, EngineError> {
        let id = trigger.id();
        info!(
            trigger = %id,
            member = %trigger.user(),
            amount = trigger.amount(),
            investment_type = trigger.investment_type(),
            "Trigger submitted"
        );
        self.store.insert_trigger(trigger)?;
        Ok(id)
    }

    /// Seat a member directly (used to create the root)
    pub fn place_member(
        &self,
        member: MemberId,
        referral_by: Option<MemberId>,
    ) -> Result<TreeNode, EngineError> {
        Ok(self
            .placement
            .insert(&self.store, member, referral_by, self.clock.now())?)
    }

    /// Handle an "investment approved" event
    ///
    /// Seats the member if needed, then distributes direct and level income
    /// for the trigger. A distribution whose job lock is held by a running
    /// sweep is left for that sweep.
    pub fn on_investment_approved(&self, id: Uuid) -> Result<ApprovalOutcome, EngineError> {
        let trigger = self.load_trigger(id)?;
        let member = trigger.user().clone();

        let newly_placed = match self.store.node(&member)? {
            Some(_) => false,
            None => match self.placement.insert(
                &self.store,
                member.clone(),
                trigger.referral_by().cloned(),
                self.clock.now(),
            ) {
                Ok(_) => true,
                Err(PlacementError::AlreadyPlaced(_)) => false,
                Err(e) => return Err(e.into()),
            },
        };

        if trigger.stage() == TriggerStage::Pending {
            match self.locks.try_acquire(JobKind::DirectIncome)? {
                Some(_lease) => self.distribute_direct(&trigger)?,
                None => info!(trigger = %id, "Direct income sweep running, deferring"),
            }
        }

        let trigger = self.load_trigger(id)?;
        if trigger.stage() == TriggerStage::DirectPaid {
            match self.locks.try_acquire(JobKind::LevelIncome)? {
                Some(_lease) => self.distribute_level(&trigger)?,
                None => info!(trigger = %id, "Level income sweep running, deferring"),
            }
        }

        let stage = self.load_trigger(id)?.stage();
        Ok(ApprovalOutcome {
            trigger: id,
            member,
            newly_placed,
            stage,
        })
    }

    /// External write-back once interest has been handled
    pub fn mark_interest_sent(&self, id: Uuid) -> Result<(), EngineError> {
        self.store.advance_trigger(StageTransition {
            trigger: id,
            from: TriggerStage::LevelPaid,
            to: TriggerStage::Complete,
        })?;
        info!(trigger = %id, "Interest marked as sent");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Trigger sweeps
    // ------------------------------------------------------------------------

    /// Distribute direct income for every `Pending` trigger
    pub fn run_direct_income_sweep(&self) -> Result<BatchReport, EngineError> {
        self.trigger_sweep(JobKind::DirectIncome, TriggerStage::Pending, |trigger| {
            self.distribute_direct(trigger)
        })
    }

    /// Distribute level income for every `DirectPaid` trigger
    pub fn run_level_income_sweep(&self) -> Result<BatchReport, EngineError> {
        self.trigger_sweep(JobKind::LevelIncome, TriggerStage::DirectPaid, |trigger| {
            self.distribute_level(trigger)
        })
    }

    fn trigger_sweep<F>(&self, job: JobKind, stage: TriggerStage, step: F) -> Result<BatchReport, EngineError>
    where
        F: Fn(&TriggerEvent) -> Result<(), DistributionError>,
    {
        let Some(lease) = self.locks.try_acquire(job)? else {
            info!(job = %job, "Job already running, skipping");
            return Ok(BatchReport::lock_held(job));
        };

        let mut report = BatchReport::new(job);
        for trigger in self.store.triggers_at(stage)? {
            lease.renew()?;
            match step(&trigger) {
                Ok(()) => report.processed(trigger.id()),
                Err(e) if e.is_systemic() => return Err(e.into()),
                Err(DistributionError::NotEnrolled(member)) => {
                    warn!(trigger = %trigger.id(), member = %member, "Member not enrolled, leaving trigger for retry");
                    report.skipped(trigger.id(), format!("member {} not enrolled", member));
                }
                Err(e) if is_stage_conflict(&e) => {
                    report.skipped(trigger.id(), "already distributed");
                }
                Err(e) => {
                    warn!(trigger = %trigger.id(), error = %e, "Distribution failed");
                    report.failed(trigger.id(), e.to_string());
                }
            }
        }

        info!(
            job = %job,
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed,
            "Trigger sweep complete"
        );
        Ok(report)
    }

    fn distribute_direct(&self, trigger: &TriggerEvent) -> Result<(), DistributionError> {
        let node = self.enrolled(trigger)?;
        let mut posting = self
            .direct
            .prepare(&self.store, &node, trigger.amount(), trigger.approved_at())?;
        posting.advance_trigger(StageTransition {
            trigger: trigger.id(),
            from: TriggerStage::Pending,
            to: TriggerStage::DirectPaid,
        });

        let receipt = posting.commit(&self.store, &self.ledger, self.clock.now())?;
        info!(
            trigger = %trigger.id(),
            member = %node.member(),
            amount = trigger.amount(),
            credited = receipt.credited,
            schedules = receipt.schedules,
            "Direct income distributed"
        );
        Ok(())
    }

    fn distribute_level(&self, trigger: &TriggerEvent) -> Result<(), DistributionError> {
        let node = self.enrolled(trigger)?;
        let mut posting = self
            .level
            .prepare(&self.store, &node, trigger.amount(), trigger.approved_at())?;
        posting.advance_trigger(StageTransition {
            trigger: trigger.id(),
            from: TriggerStage::DirectPaid,
            to: TriggerStage::LevelPaid,
        });

        let receipt = posting.commit(&self.store, &self.ledger, self.clock.now())?;
        info!(
            trigger = %trigger.id(),
            member = %node.member(),
            amount = trigger.amount(),
            credited = receipt.credited,
            "Level income distributed"
        );
        Ok(())
    }

    fn enrolled(&self, trigger: &TriggerEvent) -> Result<TreeNode, DistributionError> {
        self.store
            .node(trigger.user())?
            .ok_or_else(|| DistributionError::NotEnrolled(trigger.user().clone()))
    }

    fn load_trigger(&self, id: Uuid) -> Result<TriggerEvent, EngineError> {
        self.store
            .trigger(id)?
            .ok_or(EngineError::TriggerNotFound(id))
    }

    // ------------------------------------------------------------------------
    // Scheduled payments
    // ------------------------------------------------------------------------

    /// Pay the `kind` rows due on `as_of`
    pub fn run_scheduled_payment_flush(
        &self,
        as_of: NaiveDate,
        kind: ScheduleKind,
    ) -> Result<BatchReport, EngineError> {
        ScheduledPaymentProcessor::new(&self.store, &self.ledger, &self.locks, self.clock.as_ref())
            .run_due(as_of, kind)
    }

    /// Flush every schedule kind for `as_of`
    pub fn run_all_scheduled_flushes(&self, as_of: NaiveDate) -> Result<Vec<BatchReport>, EngineError> {
        ScheduleKind::ALL
            .iter()
            .map(|kind| self.run_scheduled_payment_flush(as_of, *kind))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Rewards, royalty, working ids
    // ------------------------------------------------------------------------

    /// Evaluate every parent once for lifetime reward tiers
    pub fn run_lifetime_reward_sweep(&self) -> Result<SweepResult<RewardGrant>, EngineError> {
        let job = JobKind::LifetimeReward;
        let Some(lease) = self.locks.try_acquire(job)? else {
            info!(job = %job, "Job already running, skipping");
            return Ok(SweepResult::lock_held(job));
        };

        let mut result = SweepResult::new(job);
        let nodes = self.store.nodes_breadth_first(self.config.traversal_step_limit)?;
        let by_id: HashMap<&MemberId, &TreeNode> = nodes.iter().map(|n| (n.member(), n)).collect();
        let mut evaluated = HashSet::new();

        for node in &nodes {
            let Some(parent_id) = node.parent() else {
                continue;
            };
            if !evaluated.insert(parent_id) {
                continue;
            }
            let Some(parent) = by_id.get(parent_id) else {
                continue;
            };
            lease.renew()?;

            let now = self.clock.now();
            let outcome = self
                .rewards
                .evaluate_parent(&self.store, parent, now)
                .and_then(|candidate| match candidate {
                    Some((grant, posting)) => {
                        posting.commit(&self.store, &self.ledger, now)?;
                        Ok(Some(grant))
                    }
                    None => Ok(None),
                });

            match outcome {
                Ok(Some(grant)) => {
                    info!(
                        parent = %grant.parent,
                        tier = %grant.tier,
                        amount = grant.amount,
                        installments = grant.installments,
                        "Lifetime reward granted"
                    );
                    self.send(Notification::RewardGranted {
                        member: grant.parent.clone(),
                        tier: grant.tier.clone(),
                        amount: grant.amount,
                        installments: grant.installments,
                    });
                    result.report.processed(&grant.parent);
                    result.granted.push(grant);
                }
                Ok(None) => {}
                Err(e) if e.is_systemic() => return Err(e.into()),
                Err(DistributionError::Settlement(SettlementError::Store(StoreError::DuplicateReward {
                    parent,
                    tier,
                }))) => {
                    result.report.skipped(&parent, format!("tier {} already granted", tier));
                }
                Err(e) => {
                    warn!(parent = %parent_id, error = %e, "Reward evaluation failed");
                    result.report.failed(parent_id, e.to_string());
                }
            }
        }

        info!(
            job = %job,
            granted = result.granted.len(),
            failed = result.report.failed,
            "Lifetime reward sweep complete"
        );
        Ok(result)
    }

    /// Evaluate every node against every active royalty tier
    pub fn run_royalty_sweep(&self) -> Result<SweepResult<RoyaltyMembership>, EngineError> {
        let job = JobKind::Royalty;
        let Some(lease) = self.locks.try_acquire(job)? else {
            info!(job = %job, "Job already running, skipping");
            return Ok(SweepResult::lock_held(job));
        };

        let mut result = SweepResult::new(job);
        let nodes = self.store.nodes_breadth_first(self.config.traversal_step_limit)?;

        for tier in self.royalty.tiers() {
            for node in &nodes {
                lease.renew()?;
                let item = format!("{}:{}", node.member(), tier.club);
                if self.store.has_membership(node.member(), tier.club)? {
                    result.report.skipped(item, "already a member");
                    continue;
                }

                let now = self.clock.now();
                let outcome = self
                    .royalty
                    .evaluate_member(&self.store, node, tier, now)
                    .and_then(|candidate| match candidate {
                        Some((membership, posting)) => {
                            posting.commit(&self.store, &self.ledger, now)?;
                            Ok(Some(membership))
                        }
                        None => Ok(None),
                    });

                match outcome {
                    Ok(Some(membership)) => {
                        info!(
                            member = %membership.member,
                            club = %membership.club,
                            gift = tier.gift_amount,
                            "Royalty club joined"
                        );
                        self.send(Notification::RoyaltyJoined {
                            member: membership.member.clone(),
                            club: membership.club,
                            gift: tier.gift_amount,
                        });
                        result.report.processed(item);
                        result.granted.push(membership);
                    }
                    Ok(None) => {}
                    Err(e) if e.is_systemic() => return Err(e.into()),
                    Err(DistributionError::Settlement(SettlementError::Store(
                        StoreError::DuplicateMembership { .. },
                    ))) => {
                        result.report.skipped(item, "already a member");
                    }
                    Err(e) => {
                        warn!(member = %node.member(), club = %tier.club, error = %e, "Royalty evaluation failed");
                        result.report.failed(item, e.to_string());
                    }
                }
            }
        }

        info!(
            job = %job,
            granted = result.granted.len(),
            skipped = result.report.skipped,
            failed = result.report.failed,
            "Royalty sweep complete"
        );
        Ok(result)
    }

    /// Flag members meeting the working-id thresholds
    pub fn run_working_ids_sweep(&self) -> Result<SweepResult<MemberId>, EngineError> {
        let job = JobKind::WorkingIds;
        let Some(lease) = self.locks.try_acquire(job)? else {
            info!(job = %job, "Job already running, skipping");
            return Ok(SweepResult::lock_held(job));
        };

        let mut result = SweepResult::new(job);
        for node in self.store.nodes_breadth_first(self.config.traversal_step_limit)? {
            lease.renew()?;
            let outcome = self
                .royalty
                .qualifies_working(&self.store, &node)
                .and_then(|qualifies| {
                    if qualifies {
                        Ok(self.store.mark_working(node.member())?)
                    } else {
                        Ok(false)
                    }
                });

            match outcome {
                Ok(true) => {
                    info!(member = %node.member(), "Member flagged as working");
                    result.report.processed(node.member());
                    result.granted.push(node.member().clone());
                }
                Ok(false) => {}
                Err(e) if e.is_systemic() => return Err(e.into()),
                Err(e) => {
                    warn!(member = %node.member(), error = %e, "Working id check failed");
                    result.report.failed(node.member(), e.to_string());
                }
            }
        }

        info!(job = %job, flagged = result.granted.len(), "Working ids sweep complete");
        Ok(result)
    }

    fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification) {
            warn!(member = %notification.member(), error = %e, "Notification failed");
        }
    }
}

/// The trigger was advanced by someone else between read and commit
fn is_stage_conflict(error: &DistributionError) -> bool {
    matches!(
        error,
        DistributionError::Settlement(SettlementError::Store(StoreError::Trigger(
            TriggerError::InvalidTransition { .. }
        )))
    )
}
