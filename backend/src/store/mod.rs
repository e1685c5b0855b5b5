//! Store Module
//!
//! Persisted state behind the engine:
//! - `TreeStore`: the referral tree (node lookup, child sets, parent and
//!   referral relations, atomic node mutation)
//! - `CommissionStore`: the commission tables (scheduled rows, audit records,
//!   reward grants, royalty memberships, trigger events) plus one atomic
//!   `commit` for a whole [`StoreBatch`]
//!
//! # Critical Invariants
//!
//! 1. **Single root**: exactly one node has no parent
//! 2. **Bounded fan-out**: a parent has at most 5 children, positions unique in 1..=5
//! 3. **Depth**: `level == parent.level + 1`
//! 4. **Atomic batches**: a batch is validated in full before any part is applied
//! 5. **Uniqueness**: one reward grant per (parent, tier), one membership per
//!    (member, club), one paid flip per scheduled row

pub mod arena;
pub mod memory;

use crate::models::{
    ClubType, CommissionRecord, MemberId, RecordLog, RewardGrant, RoyaltyMembership,
    ScheduleKind, ScheduledCommission, TreeNode, TriggerError, TriggerEvent, TriggerStage,
};
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use arena::TreeArena;
pub use memory::{MemoryStore, StoreSnapshot};

/// Errors raised by stores
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("Member {0} is already placed")]
    DuplicateMember(MemberId),

    #[error("Tree already has a root")]
    RootExists,

    #[error("Parent {0} not found")]
    ParentNotFound(MemberId),

    #[error("Position {position} under {parent} is out of range or taken")]
    PositionUnavailable { parent: MemberId, position: u8 },

    #[error("Parent {0} already has the maximum number of children")]
    ParentFull(MemberId),

    #[error("Level mismatch for {member}: expected {expected}, got {actual}")]
    LevelMismatch {
        member: MemberId,
        expected: u32,
        actual: u32,
    },

    #[error("Member {0} not found")]
    MemberNotFound(MemberId),

    #[error("Scheduled commission {0} not found")]
    ScheduleNotFound(Uuid),

    #[error("Scheduled commission {0} is already paid")]
    AlreadyPaid(Uuid),

    #[error("Reward tier {tier} already granted to {parent}")]
    DuplicateReward { parent: MemberId, tier: String },

    #[error("Royalty club {club} membership already exists for {member}")]
    DuplicateMembership { member: MemberId, club: ClubType },

    #[error("Trigger {0} not found")]
    TriggerNotFound(Uuid),

    #[error("Trigger {0} already exists")]
    DuplicateTrigger(Uuid),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Errors that mean the store itself cannot be used (abort the batch)
    pub fn is_systemic(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Compare-and-set move of a trigger to its next stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTransition {
    pub trigger: Uuid,
    pub from: TriggerStage,
    pub to: TriggerStage,
}

/// Store-side mutations of one atomic unit
///
/// Built by a [`Posting`](crate::settlement::Posting) and applied with
/// [`CommissionStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct StoreBatch {
    /// `commission_earned` increments (member, cents)
    pub commission_increments: Vec<(MemberId, i64)>,

    /// `turnover` increments (member, cents)
    pub turnover_increments: Vec<(MemberId, i64)>,

    pub records: Vec<CommissionRecord>,

    pub new_schedules: Vec<ScheduledCommission>,

    /// Scheduled rows to flip to paid; each must still be unpaid
    pub paid_schedules: Vec<Uuid>,

    /// Timestamp written to `paid_at` for `paid_schedules`
    pub paid_at: Option<DateTime<Utc>>,

    pub reward_grants: Vec<RewardGrant>,

    pub memberships: Vec<RoyaltyMembership>,

    pub trigger_transition: Option<StageTransition>,
}

impl StoreBatch {
    pub fn is_empty(&self) -> bool {
        self.commission_increments.is_empty()
            && self.turnover_increments.is_empty()
            && self.records.is_empty()
            && self.new_schedules.is_empty()
            && self.paid_schedules.is_empty()
            && self.reward_grants.is_empty()
            && self.memberships.is_empty()
            && self.trigger_transition.is_none()
    }
}

/// The referral tree
///
/// Reads return owned snapshots; mutations are atomic read-modify-writes.
pub trait TreeStore: Send + Sync {
    /// Node for a member
    fn node(&self, member: &MemberId) -> Result<Option<TreeNode>, StoreError>;

    /// The single parentless node
    fn root(&self) -> Result<Option<TreeNode>, StoreError>;

    /// Children of `parent`, ascending by position
    fn children_of(&self, parent: &MemberId) -> Result<Vec<TreeNode>, StoreError>;

    /// Structural parent of `member`
    fn parent_of(&self, member: &MemberId) -> Result<Option<TreeNode>, StoreError>;

    /// Members whose `referral_by` is `member`, sorted
    fn referrals_of(&self, member: &MemberId) -> Result<Vec<MemberId>, StoreError>;

    /// Nodes root first, in breadth-first order (siblings by position),
    /// visiting at most `step_limit` of them
    fn nodes_breadth_first(&self, step_limit: usize) -> Result<Vec<TreeNode>, StoreError>;

    fn node_count(&self) -> Result<usize, StoreError>;

    /// Insert a node, enforcing the tree invariants atomically
    fn insert_node(&self, node: TreeNode) -> Result<(), StoreError>;

    /// Set the working flag; returns true if it was newly set
    fn mark_working(&self, member: &MemberId) -> Result<bool, StoreError>;
}

/// Commission tables on top of the tree
pub trait CommissionStore: TreeStore {
    /// Unpaid rows of `kind` whose scheduled date equals `as_of`
    fn scheduled_due(
        &self,
        as_of: NaiveDate,
        kind: ScheduleKind,
    ) -> Result<Vec<ScheduledCommission>, StoreError>;

    /// Every scheduled row in creation order
    fn scheduled(&self) -> Result<Vec<ScheduledCommission>, StoreError>;

    /// Copy of the audit log
    fn records(&self) -> Result<RecordLog, StoreError>;

    fn reward_granted(&self, parent: &MemberId, tier: &str) -> Result<bool, StoreError>;

    fn reward_grants(&self) -> Result<Vec<RewardGrant>, StoreError>;

    fn has_membership(&self, member: &MemberId, club: ClubType) -> Result<bool, StoreError>;

    fn memberships(&self) -> Result<Vec<RoyaltyMembership>, StoreError>;

    fn insert_trigger(&self, trigger: TriggerEvent) -> Result<(), StoreError>;

    fn trigger(&self, id: Uuid) -> Result<Option<TriggerEvent>, StoreError>;

    /// Triggers currently at `stage`, in submission order
    fn triggers_at(&self, stage: TriggerStage) -> Result<Vec<TriggerEvent>, StoreError>;

    /// Apply a stage transition on its own (used for external write-backs)
    fn advance_trigger(&self, transition: StageTransition) -> Result<(), StoreError>;

    /// Validate and apply a batch as one unit
    fn commit(&self, batch: StoreBatch) -> Result<(), StoreError>;
}
