//! Domain models for the commission engine

pub mod award;
pub mod node;
pub mod record;
pub mod schedule;
pub mod trigger;

// Re-exports
pub use award::{ClubType, RewardGrant, RoyaltyMembership};
pub use node::{MemberId, TreeNode, MAX_CHILDREN};
pub use record::{CommissionKind, CommissionRecord, RecordLog};
pub use schedule::{ScheduleKind, ScheduleSource, ScheduledCommission};
pub use trigger::{TriggerError, TriggerEvent, TriggerStage};
