//! MLM Commission Core - Rust Engine
//!
//! Distributes one-time and recurring commissions across a capacity-bounded
//! referral tree and pays deferred commissions on schedule.
//!
//! # Architecture
//!
//! - **core**: Clock, schedule date arithmetic, fixed-point money
//! - **models**: Domain types (TreeNode, ScheduledCommission, TriggerEvent, ...)
//! - **store**: Tree and commission tables (trait + in-memory implementation)
//! - **ledger**: External wallet/transaction ledger gateway
//! - **placement**: BFS seat assignment in the 5-ary tree
//! - **distribution**: Direct, level, lifetime reward and royalty distributors
//! - **settlement**: Atomic posting of credits, records and store mutations
//! - **scheduler**: Job locks, batch reports, scheduled payment flush
//! - **orchestrator**: Scheduler entrypoints and checkpoints
//!
//! # Critical Invariants
//!
//! 1. All money values are i64 (cents); rates are integer basis points
//! 2. Every wallet credit has exactly one CommissionRecord
//! 3. At most one concurrent run per job kind

// Module declarations
pub mod config;
pub mod core;
pub mod distribution;
pub mod ledger;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod placement;
pub mod scheduler;
pub mod settlement;
pub mod store;

// Re-exports for convenience
pub use config::{ConfigError, DownlineRemainder, EngineConfig, RewardTier, RoyaltyTier, WorkingIdRule};
pub use crate::core::time::{Clock, FixedClock, SystemClock};
pub use ledger::{InMemoryLedger, LedgerError, LedgerGateway, LedgerTransaction, TransactionKind};
pub use models::{
    ClubType, CommissionKind, CommissionRecord, MemberId, RewardGrant, RoyaltyMembership,
    ScheduleKind, ScheduledCommission, TreeNode, TriggerEvent, TriggerStage,
};
pub use orchestrator::{ApprovalOutcome, CommissionEngine, EngineError, EngineSnapshot};
pub use placement::{PlacementError, TreePlacementEngine};
pub use scheduler::{BatchReport, JobKind, SweepResult};
pub use store::{CommissionStore, MemoryStore, StoreError, TreeStore};
