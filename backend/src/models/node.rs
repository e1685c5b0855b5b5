//! Tree node model
//!
//! Represents one member's seat in the 5-ary commission tree.
//! Each node carries two independent relations:
//! - `parent`: structural parent chosen by placement (tree shape only)
//! - `referral_by`: whose referral code was used (may differ from `parent`)
//!
//! Level income walks `parent`; direct income and royalty counts read
//! `referral_by`. The two must never be conflated.
//!
//! CRITICAL: All money values are i64 (cents)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum children per parent
pub const MAX_CHILDREN: usize = 5;

/// Stable member identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A member's seat in the tree
///
/// # Example
/// ```
/// use mlm_commission_core::models::{MemberId, TreeNode};
/// use chrono::Utc;
///
/// let root = TreeNode::root(MemberId::from("ROOT"), None, Utc::now());
/// assert!(root.is_root());
/// assert_eq!(root.level(), 0);
/// assert_eq!(root.position(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// The member occupying this seat
    child: MemberId,

    /// Structural parent (None only for the root)
    parent: Option<MemberId>,

    /// Slot among siblings, 1..=5
    position: u8,

    /// Depth from the root (root = 0)
    level: u32,

    /// Referral source stamped at placement
    referral_by: Option<MemberId>,

    /// Cumulative turnover of this node and its subtree (cents, non-decreasing)
    turnover: i64,

    /// Cumulative commission paid to this member through any path (cents)
    commission_earned: i64,

    /// Set once by the working-ids sweep, never cleared
    is_working: bool,

    /// When the member was placed
    joined_at: DateTime<Utc>,
}

impl TreeNode {
    /// Create the root seat
    pub fn root(member: MemberId, referral_by: Option<MemberId>, joined_at: DateTime<Utc>) -> Self {
        Self {
            child: member,
            parent: None,
            position: 1,
            level: 0,
            referral_by,
            turnover: 0,
            commission_earned: 0,
            is_working: false,
            joined_at,
        }
    }

    /// Create a seat under `parent`
    ///
    /// Position bounds are enforced by the store on insert, not here.
    pub fn child_of(
        member: MemberId,
        parent: &TreeNode,
        position: u8,
        referral_by: Option<MemberId>,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            child: member,
            parent: Some(parent.child.clone()),
            position,
            level: parent.level + 1,
            referral_by,
            turnover: 0,
            commission_earned: 0,
            is_working: false,
            joined_at,
        }
    }

    pub fn member(&self) -> &MemberId {
        &self.child
    }

    pub fn parent(&self) -> Option<&MemberId> {
        self.parent.as_ref()
    }

    pub fn position(&self) -> u8 {
        self.position
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn referral_by(&self) -> Option<&MemberId> {
        self.referral_by.as_ref()
    }

    pub fn turnover(&self) -> i64 {
        self.turnover
    }

    pub fn commission_earned(&self) -> i64 {
        self.commission_earned
    }

    pub fn is_working(&self) -> bool {
        self.is_working
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Add to cumulative turnover; negative deltas are ignored (monotonic)
    pub(crate) fn add_turnover(&mut self, delta: i64) {
        if delta > 0 {
            self.turnover = self.turnover.saturating_add(delta);
        }
    }

    /// Add to cumulative commission; negative deltas are ignored (monotonic)
    pub(crate) fn add_commission(&mut self, delta: i64) {
        if delta > 0 {
            self.commission_earned = self.commission_earned.saturating_add(delta);
        }
    }

    pub(crate) fn mark_working(&mut self) {
        self.is_working = true;
    }
}
