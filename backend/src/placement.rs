//! Tree placement
//!
//! Seats a new member at the next open slot of the 5-ary tree.
//!
//! # Algorithm
//!
//! ```text
//! empty tree            → root (parent = None, position = 1, level = 0)
//! otherwise BFS from root:
//!   visited has < 5 children → seat at smallest unused position
//!   else                     → enqueue children by ascending position
//! ```
//!
//! The referral source only stamps `referral_by`. The structural parent is
//! chosen purely by tree shape (nearest-root-first, leftmost open slot).
//!
//! # Critical Invariants
//!
//! 1. **Bounded traversal**: at most `step_limit` nodes are visited per attempt
//! 2. **Check-and-insert**: the store re-validates the slot on insert; a lost
//!    race re-runs the BFS up to `max_attempts` times

use crate::models::{MemberId, TreeNode, MAX_CHILDREN};
use crate::store::{StoreError, TreeStore};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Placement attempts before giving up on a contended slot
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Error, PartialEq)]
pub enum PlacementError {
    #[error("Member {0} is already placed")]
    AlreadyPlaced(MemberId),

    #[error("Member {0} cannot refer themselves")]
    SelfReferral(MemberId),

    #[error("No open slot found after visiting {visited} nodes")]
    NoCapacity { visited: usize },

    #[error("Placement of {member} lost the slot race {attempts} times")]
    Contended { member: MemberId, attempts: u32 },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl PlacementError {
    pub fn is_systemic(&self) -> bool {
        matches!(self, PlacementError::Store(e) if e.is_systemic())
    }
}

/// Finds the next open slot and inserts new members
#[derive(Debug, Clone)]
pub struct TreePlacementEngine {
    step_limit: usize,
    max_attempts: u32,
}

impl TreePlacementEngine {
    pub fn new(step_limit: usize) -> Self {
        Self {
            step_limit,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Seat `new_member` in the tree
    ///
    /// # Example
    ///
    /// ```rust
    /// use mlm_commission_core::models::MemberId;
    /// use mlm_commission_core::placement::TreePlacementEngine;
    /// use mlm_commission_core::store::MemoryStore;
    /// use chrono::Utc;
    ///
    /// let store = MemoryStore::new();
    /// let engine = TreePlacementEngine::new(1_000);
    ///
    /// let root = engine.insert(&store, MemberId::from("ROOT"), None, Utc::now()).unwrap();
    /// let a = engine
    ///     .insert(&store, MemberId::from("A"), Some(MemberId::from("ROOT")), Utc::now())
    ///     .unwrap();
    ///
    /// assert!(root.is_root());
    /// assert_eq!(a.parent(), Some(root.member()));
    /// assert_eq!(a.position(), 1);
    /// ```
    pub fn insert<S: TreeStore + ?Sized>(
        &self,
        store: &S,
        new_member: MemberId,
        referral_by: Option<MemberId>,
        joined_at: DateTime<Utc>,
    ) -> Result<TreeNode, PlacementError> {
        if referral_by.as_ref() == Some(&new_member) {
            return Err(PlacementError::SelfReferral(new_member));
        }
        if store.node(&new_member)?.is_some() {
            return Err(PlacementError::AlreadyPlaced(new_member));
        }

        for attempt in 1..=self.max_attempts {
            let node = match store.root()? {
                None => TreeNode::root(new_member.clone(), referral_by.clone(), joined_at),
                Some(root) => {
                    let (parent, position) = self.find_open_slot(store, root)?;
                    TreeNode::child_of(
                        new_member.clone(),
                        &parent,
                        position,
                        referral_by.clone(),
                        joined_at,
                    )
                }
            };

            match store.insert_node(node.clone()) {
                Ok(()) => {
                    info!(
                        member = %new_member,
                        parent = ?node.parent().map(MemberId::as_str),
                        position = node.position(),
                        level = node.level(),
                        "Member placed"
                    );
                    return Ok(node);
                }
                Err(StoreError::DuplicateMember(member)) => {
                    return Err(PlacementError::AlreadyPlaced(member));
                }
                Err(
                    StoreError::RootExists
                    | StoreError::ParentFull(_)
                    | StoreError::PositionUnavailable { .. },
                ) => {
                    debug!(member = %new_member, attempt, "Slot taken concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(member = %new_member, attempts = self.max_attempts, "Placement gave up");
        Err(PlacementError::Contended {
            member: new_member,
            attempts: self.max_attempts,
        })
    }

    /// Breadth-first search for the first node with a free position
    fn find_open_slot<S: TreeStore + ?Sized>(
        &self,
        store: &S,
        root: TreeNode,
    ) -> Result<(TreeNode, u8), PlacementError> {
        let mut queue = VecDeque::from([root]);
        let mut visited = 0usize;

        while let Some(candidate) = queue.pop_front() {
            if visited >= self.step_limit {
                break;
            }
            visited += 1;

            let children = store.children_of(candidate.member())?;
            if children.len() < MAX_CHILDREN {
                let taken: Vec<u8> = children.iter().map(TreeNode::position).collect();
                if let Some(position) = (1..=MAX_CHILDREN as u8).find(|p| !taken.contains(p)) {
                    return Ok((candidate, position));
                }
            }
            queue.extend(children);
        }

        Err(PlacementError::NoCapacity { visited })
    }
}
