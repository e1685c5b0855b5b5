//! Tree arena
//!
//! Node records keyed by member identity, with two independent indexes:
//! - `children`: parent → position → child (structural relation)
//! - `referrals`: referral source → referred members (referral relation)
//!
//! Key features:
//! - BTreeMap children index gives ascending-position iteration for free
//! - Traversals are iterative with an explicit queue and a step limit, so a
//!   malformed tree can never recurse unboundedly
//! - Insert enforces every shape invariant before touching any index

use crate::models::{MemberId, TreeNode, MAX_CHILDREN};
use crate::store::StoreError;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// In-memory tree with structural and referral indexes
#[derive(Debug, Clone, Default)]
pub struct TreeArena {
    /// Member → node record
    nodes: HashMap<MemberId, TreeNode>,

    /// Parent → (position → child)
    children: HashMap<MemberId, BTreeMap<u8, MemberId>>,

    /// Referral source → referred members
    referrals: HashMap<MemberId, BTreeSet<MemberId>>,

    root: Option<MemberId>,
}

impl TreeArena {
    /// Create empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an arena from node records in any order
    ///
    /// Nodes are inserted shallowest first so every parent exists before its
    /// children; all invariants are re-checked.
    pub fn from_nodes(mut nodes: Vec<TreeNode>) -> Result<Self, StoreError> {
        nodes.sort_by(|a, b| (a.level(), a.position()).cmp(&(b.level(), b.position())));
        let mut arena = Self::new();
        for node in nodes {
            arena.insert(node)?;
        }
        Ok(arena)
    }

    /// Insert a node after validating the shape invariants
    pub fn insert(&mut self, node: TreeNode) -> Result<(), StoreError> {
        let member = node.member().clone();
        if self.nodes.contains_key(&member) {
            return Err(StoreError::DuplicateMember(member));
        }

        match node.parent() {
            None => {
                if self.root.is_some() {
                    return Err(StoreError::RootExists);
                }
                if node.level() != 0 {
                    return Err(StoreError::LevelMismatch {
                        member,
                        expected: 0,
                        actual: node.level(),
                    });
                }
                self.root = Some(member.clone());
            }
            Some(parent_id) => {
                let parent = self
                    .nodes
                    .get(parent_id)
                    .ok_or_else(|| StoreError::ParentNotFound(parent_id.clone()))?;

                let expected = parent.level() + 1;
                if node.level() != expected {
                    return Err(StoreError::LevelMismatch {
                        member,
                        expected,
                        actual: node.level(),
                    });
                }

                let siblings = self.children.get(parent_id);
                if siblings.map_or(0, BTreeMap::len) >= MAX_CHILDREN {
                    return Err(StoreError::ParentFull(parent_id.clone()));
                }
                let position = node.position();
                let in_range = (1..=MAX_CHILDREN as u8).contains(&position);
                let taken = siblings.is_some_and(|s| s.contains_key(&position));
                if !in_range || taken {
                    return Err(StoreError::PositionUnavailable {
                        parent: parent_id.clone(),
                        position,
                    });
                }

                self.children
                    .entry(parent_id.clone())
                    .or_default()
                    .insert(position, member.clone());
            }
        }

        if let Some(source) = node.referral_by() {
            self.referrals
                .entry(source.clone())
                .or_default()
                .insert(member.clone());
        }
        self.nodes.insert(member, node);
        Ok(())
    }

    pub fn get(&self, member: &MemberId) -> Option<&TreeNode> {
        self.nodes.get(member)
    }

    pub(crate) fn get_mut(&mut self, member: &MemberId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(member)
    }

    pub fn contains(&self, member: &MemberId) -> bool {
        self.nodes.contains_key(member)
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of `parent`, ascending by position
    pub fn children(&self, parent: &MemberId) -> Vec<&TreeNode> {
        self.children
            .get(parent)
            .map(|slots| slots.values().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, member: &MemberId) -> Option<&TreeNode> {
        self.nodes
            .get(member)
            .and_then(|node| node.parent())
            .and_then(|parent| self.nodes.get(parent))
    }

    /// Members referred by `member`, sorted
    pub fn referrals_of(&self, member: &MemberId) -> Vec<MemberId> {
        self.referrals
            .get(member)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All nodes in breadth-first order from the root
    ///
    /// Visits at most `step_limit` nodes.
    pub fn breadth_first(&self, step_limit: usize) -> Vec<&TreeNode> {
        let mut order = Vec::with_capacity(self.nodes.len().min(step_limit));
        let mut queue: VecDeque<&MemberId> = self.root.iter().collect();

        while let Some(id) = queue.pop_front() {
            if order.len() >= step_limit {
                break;
            }
            if let Some(node) = self.nodes.get(id) {
                order.push(node);
            }
            if let Some(slots) = self.children.get(id) {
                queue.extend(slots.values());
            }
        }

        order
    }

    /// Every node record, unordered
    pub fn nodes(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }
}
