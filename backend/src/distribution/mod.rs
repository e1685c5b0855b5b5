//! Commission distribution
//!
//! Each distributor reads the tree through a [`TreeStore`] and produces a
//! [`Posting`](crate::settlement::Posting) describing one atomic unit. The
//! caller decides when to commit it and attaches any trigger stage transition
//! to the same unit.
//!
//! - `direct`: instant share to the referrer, monthly share scheduled to the parent
//! - `level`: per-rung share up the structural chain, remainder to the root
//! - `reward`: combinatorial turnover thresholds across a parent's children
//! - `royalty`: club tiers from direct-referral and two-level downline counts
//!
//! Traversals are iterative and bounded by the configured step limit.

pub mod direct;
pub mod level;
pub mod reward;
pub mod royalty;

use crate::models::{MemberId, TreeNode};
use crate::settlement::SettlementError;
use crate::store::{StoreError, TreeStore};
use thiserror::Error;

pub use direct::DirectCommissionDistributor;
pub use level::LevelIncomeDistributor;
pub use reward::LifetimeRewardEvaluator;
pub use royalty::{DownlineCounts, RoyaltyClubEvaluator};

#[derive(Debug, Error, PartialEq)]
pub enum DistributionError {
    /// The member has no seat in the tree yet
    #[error("Member {0} is not enrolled in the tree")]
    NotEnrolled(MemberId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),
}

impl DistributionError {
    pub fn is_systemic(&self) -> bool {
        match self {
            DistributionError::NotEnrolled(_) => false,
            DistributionError::Store(e) => e.is_systemic(),
            DistributionError::Settlement(e) => e.is_systemic(),
        }
    }
}

/// Structural ancestors of `node`, closest first, at most `limit` of them
pub fn ancestors<S: TreeStore + ?Sized>(
    store: &S,
    node: &TreeNode,
    limit: usize,
) -> Result<Vec<TreeNode>, StoreError> {
    let mut chain = Vec::new();
    let mut current = node.parent().cloned();

    while let Some(parent_id) = current {
        if chain.len() >= limit {
            break;
        }
        match store.node(&parent_id)? {
            Some(parent) => {
                current = parent.parent().cloned();
                chain.push(parent);
            }
            None => break,
        }
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::placement::TreePlacementEngine;
    use crate::store::MemoryStore;
    use chrono::Utc;

    #[test]
    fn test_ancestors_closest_first_and_bounded() {
        let store = MemoryStore::new();
        let engine = TreePlacementEngine::new(1_000);
        // 1 + 5 + 25 fills two levels; the 32nd member sits at depth 3
        for i in 0..32 {
            engine
                .insert(&store, MemberId::new(format!("M{i}")), None, Utc::now())
                .unwrap();
        }
        let deep = store.node(&MemberId::from("M31")).unwrap().unwrap();
        assert_eq!(deep.level(), 3);

        let chain = ancestors(&store, &deep, 10).unwrap();
        let levels: Vec<u32> = chain.iter().map(TreeNode::level).collect();
        assert_eq!(levels, vec![2, 1, 0]);

        assert_eq!(ancestors(&store, &deep, 2).unwrap().len(), 2);
    }
}
