//! Level income
//!
//! Walks strictly upward through the structural-parent chain (never
//! `referral_by`) paying `level_bps` of the purchase per rung, closest
//! ancestor first, for up to `levels_above` rungs.
//!
//! Shares that found no recipient are lumped into one credit to the root:
//!
//! ```text
//! lump = amount * level_bps * (unreached_above + unreached_below)
//! ```
//!
//! `unreached_below` depends on [`DownlineRemainder`]: `Fixed` always counts
//! every below-level, `Measured` only the levels missing under the node.

use crate::config::{DownlineRemainder, EngineConfig};
use crate::core::money::{apply_bps, apply_bps_times};
use crate::distribution::{ancestors, DistributionError};
use crate::ledger::TransactionKind;
use crate::models::{CommissionKind, CommissionRecord, TreeNode};
use crate::settlement::Posting;
use crate::store::TreeStore;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LevelIncomeDistributor {
    level_bps: u32,
    levels_above: u32,
    levels_below: u32,
    remainder: DownlineRemainder,
    step_limit: usize,
}

impl LevelIncomeDistributor {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            level_bps: config.level_bps,
            levels_above: config.levels_above,
            levels_below: config.levels_below,
            remainder: config.downline_remainder,
            step_limit: config.traversal_step_limit,
        }
    }

    /// Stage the level income for a purchase by `node`
    pub fn prepare<S: TreeStore + ?Sized>(
        &self,
        store: &S,
        node: &TreeNode,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<Posting, DistributionError> {
        let mut posting = Posting::new();
        let share = apply_bps(amount, self.level_bps);

        let limit = (self.levels_above as usize).min(self.step_limit);
        let chain = ancestors(store, node, limit)?;
        for (index, ancestor) in chain.iter().enumerate() {
            let rung = index + 1;
            posting.pay(
                CommissionRecord::new(
                    node.member().clone(),
                    ancestor.member().clone(),
                    CommissionKind::Level,
                    share,
                    format!("Level {} income from {}", rung, node.member()),
                    at,
                ),
                TransactionKind::LevelIncome,
            );
            posting.add_commission(ancestor.member(), share);
        }

        let unreached_above = self.levels_above.saturating_sub(chain.len() as u32);
        let unreached_below = match self.remainder {
            DownlineRemainder::Fixed => {
                debug!(
                    member = %node.member(),
                    levels_below = self.levels_below,
                    "Routing every below-level share to the root"
                );
                self.levels_below
            }
            DownlineRemainder::Measured => {
                let depth = self.downline_depth(store, node)?;
                self.levels_below.saturating_sub(depth)
            }
        };

        let unreached = unreached_above + unreached_below;
        let lump = apply_bps_times(amount, self.level_bps, unreached);
        if let Some(root) = store.root()? {
            if lump > 0 {
                posting.pay(
                    CommissionRecord::new(
                        node.member().clone(),
                        root.member().clone(),
                        CommissionKind::Level,
                        lump,
                        format!("Unreached level income ({} levels) from {}", unreached, node.member()),
                        at,
                    ),
                    TransactionKind::LevelIncome,
                );
                posting.add_commission(root.member(), lump);
            }
        }

        debug!(
            member = %node.member(),
            amount,
            share,
            rungs = chain.len(),
            unreached,
            lump,
            "Level income staged"
        );
        Ok(posting)
    }

    /// Number of populated levels below `node`, capped at `levels_below`
    fn downline_depth<S: TreeStore + ?Sized>(
        &self,
        store: &S,
        node: &TreeNode,
    ) -> Result<u32, DistributionError> {
        let mut frontier = vec![node.member().clone()];
        let mut depth = 0u32;
        let mut visited = 0usize;

        while depth < self.levels_below && !frontier.is_empty() {
            let mut next = Vec::new();
            for member in &frontier {
                if visited >= self.step_limit {
                    return Ok(depth);
                }
                visited += 1;
                next.extend(
                    store
                        .children_of(member)?
                        .into_iter()
                        .map(|child| child.member().clone()),
                );
            }
            if next.is_empty() {
                break;
            }
            depth += 1;
            frontier = next;
        }

        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::models::MemberId;
    use crate::placement::TreePlacementEngine;
    use crate::store::MemoryStore;

    fn chain_store(depth: usize) -> (MemoryStore, InMemoryLedger) {
        let store = MemoryStore::new();
        let ledger = InMemoryLedger::new();
        let mut parent: Option<TreeNode> = None;
        for i in 0..=depth {
            let member = MemberId::new(format!("L{i}"));
            let node = match &parent {
                None => TreeNode::root(member.clone(), None, Utc::now()),
                Some(p) => TreeNode::child_of(member.clone(), p, 1, None, Utc::now()),
            };
            store.insert_node(node.clone()).unwrap();
            ledger.open_wallet(&member).unwrap();
            parent = Some(node);
        }
        (store, ledger)
    }

    #[test]
    fn test_measured_remainder_excludes_existing_downline() {
        let (store, _) = chain_store(4);
        let config = EngineConfig {
            downline_remainder: DownlineRemainder::Measured,
            ..Default::default()
        };
        let distributor = LevelIncomeDistributor::from_config(&config);
        // L1 has 3 populated levels below it and 1 ancestor above
        let l1 = store.node(&MemberId::from("L1")).unwrap().unwrap();

        let posting = distributor.prepare(&store, &l1, 1_000_000, Utc::now()).unwrap();

        // 1 rung paid (1_500) plus lump for 19 above + 7 below
        assert_eq!(posting.total_credited(), 1_500 + 1_500 * 26);
    }

    #[test]
    fn test_fixed_remainder_ignores_downline() {
        let (store, _) = chain_store(4);
        let distributor = LevelIncomeDistributor::from_config(&EngineConfig::default());
        let l1 = store.node(&MemberId::from("L1")).unwrap().unwrap();

        let posting = distributor.prepare(&store, &l1, 1_000_000, Utc::now()).unwrap();

        assert_eq!(posting.total_credited(), 1_500 + 1_500 * 29);
    }

    #[test]
    fn test_walk_uses_parent_not_referral() {
        let store = MemoryStore::new();
        let placement = TreePlacementEngine::new(100);
        placement.insert(&store, MemberId::from("R"), None, Utc::now()).unwrap();
        placement
            .insert(&store, MemberId::from("A"), Some(MemberId::from("R")), Utc::now())
            .unwrap();
        let b = placement
            .insert(&store, MemberId::from("B"), Some(MemberId::from("A")), Utc::now())
            .unwrap();
        let distributor = LevelIncomeDistributor::from_config(&EngineConfig::default());

        let posting = distributor.prepare(&store, &b, 1_000_000, Utc::now()).unwrap();

        let paid_to: Vec<_> = posting.batch().records.iter().map(|r| r.paid_to.to_string()).collect();
        // Rung 1 is the structural parent R, then the root lump (also R)
        assert_eq!(paid_to, vec!["R", "R"]);
    }
}
