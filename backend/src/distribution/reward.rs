//! Lifetime rewards
//!
//! A parent qualifies for a tier when some four of its (up to five) direct
//! children, sorted by turnover descending, satisfy
//!
//! ```text
//! turnover[i] >= threshold * leg_weights[i] / 100     for i in 0..4
//! ```
//!
//! Tiers are tried in ascending threshold order; the first tier granted ends
//! the parent's evaluation for the sweep. A granted tier is never granted
//! again to the same parent.
//!
//! A grant increments `commission_earned` immediately and schedules
//! `total_paid_month` installments `interval_days` apart; wallets are credited
//! by the scheduled flush.

use crate::config::{EngineConfig, RewardTier};
use crate::core::money::split_installments;
use crate::core::time::interval_installment_dates;
use crate::distribution::DistributionError;
use crate::models::{RewardGrant, ScheduleSource, ScheduledCommission, TreeNode};
use crate::settlement::Posting;
use crate::store::CommissionStore;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Children needed to form a qualifying leg set
pub const LEGS: usize = 4;

#[derive(Debug, Clone)]
pub struct LifetimeRewardEvaluator {
    tiers: Vec<RewardTier>,
    interval_days: u32,
}

impl LifetimeRewardEvaluator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            tiers: config.reward_tiers_by_threshold().into_iter().cloned().collect(),
            interval_days: config.reward_installment_interval_days,
        }
    }

    pub fn tiers(&self) -> &[RewardTier] {
        &self.tiers
    }

    /// Evaluate one parent; returns the grant and its posting if a tier qualifies
    pub fn evaluate_parent<S: CommissionStore + ?Sized>(
        &self,
        store: &S,
        parent: &TreeNode,
        at: DateTime<Utc>,
    ) -> Result<Option<(RewardGrant, Posting)>, DistributionError> {
        let children = store.children_of(parent.member())?;
        if children.len() < LEGS {
            return Ok(None);
        }

        for tier in &self.tiers {
            if store.reward_granted(parent.member(), &tier.id)? {
                continue;
            }
            if let Some(legs) = qualifying_legs(&children, tier) {
                debug!(parent = %parent.member(), tier = %tier.id, "Reward tier qualified");
                return Ok(Some(self.grant(parent, tier, legs, at)));
            }
        }

        Ok(None)
    }

    fn grant(
        &self,
        parent: &TreeNode,
        tier: &RewardTier,
        legs: Vec<&TreeNode>,
        at: DateTime<Utc>,
    ) -> (RewardGrant, Posting) {
        let grant = RewardGrant {
            parent: parent.member().clone(),
            tier: tier.id.clone(),
            amount: tier.reward_amount,
            installments: tier.total_paid_month,
            qualifying_children: legs.iter().map(|leg| leg.member().clone()).collect(),
            granted_at: at,
        };

        let mut posting = Posting::new();
        posting.add_commission(parent.member(), tier.reward_amount);

        let amounts = split_installments(tier.reward_amount, tier.total_paid_month);
        let dates = interval_installment_dates(at.date_naive(), tier.total_paid_month, self.interval_days);
        for (index, (amount, date)) in amounts.into_iter().zip(dates).enumerate() {
            posting.schedule(ScheduledCommission::new(
                parent.member().clone(),
                parent.member().clone(),
                amount,
                date,
                ScheduleSource::RewardInstallment {
                    tier: tier.id.clone(),
                },
                index as u32 + 1,
            ));
        }
        posting.grant_reward(grant.clone());

        (grant, posting)
    }
}

/// First 4-subset of `children` (in position order) meeting the tier's leg
/// requirements, largest turnover first
pub fn qualifying_legs<'a>(children: &'a [TreeNode], tier: &RewardTier) -> Option<Vec<&'a TreeNode>> {
    let n = children.len();
    if n < LEGS {
        return None;
    }

    let mut indices: Vec<usize> = (0..LEGS).collect();
    loop {
        let mut legs: Vec<&TreeNode> = indices.iter().map(|&i| &children[i]).collect();
        legs.sort_by(|a, b| b.turnover().cmp(&a.turnover()));
        if legs
            .iter()
            .enumerate()
            .all(|(rank, leg)| tier.leg_qualifies(rank, leg.turnover()))
        {
            return Some(legs);
        }

        // Next combination in lexicographic order
        let mut i = LEGS;
        loop {
            if i == 0 {
                return None;
            }
            i -= 1;
            if indices[i] < n - LEGS + i {
                break;
            }
        }
        indices[i] += 1;
        for j in i + 1..LEGS {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemberId;
    use crate::store::{MemoryStore, TreeStore};

    fn tier(threshold: i64) -> RewardTier {
        RewardTier {
            id: "T1".to_string(),
            name: "Bronze".to_string(),
            threshold,
            reward_amount: 1_000,
            total_paid_month: 3,
            leg_weights: [40, 30, 20, 10],
        }
    }

    fn children_with(turnovers: &[i64]) -> (MemoryStore, TreeNode) {
        let store = MemoryStore::new();
        let root = TreeNode::root(MemberId::from("P"), None, Utc::now());
        store.insert_node(root.clone()).unwrap();
        for (i, _) in turnovers.iter().enumerate() {
            store
                .insert_node(TreeNode::child_of(
                    MemberId::new(format!("C{i}")),
                    &root,
                    i as u8 + 1,
                    None,
                    Utc::now(),
                ))
                .unwrap();
        }
        let mut posting = Posting::new();
        for (i, turnover) in turnovers.iter().enumerate() {
            posting.add_turnover(&MemberId::new(format!("C{i}")), *turnover);
        }
        posting
            .commit(&store, &crate::ledger::InMemoryLedger::new(), Utc::now())
            .unwrap();
        (store, root)
    }

    #[test]
    fn test_any_four_of_five_may_qualify() {
        let (store, parent) = children_with(&[5, 100, 90, 80, 70]);
        let children = store.children_of(parent.member()).unwrap();

        let legs = qualifying_legs(&children, &tier(100)).unwrap();
        let ids: Vec<_> = legs.iter().map(|l| l.member().to_string()).collect();

        assert_eq!(ids, vec!["C1", "C2", "C3", "C4"]);
    }

    #[test]
    fn test_weak_legs_do_not_qualify() {
        let (store, parent) = children_with(&[100, 5, 5, 5, 5]);
        let children = store.children_of(parent.member()).unwrap();
        assert!(qualifying_legs(&children, &tier(100)).is_none());
    }

    #[test]
    fn test_leg_just_below_fractional_requirement_fails() {
        // Threshold 33: legs need 13.2, 9.9, 6.6 and 3.3
        let (store, parent) = children_with(&[14, 10, 7, 3]);
        let children = store.children_of(parent.member()).unwrap();
        assert!(qualifying_legs(&children, &tier(33)).is_none());

        let (store, parent) = children_with(&[14, 10, 7, 4]);
        let children = store.children_of(parent.member()).unwrap();
        assert!(qualifying_legs(&children, &tier(33)).is_some());
    }

    #[test]
    fn test_fewer_than_four_children_skipped() {
        let (store, parent) = children_with(&[500, 500, 500]);
        let config = EngineConfig {
            reward_tiers: vec![tier(100)],
            ..Default::default()
        };
        let evaluator = LifetimeRewardEvaluator::from_config(&config);
        assert!(evaluator.evaluate_parent(&store, &parent, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_grant_schedules_installments_summing_to_reward() {
        let (store, parent) = children_with(&[100, 90, 80, 70]);
        let config = EngineConfig {
            reward_tiers: vec![tier(100)],
            ..Default::default()
        };
        let evaluator = LifetimeRewardEvaluator::from_config(&config);

        let (grant, posting) = evaluator
            .evaluate_parent(&store, &parent, Utc::now())
            .unwrap()
            .unwrap();

        let rows = &posting.batch().new_schedules;
        assert_eq!(grant.installments, 3);
        assert_eq!(rows.iter().map(|r| r.amount()).collect::<Vec<_>>(), vec![333, 333, 334]);
        assert_eq!(posting.credit_count(), 0);
    }
}
