//! Royalty clubs and working ids
//!
//! Both read three counts per member:
//! - direct ids: members whose `referral_by` is this member
//! - level one: structural children
//! - level two: children of those children
//!
//! A member joins a club tier when all three counts meet the tier minimums.
//! Joining pays the tier's one-time gift and records the membership; a member
//! already holding the membership is skipped before any credit.

use crate::config::{EngineConfig, RoyaltyTier, WorkingIdRule};
use crate::distribution::DistributionError;
use crate::ledger::TransactionKind;
use crate::models::{CommissionKind, CommissionRecord, MemberId, RoyaltyMembership, TreeNode};
use crate::settlement::Posting;
use crate::store::{CommissionStore, TreeStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Referral and downline counts of one member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownlineCounts {
    pub direct_ids: usize,
    pub level_one: usize,
    pub level_two: usize,
}

impl DownlineCounts {
    /// Count a member's referrals and two structural levels below it
    pub fn of<S: TreeStore + ?Sized>(store: &S, member: &MemberId) -> Result<Self, DistributionError> {
        let direct_ids = store.referrals_of(member)?.len();
        let children = store.children_of(member)?;
        let mut level_two = 0;
        for child in &children {
            level_two += store.children_of(child.member())?.len();
        }
        Ok(Self {
            direct_ids,
            level_one: children.len(),
            level_two,
        })
    }

    pub fn meets(&self, tier: &RoyaltyTier) -> bool {
        self.direct_ids >= tier.min_direct_ids
            && self.level_one >= tier.min_level_one
            && self.level_two >= tier.min_level_two
    }

    /// Working when direct ids reach the minimum, or both downline levels do
    pub fn is_working(&self, rule: &WorkingIdRule) -> bool {
        self.direct_ids >= rule.min_direct_ids
            || (self.level_one >= rule.min_level_one && self.level_two >= rule.min_level_two)
    }
}

#[derive(Debug, Clone)]
pub struct RoyaltyClubEvaluator {
    tiers: Vec<RoyaltyTier>,
    working: WorkingIdRule,
}

impl RoyaltyClubEvaluator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            tiers: config
                .royalty_tiers
                .iter()
                .filter(|tier| tier.active)
                .cloned()
                .collect(),
            working: config.working_ids.clone(),
        }
    }

    /// Active tiers in configuration order
    pub fn tiers(&self) -> &[RoyaltyTier] {
        &self.tiers
    }

    pub fn working_rule(&self) -> &WorkingIdRule {
        &self.working
    }

    /// Evaluate `node` for `tier`; returns the membership and its posting on a join
    pub fn evaluate_member<S: CommissionStore + ?Sized>(
        &self,
        store: &S,
        node: &TreeNode,
        tier: &RoyaltyTier,
        at: DateTime<Utc>,
    ) -> Result<Option<(RoyaltyMembership, Posting)>, DistributionError> {
        if store.has_membership(node.member(), tier.club)? {
            return Ok(None);
        }
        let counts = DownlineCounts::of(store, node.member())?;
        if !counts.meets(tier) {
            return Ok(None);
        }

        let membership = RoyaltyMembership {
            member: node.member().clone(),
            club: tier.club,
            turnover_limit_at_join: tier.turnover_limit,
            joined_date: at.date_naive(),
        };

        let mut posting = Posting::new();
        posting.pay(
            CommissionRecord::new(
                node.member().clone(),
                node.member().clone(),
                CommissionKind::Royalty,
                tier.gift_amount,
                format!("Royalty {} club gift", tier.club),
                at,
            ),
            TransactionKind::RoyaltyIncome,
        );
        posting.add_commission(node.member(), tier.gift_amount);
        posting.join_club(membership.clone());

        debug!(
            member = %node.member(),
            club = %tier.club,
            direct_ids = counts.direct_ids,
            level_one = counts.level_one,
            level_two = counts.level_two,
            "Royalty club qualified"
        );
        Ok(Some((membership, posting)))
    }

    /// True when `node` should be flagged as a working id
    pub fn qualifies_working<S: TreeStore + ?Sized>(
        &self,
        store: &S,
        node: &TreeNode,
    ) -> Result<bool, DistributionError> {
        if node.is_working() {
            return Ok(false);
        }
        Ok(DownlineCounts::of(store, node.member())?.is_working(&self.working))
    }
}
