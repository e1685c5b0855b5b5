//! Direct income
//!
//! For a purchase of `amount` by `node`:
//! - instant share (`direct_instant_bps`) to `node.referral_by`, or to the
//!   fallback member (default: tree root) when no referral source is set
//! - `direct_monthly_installments` scheduled rows of `direct_monthly_bps` to
//!   the structural parent, dated monthly from the purchase date
//! - `turnover += amount` on the node and its structural ancestors
//!
//! All three land in one posting. Idempotency is the caller's trigger stage.

use crate::config::EngineConfig;
use crate::core::money::apply_bps;
use crate::core::time::monthly_installment_dates;
use crate::distribution::{ancestors, DistributionError};
use crate::ledger::TransactionKind;
use crate::models::{
    CommissionKind, CommissionRecord, MemberId, ScheduleSource, ScheduledCommission, TreeNode,
};
use crate::settlement::Posting;
use crate::store::TreeStore;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DirectCommissionDistributor {
    instant_bps: u32,
    monthly_bps: u32,
    installments: u32,
    fallback_member: Option<MemberId>,
    step_limit: usize,
}

impl DirectCommissionDistributor {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            instant_bps: config.direct_instant_bps,
            monthly_bps: config.direct_monthly_bps,
            installments: config.direct_monthly_installments,
            fallback_member: config.fallback_member.clone(),
            step_limit: config.traversal_step_limit,
        }
    }

    /// Stage the direct income for a purchase by `node`
    pub fn prepare<S: TreeStore + ?Sized>(
        &self,
        store: &S,
        node: &TreeNode,
        amount: i64,
        at: DateTime<Utc>,
    ) -> Result<Posting, DistributionError> {
        let mut posting = Posting::new();
        let instant = apply_bps(amount, self.instant_bps);
        let monthly = apply_bps(amount, self.monthly_bps);

        // Instant share
        let recipient = match node.referral_by() {
            Some(referrer) => Some(referrer.clone()),
            None => match &self.fallback_member {
                Some(fallback) => Some(fallback.clone()),
                None => store.root()?.map(|root| root.member().clone()),
            },
        };
        match recipient {
            Some(recipient) => {
                posting.pay(
                    CommissionRecord::new(
                        node.member().clone(),
                        recipient.clone(),
                        CommissionKind::Direct,
                        instant,
                        format!("Direct income from {}", node.member()),
                        at,
                    ),
                    TransactionKind::DirectIncome,
                );
                if store.node(&recipient)?.is_some() {
                    posting.add_commission(&recipient, instant);
                }
            }
            None => {
                debug!(member = %node.member(), "No direct income recipient: tree is empty");
            }
        }

        // Monthly share
        if let Some(parent) = node.parent() {
            if monthly > 0 {
                let dates = monthly_installment_dates(at.date_naive(), self.installments);
                for (index, date) in dates.into_iter().enumerate() {
                    posting.schedule(ScheduledCommission::new(
                        parent.clone(),
                        node.member().clone(),
                        monthly,
                        date,
                        ScheduleSource::DirectMonthly,
                        index as u32 + 1,
                    ));
                }
            }
        }

        // Turnover on the node and its subtree's ancestors
        posting.add_turnover(node.member(), amount);
        for ancestor in ancestors(store, node, self.step_limit)? {
            posting.add_turnover(ancestor.member(), amount);
        }

        debug!(
            member = %node.member(),
            amount,
            instant,
            monthly,
            "Direct income staged"
        );
        Ok(posting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::placement::TreePlacementEngine;
    use crate::store::{CommissionStore, MemoryStore};
    use chrono::{NaiveDate, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 10, 0, 0).unwrap()
    }

    fn setup() -> (MemoryStore, InMemoryLedger) {
        let store = MemoryStore::new();
        let ledger = InMemoryLedger::new();
        let placement = TreePlacementEngine::new(1_000);
        for (member, referral) in [("R", None), ("A", Some("R")), ("B", Some("A"))] {
            placement
                .insert(&store, MemberId::from(member), referral.map(MemberId::from), at())
                .unwrap();
            ledger.open_wallet(&MemberId::from(member)).unwrap();
        }
        (store, ledger)
    }

    #[test]
    fn test_instant_to_referrer_monthly_to_parent() {
        let (store, ledger) = setup();
        let distributor = DirectCommissionDistributor::from_config(&EngineConfig::default());
        // B sits under R structurally but was referred by A
        let b = store.node(&MemberId::from("B")).unwrap().unwrap();
        assert_eq!(b.parent(), Some(&MemberId::from("R")));

        distributor
            .prepare(&store, &b, 1_000_000, at())
            .unwrap()
            .commit(&store, &ledger, at())
            .unwrap();

        assert_eq!(ledger.balance(&MemberId::from("A")).unwrap(), Some(30_000));
        let rows = store.scheduled().unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.beneficiary() == &MemberId::from("R") && r.amount() == 1_500));
        assert_eq!(rows[0].scheduled_date(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn test_turnover_accrues_up_the_chain() {
        let (store, ledger) = setup();
        let distributor = DirectCommissionDistributor::from_config(&EngineConfig::default());
        let b = store.node(&MemberId::from("B")).unwrap().unwrap();

        distributor
            .prepare(&store, &b, 50_000, at())
            .unwrap()
            .commit(&store, &ledger, at())
            .unwrap();

        assert_eq!(store.node(&MemberId::from("B")).unwrap().unwrap().turnover(), 50_000);
        assert_eq!(store.node(&MemberId::from("R")).unwrap().unwrap().turnover(), 50_000);
        assert_eq!(store.node(&MemberId::from("A")).unwrap().unwrap().turnover(), 0);
    }

    #[test]
    fn test_root_purchase_without_referral_pays_root() {
        let (store, _) = setup();
        let distributor = DirectCommissionDistributor::from_config(&EngineConfig::default());
        let root = store.node(&MemberId::from("R")).unwrap().unwrap();

        let posting = distributor.prepare(&store, &root, 10_000, at()).unwrap();

        assert_eq!(posting.credit_count(), 1);
        assert_eq!(posting.total_credited(), 300);
        assert!(posting.batch().new_schedules.is_empty());
    }
}
