//! Property tests: any placement sequence keeps the tree shape invariants.
//!
//! - exactly one root
//! - at most five children per parent, positions distinct in 1..=5
//! - level == parent level + 1
//! - placement order is breadth-first (levels never decrease)

use chrono::Utc;
use mlm_commission_core::models::{MemberId, TreeNode, MAX_CHILDREN};
use mlm_commission_core::placement::TreePlacementEngine;
use mlm_commission_core::store::{MemoryStore, TreeStore};
use proptest::prelude::*;
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// For each new member, an optional index of an earlier member as referral
fn arb_referrals() -> impl Strategy<Value = Vec<Option<usize>>> {
    prop::collection::vec(prop::option::of(any::<usize>()), 1..160)
}

fn build(referrals: &[Option<usize>]) -> (MemoryStore, Vec<TreeNode>) {
    let store = MemoryStore::new();
    let engine = TreePlacementEngine::new(100_000);
    let mut placed = Vec::with_capacity(referrals.len());

    for (i, referral) in referrals.iter().enumerate() {
        let referral_by = match referral {
            Some(pick) if i > 0 => Some(MemberId::new(format!("M{}", pick % i))),
            _ => None,
        };
        let node = engine
            .insert(&store, MemberId::new(format!("M{i}")), referral_by, Utc::now())
            .expect("placement succeeds while capacity remains");
        placed.push(node);
    }

    (store, placed)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn parents_never_exceed_five_distinct_positions(referrals in arb_referrals()) {
        let (store, placed) = build(&referrals);

        for node in &placed {
            let children = store.children_of(node.member()).unwrap();
            prop_assert!(children.len() <= MAX_CHILDREN);

            let positions: HashSet<u8> = children.iter().map(TreeNode::position).collect();
            prop_assert_eq!(positions.len(), children.len());
            prop_assert!(positions.iter().all(|p| (1..=MAX_CHILDREN as u8).contains(p)));
        }
    }

    #[test]
    fn exactly_one_root_and_levels_are_consistent(referrals in arb_referrals()) {
        let (store, placed) = build(&referrals);

        prop_assert_eq!(placed.iter().filter(|n| n.is_root()).count(), 1);
        for node in placed.iter().filter(|n| !n.is_root()) {
            let parent = store.parent_of(node.member()).unwrap().unwrap();
            prop_assert_eq!(node.level(), parent.level() + 1);
        }
    }

    #[test]
    fn placement_order_is_breadth_first(referrals in arb_referrals()) {
        let (_, placed) = build(&referrals);

        for pair in placed.windows(2) {
            prop_assert!(pair[0].level() <= pair[1].level());
        }
    }

    #[test]
    fn referral_never_changes_shape(referrals in arb_referrals()) {
        let (with_referrals, a) = build(&referrals);
        let (_, b) = build(&vec![None; referrals.len()]);

        for (x, y) in a.iter().zip(&b) {
            prop_assert_eq!(x.parent(), y.parent());
            prop_assert_eq!(x.position(), y.position());
        }
        prop_assert_eq!(with_referrals.node_count().unwrap(), referrals.len());
    }
}
