//! In-memory store
//!
//! Reference implementation of [`TreeStore`] and [`CommissionStore`]. All
//! state sits behind one mutex, so every method is a single atomic step and
//! `commit` applies a whole batch or nothing.

use crate::models::{
    ClubType, MemberId, RecordLog, RewardGrant, RoyaltyMembership, ScheduleKind,
    ScheduledCommission, TreeNode, TriggerEvent, TriggerStage,
};
use crate::store::{
    CommissionStore, StageTransition, StoreBatch, StoreError, TreeArena, TreeStore,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Serializable copy of a store's contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub nodes: Vec<TreeNode>,
    pub schedules: Vec<ScheduledCommission>,
    pub records: RecordLog,
    pub reward_grants: Vec<RewardGrant>,
    pub memberships: Vec<RoyaltyMembership>,
    pub triggers: Vec<TriggerEvent>,
}

#[derive(Debug, Default)]
struct StoreState {
    arena: TreeArena,

    /// Scheduled rows in creation order
    schedules: Vec<ScheduledCommission>,
    schedule_index: HashMap<Uuid, usize>,

    records: RecordLog,

    rewards: BTreeMap<(MemberId, String), RewardGrant>,

    memberships: BTreeMap<(MemberId, ClubType), RoyaltyMembership>,

    /// Triggers in submission order
    triggers: Vec<TriggerEvent>,
    trigger_index: HashMap<Uuid, usize>,
}

impl StoreState {
    fn validate_batch(&self, batch: &StoreBatch) -> Result<(), StoreError> {
        for (member, _) in batch
            .commission_increments
            .iter()
            .chain(batch.turnover_increments.iter())
        {
            if !self.arena.contains(member) {
                return Err(StoreError::MemberNotFound(member.clone()));
            }
        }

        let mut seen_paid = HashSet::new();
        for id in &batch.paid_schedules {
            let index = self
                .schedule_index
                .get(id)
                .ok_or(StoreError::ScheduleNotFound(*id))?;
            if self.schedules[*index].is_paid() || !seen_paid.insert(*id) {
                return Err(StoreError::AlreadyPaid(*id));
            }
        }

        let mut seen_rewards = HashSet::new();
        for grant in &batch.reward_grants {
            let key = (grant.parent.clone(), grant.tier.clone());
            if self.rewards.contains_key(&key) || !seen_rewards.insert(key) {
                return Err(StoreError::DuplicateReward {
                    parent: grant.parent.clone(),
                    tier: grant.tier.clone(),
                });
            }
        }

        let mut seen_clubs = HashSet::new();
        for membership in &batch.memberships {
            let key = (membership.member.clone(), membership.club);
            if self.memberships.contains_key(&key) || !seen_clubs.insert(key) {
                return Err(StoreError::DuplicateMembership {
                    member: membership.member.clone(),
                    club: membership.club,
                });
            }
        }

        if let Some(transition) = &batch.trigger_transition {
            let trigger = self.trigger_ref(transition.trigger)?;
            if trigger.stage() != transition.from || transition.from.next() != Some(transition.to) {
                return Err(crate::models::TriggerError::InvalidTransition {
                    id: transition.trigger,
                    from: trigger.stage(),
                    to: transition.to,
                }
                .into());
            }
        }

        Ok(())
    }

    /// Apply a validated batch
    fn apply_batch(&mut self, batch: StoreBatch) -> Result<(), StoreError> {
        // The only fallible step goes first so a failure leaves nothing applied
        if let Some(transition) = batch.trigger_transition {
            self.advance(transition)?;
        }

        for (member, delta) in batch.commission_increments {
            if let Some(node) = self.arena.get_mut(&member) {
                node.add_commission(delta);
            }
        }
        for (member, delta) in batch.turnover_increments {
            if let Some(node) = self.arena.get_mut(&member) {
                node.add_turnover(delta);
            }
        }

        let paid_at = batch.paid_at.unwrap_or_else(chrono::Utc::now);
        for id in batch.paid_schedules {
            if let Some(index) = self.schedule_index.get(&id) {
                self.schedules[*index].mark_paid(paid_at);
            }
        }
        for schedule in batch.new_schedules {
            self.push_schedule(schedule);
        }
        for record in batch.records {
            self.records.append(record);
        }
        for grant in batch.reward_grants {
            self.rewards
                .insert((grant.parent.clone(), grant.tier.clone()), grant);
        }
        for membership in batch.memberships {
            self.memberships
                .insert((membership.member.clone(), membership.club), membership);
        }

        Ok(())
    }

    fn push_schedule(&mut self, schedule: ScheduledCommission) {
        self.schedule_index.insert(schedule.id(), self.schedules.len());
        self.schedules.push(schedule);
    }

    fn push_trigger(&mut self, trigger: TriggerEvent) -> Result<(), StoreError> {
        if self.trigger_index.contains_key(&trigger.id()) {
            return Err(StoreError::DuplicateTrigger(trigger.id()));
        }
        self.trigger_index.insert(trigger.id(), self.triggers.len());
        self.triggers.push(trigger);
        Ok(())
    }

    fn trigger_ref(&self, id: Uuid) -> Result<&TriggerEvent, StoreError> {
        self.trigger_index
            .get(&id)
            .map(|index| &self.triggers[*index])
            .ok_or(StoreError::TriggerNotFound(id))
    }

    fn advance(&mut self, transition: StageTransition) -> Result<(), StoreError> {
        let index = *self
            .trigger_index
            .get(&transition.trigger)
            .ok_or(StoreError::TriggerNotFound(transition.trigger))?;
        self.triggers[index].advance(transition.from, transition.to)?;
        Ok(())
    }
}

/// Mutex-guarded in-memory store
///
/// # Example
///
/// ```rust
/// use mlm_commission_core::models::{MemberId, TreeNode};
/// use mlm_commission_core::store::{MemoryStore, TreeStore};
/// use chrono::Utc;
///
/// let store = MemoryStore::new();
/// store.insert_node(TreeNode::root(MemberId::from("ROOT"), None, Utc::now())).unwrap();
///
/// assert_eq!(store.node_count().unwrap(), 1);
/// assert!(store.root().unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Rebuild a store from a snapshot, re-validating the tree
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let mut state = StoreState {
            arena: TreeArena::from_nodes(snapshot.nodes)?,
            records: snapshot.records,
            ..Default::default()
        };
        for schedule in snapshot.schedules {
            state.push_schedule(schedule);
        }
        for grant in snapshot.reward_grants {
            state
                .rewards
                .insert((grant.parent.clone(), grant.tier.clone()), grant);
        }
        for membership in snapshot.memberships {
            state
                .memberships
                .insert((membership.member.clone(), membership.club), membership);
        }
        for trigger in snapshot.triggers {
            state.push_trigger(trigger)?;
        }
        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Copy the store's contents
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let state = self.lock()?;
        let mut nodes: Vec<TreeNode> = state.arena.nodes().cloned().collect();
        nodes.sort_by(|a, b| a.member().cmp(b.member()));
        Ok(StoreSnapshot {
            nodes,
            schedules: state.schedules.clone(),
            records: state.records.clone(),
            reward_grants: state.rewards.values().cloned().collect(),
            memberships: state.memberships.values().cloned().collect(),
            triggers: state.triggers.clone(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))
    }
}

impl TreeStore for MemoryStore {
    fn node(&self, member: &MemberId) -> Result<Option<TreeNode>, StoreError> {
        Ok(self.lock()?.arena.get(member).cloned())
    }

    fn root(&self) -> Result<Option<TreeNode>, StoreError> {
        Ok(self.lock()?.arena.root().cloned())
    }

    fn children_of(&self, parent: &MemberId) -> Result<Vec<TreeNode>, StoreError> {
        Ok(self
            .lock()?
            .arena
            .children(parent)
            .into_iter()
            .cloned()
            .collect())
    }

    fn parent_of(&self, member: &MemberId) -> Result<Option<TreeNode>, StoreError> {
        Ok(self.lock()?.arena.parent_of(member).cloned())
    }

    fn referrals_of(&self, member: &MemberId) -> Result<Vec<MemberId>, StoreError> {
        Ok(self.lock()?.arena.referrals_of(member))
    }

    fn nodes_breadth_first(&self, step_limit: usize) -> Result<Vec<TreeNode>, StoreError> {
        Ok(self
            .lock()?
            .arena
            .breadth_first(step_limit)
            .into_iter()
            .cloned()
            .collect())
    }

    fn node_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.arena.len())
    }

    fn insert_node(&self, node: TreeNode) -> Result<(), StoreError> {
        self.lock()?.arena.insert(node)
    }

    fn mark_working(&self, member: &MemberId) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        let node = state
            .arena
            .get_mut(member)
            .ok_or_else(|| StoreError::MemberNotFound(member.clone()))?;
        if node.is_working() {
            return Ok(false);
        }
        node.mark_working();
        Ok(true)
    }
}

impl CommissionStore for MemoryStore {
    fn scheduled_due(
        &self,
        as_of: NaiveDate,
        kind: ScheduleKind,
    ) -> Result<Vec<ScheduledCommission>, StoreError> {
        Ok(self
            .lock()?
            .schedules
            .iter()
            .filter(|s| s.is_due_on(as_of) && s.source().kind() == kind)
            .cloned()
            .collect())
    }

    fn scheduled(&self) -> Result<Vec<ScheduledCommission>, StoreError> {
        Ok(self.lock()?.schedules.clone())
    }

    fn records(&self) -> Result<RecordLog, StoreError> {
        Ok(self.lock()?.records.clone())
    }

    fn reward_granted(&self, parent: &MemberId, tier: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .rewards
            .contains_key(&(parent.clone(), tier.to_string())))
    }

    fn reward_grants(&self) -> Result<Vec<RewardGrant>, StoreError> {
        Ok(self.lock()?.rewards.values().cloned().collect())
    }

    fn has_membership(&self, member: &MemberId, club: ClubType) -> Result<bool, StoreError> {
        Ok(self.lock()?.memberships.contains_key(&(member.clone(), club)))
    }

    fn memberships(&self) -> Result<Vec<RoyaltyMembership>, StoreError> {
        Ok(self.lock()?.memberships.values().cloned().collect())
    }

    fn insert_trigger(&self, trigger: TriggerEvent) -> Result<(), StoreError> {
        self.lock()?.push_trigger(trigger)
    }

    fn trigger(&self, id: Uuid) -> Result<Option<TriggerEvent>, StoreError> {
        let state = self.lock()?;
        Ok(state.trigger_ref(id).ok().cloned())
    }

    fn triggers_at(&self, stage: TriggerStage) -> Result<Vec<TriggerEvent>, StoreError> {
        Ok(self
            .lock()?
            .triggers
            .iter()
            .filter(|t| t.stage() == stage)
            .cloned()
            .collect())
    }

    fn advance_trigger(&self, transition: StageTransition) -> Result<(), StoreError> {
        self.lock()?.advance(transition)
    }

    fn commit(&self, batch: StoreBatch) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.validate_batch(&batch)?;
        state.apply_batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommissionKind, CommissionRecord, ScheduleSource};
    use chrono::Utc;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let root = TreeNode::root(MemberId::from("R"), None, Utc::now());
        store.insert_node(root.clone()).unwrap();
        store
            .insert_node(TreeNode::child_of(MemberId::from("A"), &root, 1, None, Utc::now()))
            .unwrap();
        store
    }

    fn schedule() -> ScheduledCommission {
        ScheduledCommission::new(
            MemberId::from("R"),
            MemberId::from("A"),
            100,
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            ScheduleSource::DirectMonthly,
            1,
        )
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let store = seeded_store();
        let batch = StoreBatch {
            commission_increments: vec![(MemberId::from("R"), 500), (MemberId::from("GHOST"), 1)],
            records: vec![CommissionRecord::new(
                MemberId::from("A"),
                MemberId::from("R"),
                CommissionKind::Direct,
                500,
                "x",
                Utc::now(),
            )],
            ..Default::default()
        };

        let result = store.commit(batch);

        assert_eq!(result, Err(StoreError::MemberNotFound(MemberId::from("GHOST"))));
        assert_eq!(store.node(&MemberId::from("R")).unwrap().unwrap().commission_earned(), 0);
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn test_paid_flip_happens_once() {
        let store = seeded_store();
        let row = schedule();
        let id = row.id();
        store
            .commit(StoreBatch {
                new_schedules: vec![row],
                ..Default::default()
            })
            .unwrap();

        let pay = || StoreBatch {
            paid_schedules: vec![id],
            ..Default::default()
        };
        store.commit(pay()).unwrap();

        assert_eq!(store.commit(pay()), Err(StoreError::AlreadyPaid(id)));
        assert!(store.scheduled().unwrap()[0].is_paid());
    }

    #[test]
    fn test_due_query_filters_kind_and_date() {
        let store = seeded_store();
        store
            .commit(StoreBatch {
                new_schedules: vec![schedule()],
                ..Default::default()
            })
            .unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();

        assert_eq!(store.scheduled_due(date, ScheduleKind::DirectMonthly).unwrap().len(), 1);
        assert!(store.scheduled_due(date, ScheduleKind::RewardInstallment).unwrap().is_empty());
    }

    #[test]
    fn test_mark_working_is_monotonic() {
        let store = seeded_store();
        let a = MemberId::from("A");

        assert!(store.mark_working(&a).unwrap());
        assert!(!store.mark_working(&a).unwrap());
        assert!(store.node(&a).unwrap().unwrap().is_working());
    }

    #[test]
    fn test_snapshot_round_trip_keeps_tree() {
        let store = seeded_store();
        let snapshot = store.snapshot().unwrap();
        let restored = MemoryStore::from_snapshot(snapshot).unwrap();

        assert_eq!(restored.node_count().unwrap(), 2);
        assert_eq!(
            restored.parent_of(&MemberId::from("A")).unwrap().unwrap().member(),
            &MemberId::from("R")
        );
    }
}
