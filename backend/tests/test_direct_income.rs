//! Direct income tests
//!
//! Instant 3% to the referral source (or fallback), ten monthly 0.15% rows to
//! the structural parent, all in one atomic unit with the trigger flag.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use mlm_commission_core::config::EngineConfig;
use mlm_commission_core::core::time::FixedClock;
use mlm_commission_core::ledger::InMemoryLedger;
use mlm_commission_core::models::{CommissionKind, MemberId, ScheduleSource, TriggerEvent, TriggerStage};
use mlm_commission_core::orchestrator::CommissionEngine;
use mlm_commission_core::scheduler::ItemStatus;
use mlm_commission_core::store::{CommissionStore, MemoryStore, TreeStore};
use std::sync::Arc;
use uuid::Uuid;

type Engine = CommissionEngine<MemoryStore, InMemoryLedger>;

fn id(s: &str) -> MemberId {
    MemberId::from(s)
}

fn engine_at(config: EngineConfig, at: DateTime<Utc>) -> Engine {
    let clock = Arc::new(FixedClock::new(at));
    CommissionEngine::with_clock(config, MemoryStore::new(), InMemoryLedger::new(), clock).unwrap()
}

fn jan_15() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

/// Seat a member (optionally with a wallet)
fn seat(engine: &Engine, member: &str, referral: Option<&str>, wallet: bool) {
    if wallet {
        engine.ledger().open_wallet(&id(member)).unwrap();
    }
    engine.place_member(id(member), referral.map(id)).unwrap();
}

fn submit(engine: &Engine, member: &str, amount: i64) -> Uuid {
    let trigger = TriggerEvent::new(id(member), amount, "basic", engine.clock().now()).unwrap();
    engine.submit_trigger(trigger).unwrap()
}

fn balance(engine: &Engine, member: &str) -> i64 {
    engine.ledger().balance(&id(member)).unwrap().unwrap_or(0)
}

// ============================================================================
// Conservation
// ============================================================================

#[test]
fn test_instant_and_monthly_amounts() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    seat(&engine, "A", Some("ROOT"), true);
    let trigger = submit(&engine, "A", 1_000_000);

    let report = engine.run_direct_income_sweep().unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(balance(&engine, "ROOT"), 30_000);

    let rows = engine.store().scheduled().unwrap();
    assert_eq!(rows.len(), 10);
    for (k, row) in rows.iter().enumerate() {
        assert_eq!(row.amount(), 1_500);
        assert_eq!(row.beneficiary(), &id("ROOT"));
        assert_eq!(row.funded_by(), &id("A"));
        assert!(!row.is_paid());
        assert_eq!(row.source(), &ScheduleSource::DirectMonthly);
        assert_eq!(row.installment() as usize, k + 1);
    }
    assert_eq!(rows[0].scheduled_date(), NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());
    assert_eq!(rows[9].scheduled_date(), NaiveDate::from_ymd_opt(2024, 11, 15).unwrap());

    let trigger = engine.store().trigger(trigger).unwrap().unwrap();
    assert_eq!(trigger.stage(), TriggerStage::DirectPaid);
    assert!(trigger.direct_income_sent());
    assert!(!trigger.level_income_sent());
}

#[test]
fn test_record_and_commission_match_credit() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    seat(&engine, "A", Some("ROOT"), true);
    submit(&engine, "A", 250_000);

    engine.run_direct_income_sweep().unwrap();

    let records = engine.store().records().unwrap();
    let direct = records.of_kind(CommissionKind::Direct);
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].amount, 7_500);
    assert_eq!(direct[0].paid_by, id("A"));
    assert_eq!(
        engine.store().node(&id("ROOT")).unwrap().unwrap().commission_earned(),
        7_500
    );
    assert_eq!(engine.ledger().transactions().unwrap().len(), 1);
}

#[test]
fn test_monthly_dates_clamp_to_month_end() {
    let engine = engine_at(
        EngineConfig::default(),
        Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap(),
    );
    seat(&engine, "ROOT", None, true);
    seat(&engine, "A", Some("ROOT"), true);
    submit(&engine, "A", 100_000);

    engine.run_direct_income_sweep().unwrap();

    let dates: Vec<NaiveDate> = engine
        .store()
        .scheduled()
        .unwrap()
        .iter()
        .map(|r| r.scheduled_date())
        .collect();
    assert_eq!(dates[0], NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    assert_eq!(dates[1], NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
    assert_eq!(dates[2], NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
}

// ============================================================================
// Routing
// ============================================================================

#[test]
fn test_referrer_and_parent_can_differ() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    seat(&engine, "A", Some("ROOT"), true);
    // B sits under ROOT (open slot) but was referred by A
    seat(&engine, "B", Some("A"), true);
    submit(&engine, "B", 1_000_000);

    engine.run_direct_income_sweep().unwrap();

    assert_eq!(balance(&engine, "A"), 30_000);
    assert_eq!(balance(&engine, "ROOT"), 0);
    assert!(engine
        .store()
        .scheduled()
        .unwrap()
        .iter()
        .all(|r| r.beneficiary() == &id("ROOT")));
}

#[test]
fn test_missing_referral_routes_to_root() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    seat(&engine, "A", None, true);
    submit(&engine, "A", 1_000_000);

    engine.run_direct_income_sweep().unwrap();

    assert_eq!(balance(&engine, "ROOT"), 30_000);
    assert_eq!(engine.store().scheduled().unwrap().len(), 10);
}

#[test]
fn test_root_purchase_pays_instant_share_to_root() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    submit(&engine, "ROOT", 1_000_000);

    engine.run_direct_income_sweep().unwrap();

    assert_eq!(balance(&engine, "ROOT"), 30_000);
    let records = engine.store().records().unwrap();
    let direct = records.of_kind(CommissionKind::Direct);
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].paid_by, id("ROOT"));
    assert_eq!(direct[0].paid_to, id("ROOT"));
    // No structural parent, so nothing is scheduled
    assert!(engine.store().scheduled().unwrap().is_empty());
}

#[test]
fn test_missing_referral_routes_to_configured_fallback() {
    let config = EngineConfig {
        fallback_member: Some(id("HOUSE")),
        ..Default::default()
    };
    let engine = engine_at(config, jan_15());
    engine.ledger().open_wallet(&id("HOUSE")).unwrap();
    seat(&engine, "ROOT", None, true);
    seat(&engine, "A", None, true);
    submit(&engine, "A", 1_000_000);

    engine.run_direct_income_sweep().unwrap();

    assert_eq!(balance(&engine, "HOUSE"), 30_000);
    assert_eq!(balance(&engine, "ROOT"), 0);
    // HOUSE is not a node, so no commission_earned anywhere
    assert_eq!(engine.store().node(&id("ROOT")).unwrap().unwrap().commission_earned(), 0);
}

// ============================================================================
// Turnover
// ============================================================================

#[test]
fn test_turnover_accrues_on_node_and_ancestors() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    for m in ["A", "B", "C", "D", "E"] {
        seat(&engine, m, Some("ROOT"), true);
    }
    seat(&engine, "F", Some("A"), true); // under A
    submit(&engine, "F", 40_000);

    engine.run_direct_income_sweep().unwrap();

    let turnover = |m: &str| engine.store().node(&id(m)).unwrap().unwrap().turnover();
    assert_eq!(turnover("F"), 40_000);
    assert_eq!(turnover("A"), 40_000);
    assert_eq!(turnover("ROOT"), 40_000);
    assert_eq!(turnover("B"), 0);
}

// ============================================================================
// Idempotency and atomicity
// ============================================================================

#[test]
fn test_rerun_pays_nothing_more() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    seat(&engine, "A", Some("ROOT"), true);
    submit(&engine, "A", 1_000_000);
    engine.run_direct_income_sweep().unwrap();

    let again = engine.run_direct_income_sweep().unwrap();

    assert_eq!(again.total(), 0);
    assert_eq!(balance(&engine, "ROOT"), 30_000);
    assert_eq!(engine.store().scheduled().unwrap().len(), 10);
}

#[test]
fn test_failed_credit_leaves_nothing_applied() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    seat(&engine, "X", Some("ROOT"), false); // no wallet
    seat(&engine, "A", Some("X"), true);
    let trigger = submit(&engine, "A", 1_000_000);

    let report = engine.run_direct_income_sweep().unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.outcomes[0].status, ItemStatus::Failed);
    assert!(engine.store().scheduled().unwrap().is_empty());
    assert!(engine.store().records().unwrap().is_empty());
    assert_eq!(engine.store().node(&id("A")).unwrap().unwrap().turnover(), 0);
    assert_eq!(
        engine.store().trigger(trigger).unwrap().unwrap().stage(),
        TriggerStage::Pending
    );

    // Retried once the wallet exists
    engine.ledger().open_wallet(&id("X")).unwrap();
    let retry = engine.run_direct_income_sweep().unwrap();
    assert_eq!(retry.processed, 1);
    assert_eq!(balance(&engine, "X"), 30_000);
}

#[test]
fn test_tiny_amount_still_flags_trigger() {
    let engine = engine_at(EngineConfig::default(), jan_15());
    seat(&engine, "ROOT", None, true);
    seat(&engine, "A", Some("ROOT"), true);
    let trigger = submit(&engine, "A", 10);

    engine.run_direct_income_sweep().unwrap();

    assert_eq!(balance(&engine, "ROOT"), 0);
    assert!(engine.store().scheduled().unwrap().is_empty());
    assert!(engine.ledger().transactions().unwrap().is_empty());
    assert_eq!(
        engine.store().trigger(trigger).unwrap().unwrap().stage(),
        TriggerStage::DirectPaid
    );
}
