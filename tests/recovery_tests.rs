//! Failure handling and restart recovery
//!
//! Covers the fail-safe taken when persistence breaks mid-progression, the
//! startup reconciliation of persisted pending matches and operator cancels.

mod fixtures;

use fixtures::{participant, test_settings, TestSystem, GUILD};
use pickup_engine::config::{MatchConfig, StageSettings};
use pickup_engine::engine::{Outcome, ReconcileReport};
use pickup_engine::types::{AbortReason, MatchKey, PendingMatch, PickMode, Stage};
use pickup_engine::utils::current_timestamp;

fn persistence_failures(system: &TestSystem) -> u64 {
    system.metrics.engine().persistence_failures_total.get()
}

#[tokio::test]
async fn test_failed_start_force_clears_the_pending_match() {
    let system = TestSystem::new();
    let key = system.add_queue(MatchConfig::new(1, "2v2", 4, 2, PickMode::SkillBased));
    system.fill_queue(key, &[1600.0, 1500.0, 1400.0, 1300.0]);
    system.gateway.fail_on("record_started_match");

    let result = system.engine.on_capacity_reached(key).await;
    assert!(result.is_err());

    assert!(system.pending(key).await.is_none());
    assert_eq!(system.engine.stage_of(key).await, None);
    assert!(!system.engine.is_scheduled(key));
    assert!(system.started().is_empty());

    let kinds = system.event_kinds();
    assert!(kinds.contains(&"operator_error"));
    let aborts = system.aborts();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].0, AbortReason::PersistenceFailure);
    assert_eq!(persistence_failures(&system), 1);

    // Nobody is touched and no refill is attempted
    assert_eq!(system.queue_ids(key).await.len(), 4);
    assert_eq!(system.engine.stats().await.pending_matches, 0);
}

#[tokio::test]
async fn test_failed_tick_force_clears_the_pending_match() {
    let system = TestSystem::new();
    let key = system.add_queue(
        MatchConfig::new(1, "2v2", 4, 2, PickMode::Random).with_readiness_check(true),
    );
    system.join(key, participant("p0", 1500.0, 1));
    system.join(key, participant("p1", 1500.0, 2));
    system.join(key, participant("p2", 1500.0, 30));
    system.join(key, participant("p3", 1500.0, 31));

    system.engine.on_capacity_reached(key).await.unwrap();
    assert_eq!(system.engine.stage_of(key).await, Some(Stage::ReadinessCheck));

    system.gateway.fail_on("increment_iteration");
    system.advance_ticks(1).await;

    assert!(system.pending(key).await.is_none());
    assert_eq!(system.engine.stage_of(key).await, None);
    assert!(!system.engine.is_scheduled(key));
    assert!(system.event_kinds().contains(&"operator_error"));
    assert_eq!(persistence_failures(&system), 1);
    assert_eq!(system.queue_ids(key).await.len(), 4);

    // Later stale timers for the key are harmless
    system.gateway.recover();
    let outcome = system.engine.tick(key, Stage::ReadinessCheck).await.unwrap();
    assert!(matches!(outcome, Outcome::Ignored(_)));
}

#[tokio::test]
async fn test_reconcile_unwinds_a_draft_lost_in_a_restart() {
    let system = TestSystem::new();
    let key = system.add_queue(MatchConfig::new(1, "2v2", 4, 2, PickMode::Manual));
    let ids = system.fill_queue(key, &[1600.0, 1500.0, 1400.0, 1300.0]);

    system.engine.on_capacity_reached(key).await.unwrap();
    assert_eq!(system.engine.stage_of(key).await, Some(Stage::TeamFormation));
    let before = system.pending(key).await.unwrap();

    let restarted = system.restart();
    let report = restarted.engine.reconcile().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            recovery_gaps: 1,
            ..ReconcileReport::default()
        }
    );

    let aborts = restarted.aborts();
    assert_eq!(aborts.len(), 1);
    let (reason, removed, returned) = &aborts[0];
    assert_eq!(reason, &AbortReason::RecoveryGap);
    assert!(removed.is_empty());
    let mut returned = returned.clone();
    returned.sort();
    assert_eq!(returned, ids);

    // Everyone kept their place, and the full queue starts over right away
    let after = restarted.pending(key).await.unwrap();
    assert_eq!(after.stage, Stage::TeamFormation);
    let joined = |pending: &PendingMatch| -> Vec<_> {
        let mut joined: Vec<_> = pending
            .participants
            .iter()
            .map(|p| (p.id.clone(), p.joined_at))
            .collect();
        joined.sort();
        joined
    };
    assert_eq!(joined(&after), joined(&before));
    assert_eq!(restarted.engine.stage_of(key).await, Some(Stage::TeamFormation));
}

#[tokio::test]
async fn test_reconcile_resumes_readiness_check_at_persisted_tick() {
    let settings = StageSettings {
        afk_check_iterations: 2,
        ..test_settings()
    };
    let system = TestSystem::with_settings(settings);
    let key = system.add_queue(
        MatchConfig::new(1, "2v2", 4, 2, PickMode::Random).with_readiness_check(true),
    );
    system.join(key, participant("p0", 1500.0, 1));
    system.join(key, participant("p1", 1500.0, 2));
    system.join(key, participant("p2", 1500.0, 30));
    system.join(key, participant("p3", 1500.0, 31));

    system.engine.on_capacity_reached(key).await.unwrap();
    system.advance_ticks(1).await;
    assert_eq!(system.pending(key).await.unwrap().stage_iteration, 1);

    let restarted = system.restart();
    let report = restarted.engine.reconcile().await.unwrap();
    assert_eq!(report.resumed, 1);
    assert_eq!(report.recovery_gaps, 0);
    assert_eq!(
        restarted.engine.stage_of(key).await,
        Some(Stage::ReadinessCheck)
    );
    assert!(restarted.engine.is_scheduled(key));

    // The iteration budget is not reset by the restart
    restarted.advance_ticks(1).await;
    assert!(restarted.pending(key).await.is_none());
    let aborts = restarted.aborts();
    assert_eq!(aborts.len(), 1);
    let (reason, removed, _) = &aborts[0];
    assert!(matches!(reason, AbortReason::Unresponsive { .. }));
    let mut removed = removed.clone();
    removed.sort();
    assert_eq!(removed, vec!["p2", "p3"]);
    // Queue order is by join time, so p1 is ahead of p0
    assert_eq!(restarted.queue_ids(key).await, vec!["p1", "p0"]);
}

#[tokio::test]
async fn test_reconcile_clears_filling_row_and_refills() {
    let system = TestSystem::new();
    let key = system.add_queue(MatchConfig::new(1, "1v1", 2, 2, PickMode::Random));
    system.join(key, participant("a", 1500.0, 3));
    system.join(key, participant("b", 1500.0, 2));

    let filling = PendingMatch::new(
        key,
        vec![participant("a", 1500.0, 3), participant("b", 1500.0, 2)],
        current_timestamp(),
    );
    assert_eq!(filling.stage, Stage::Filling);
    system.gateway.put_pending_match(filling).unwrap();

    let report = system.engine.reconcile().await.unwrap();
    assert_eq!(report.cleared, 1);
    assert_eq!(report.resumed, 0);

    let started = system.started();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].participants.len(), 2);
    assert!(system.pending(key).await.is_none());
}

#[tokio::test]
async fn test_reconcile_finalizes_starting_row() {
    let system = TestSystem::new();
    let key = system.add_queue(MatchConfig::new(1, "1v1", 2, 2, PickMode::Random));
    system.join(key, participant("a", 1500.0, 3));
    system.join(key, participant("b", 1500.0, 2));

    let mut starting = PendingMatch::new(
        key,
        vec![participant("a", 1500.0, 3), participant("b", 1500.0, 2)],
        current_timestamp(),
    );
    starting.stage = Stage::Starting;
    system.gateway.put_pending_match(starting).unwrap();

    let report = system.engine.reconcile().await.unwrap();
    assert_eq!(report.resumed, 1);

    assert_eq!(system.started().len(), 1);
    assert!(system.pending(key).await.is_none());
    assert!(system.queue_ids(key).await.is_empty());
    assert_eq!(system.event_kinds(), vec!["match_started"]);
}

#[tokio::test]
async fn test_reconcile_clears_rows_of_removed_queues() {
    let system = TestSystem::new();
    let key = MatchKey::new(GUILD, 7);
    system
        .gateway
        .put_pending_match(PendingMatch::new(
            key,
            vec![participant("a", 1500.0, 1)],
            current_timestamp(),
        ))
        .unwrap();

    let report = system.engine.reconcile().await.unwrap();
    assert_eq!(report.cleared, 1);
    assert!(system.pending(key).await.is_none());
    assert!(system.events().is_empty());
}

#[tokio::test]
async fn test_force_cancel_returns_everyone() {
    let system = TestSystem::new();
    let key = system.add_queue(MatchConfig::new(1, "2v2", 4, 2, PickMode::Manual));
    system.fill_queue(key, &[1600.0, 1500.0, 1400.0, 1300.0]);
    system.engine.on_capacity_reached(key).await.unwrap();

    // The queue is deleted while its match is pending
    system.gateway.remove_match_config(key).unwrap();

    let cancelled = system
        .engine
        .force_cancel(&[key, MatchKey::new(GUILD, 99)], "queue deleted")
        .await
        .unwrap();
    assert_eq!(cancelled, 1);

    let aborts = system.aborts();
    assert_eq!(aborts.len(), 1);
    let (reason, removed, returned) = &aborts[0];
    assert_eq!(
        reason,
        &AbortReason::ForceCancelled {
            reason: "queue deleted".to_string()
        }
    );
    assert!(removed.is_empty());
    assert_eq!(returned.len(), 4);

    // No refill for a queue that no longer exists
    assert!(system.pending(key).await.is_none());
    assert_eq!(system.engine.stage_of(key).await, None);
    assert!(system.started().is_empty());
}

#[tokio::test]
async fn test_reconcile_keeps_resuming_after_a_row_fails_to_clear() {
    let settings = StageSettings {
        afk_check_iterations: 2,
        ..test_settings()
    };
    let system = TestSystem::with_settings(settings);
    let filling_key = system.add_queue(MatchConfig::new(1, "1v1", 2, 2, PickMode::Random));
    system
        .gateway
        .put_pending_match(PendingMatch::new(
            filling_key,
            vec![participant("a", 1500.0, 3), participant("b", 1500.0, 2)],
            current_timestamp(),
        ))
        .unwrap();

    let ready_key = system.add_queue(
        MatchConfig::new(2, "2v2", 4, 2, PickMode::Random).with_readiness_check(true),
    );
    system.join(ready_key, participant("p0", 1500.0, 1));
    system.join(ready_key, participant("p1", 1500.0, 2));
    system.join(ready_key, participant("p2", 1500.0, 30));
    system.join(ready_key, participant("p3", 1500.0, 31));
    system.engine.on_capacity_reached(ready_key).await.unwrap();

    let restarted = system.restart();
    restarted.gateway.fail_on("clear_match");
    let report = restarted.engine.reconcile().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.resumed, 1);
    assert_eq!(report.cleared, 0);

    assert_eq!(
        restarted.engine.stage_of(ready_key).await,
        Some(Stage::ReadinessCheck)
    );
    assert!(restarted.engine.is_scheduled(ready_key));
    assert_eq!(restarted.engine.stage_of(filling_key).await, None);
    let aborts = restarted.aborts();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].0, AbortReason::PersistenceFailure);
    assert_eq!(persistence_failures(&restarted), 1);

    // The resumed readiness check still runs to completion
    restarted.gateway.recover();
    restarted.advance_ticks(2).await;
    assert!(restarted.pending(ready_key).await.is_none());
    let aborts = restarted.aborts();
    assert_eq!(aborts.len(), 2);
    let (reason, removed, _) = &aborts[1];
    assert!(matches!(reason, AbortReason::Unresponsive { .. }));
    let mut removed = removed.clone();
    removed.sort();
    assert_eq!(removed, vec!["p2", "p3"]);

    // The row that could not be cleared is picked up by the next pass
    let report = restarted.engine.reconcile().await.unwrap();
    assert_eq!(report.cleared, 1);
    assert_eq!(report.failed, 0);
    assert!(restarted.pending(filling_key).await.is_none());
}

#[tokio::test]
async fn test_uneven_team_split_aborts_as_internal_error() {
    let system = TestSystem::new();
    let key = system.add_queue(MatchConfig::new(1, "odd", 5, 2, PickMode::SkillBased));
    system.fill_queue(key, &[1600.0, 1500.0, 1400.0, 1300.0, 1200.0]);

    let result = system.engine.on_capacity_reached(key).await;
    assert!(result.is_err());

    assert!(system.pending(key).await.is_none());
    assert_eq!(system.engine.stage_of(key).await, None);
    assert!(system.event_kinds().contains(&"operator_error"));
    let aborts = system.aborts();
    assert_eq!(aborts.len(), 1);
    assert_eq!(aborts[0].0, AbortReason::InternalError);
    // Not a storage problem, so the persistence counter stays untouched
    assert_eq!(persistence_failures(&system), 0);
    assert_eq!(system.queue_ids(key).await.len(), 5);
}
