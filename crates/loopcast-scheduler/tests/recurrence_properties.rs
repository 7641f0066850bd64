// Behavioural guarantees of the recurrence engine, exercised through the
// public API only.

use chrono::{DateTime, Duration, TimeZone, Utc};
use loopcast_core::{InfluencerId, TeamId};
use loopcast_scheduler::{
    compute_next_execution, ExecutionOutcome, Frequency, LoopConfig, LoopStatus, NewLoop,
    QueueItem, RecurrenceEngine, RecurringConfig, ScheduleEntity, ScheduleKind,
};
use proptest::prelude::*;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn new_loop(kind: ScheduleKind) -> ScheduleEntity {
    ScheduleEntity::new(
        NewLoop {
            team: TeamId::from("team-1"),
            influencer: InfluencerId::from("ava"),
            name: "property loop".to_string(),
            kind,
            max_failures: 3,
        },
        t0(),
    )
}

fn hourly() -> ScheduleEntity {
    new_loop(ScheduleKind::Recurring(RecurringConfig::new(Frequency::Hourly)))
}

fn queue_of(len: usize) -> LoopConfig {
    let items = (0..len)
        .map(|i| QueueItem {
            item_ref: format!("post-{i}"),
            order: i as u32,
        })
        .collect();
    LoopConfig::new(items, 24)
}

fn outcome(success: bool, i: usize) -> ExecutionOutcome {
    let item = format!("run-{i}");
    if success {
        ExecutionOutcome::success(Some(&item))
    } else {
        ExecutionOutcome::failure(Some(&item), "post rejected")
    }
}

proptest! {
    // History length is min(N, 10) and newest first.
    #[test]
    fn history_is_a_bounded_ring(results in prop::collection::vec(any::<bool>(), 0..40)) {
        let engine = RecurrenceEngine::default();
        // High threshold so the loop stays active throughout.
        let mut e = hourly();
        e.max_failures = u32::MAX;
        for (i, ok) in results.iter().enumerate() {
            e = engine
                .record_execution(&e, outcome(*ok, i), t0() + Duration::minutes(i as i64))
                .unwrap();
        }
        prop_assert_eq!(e.execution_history.len(), results.len().min(10));
        for (pos, entry) in e.execution_history.iter().enumerate() {
            let run = results.len() - 1 - pos;
            prop_assert_eq!(entry.item_ref.clone(), Some(format!("run-{run}")));
            prop_assert_eq!(entry.success, results[run]);
        }
    }

    // failure_count is the length of the trailing run of failures.
    #[test]
    fn failure_count_tracks_consecutive_failures(results in prop::collection::vec(any::<bool>(), 0..40)) {
        let engine = RecurrenceEngine::default();
        let mut e = hourly();
        e.max_failures = u32::MAX;
        for (i, ok) in results.iter().enumerate() {
            e = engine.record_execution(&e, outcome(*ok, i), t0()).unwrap();
        }
        let trailing = results.iter().rev().take_while(|ok| !**ok).count() as u32;
        prop_assert_eq!(e.failure_count, trailing);
        prop_assert_eq!(e.last_error.is_some(), trailing > 0);
    }

    // A one-time loop that has run is completed whatever the clock says.
    #[test]
    fn executed_one_time_is_always_completed(offset_hours in -10_000i64..10_000) {
        let mut e = new_loop(ScheduleKind::OneTime { scheduled_time: t0() });
        e.last_executed_at = Some(t0());
        let next = compute_next_execution(&e, t0() + Duration::hours(offset_hours)).unwrap();
        prop_assert_eq!(next.status, LoopStatus::Completed);
        prop_assert_eq!(next.next_execution_at, None);
    }
}

#[test]
fn three_failures_pause_and_success_does_not_resume() {
    let engine = RecurrenceEngine::default();
    let mut e = hourly();
    for i in 0..2 {
        e = engine.record_execution(&e, outcome(false, i), t0()).unwrap();
        assert_eq!(e.status, LoopStatus::Active);
    }
    e = engine.record_execution(&e, outcome(false, 2), t0()).unwrap();
    assert_eq!(e.status, LoopStatus::Paused);
    assert_eq!(e.last_error.as_deref(), Some("post rejected"));

    e = engine.record_execution(&e, outcome(true, 3), t0()).unwrap();
    assert_eq!(e.status, LoopStatus::Paused);
    assert_eq!(e.failure_count, 0);
}

#[test]
fn weekly_picks_today_then_next_configured_day() {
    let cfg = RecurringConfig::new(Frequency::Weekly)
        .with_days([1, 3, 5])
        .with_time("09:00");
    let e = new_loop(ScheduleKind::Recurring(cfg));

    // 2024-01-03 is a Wednesday.
    let wed_0800 = Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap();
    let next = compute_next_execution(&e, wed_0800).unwrap();
    assert_eq!(
        next.next_execution_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 3, 9, 0, 0).unwrap())
    );

    let wed_0930 = Utc.with_ymd_and_hms(2024, 1, 3, 9, 30, 0).unwrap();
    let next = compute_next_execution(&e, wed_0930).unwrap();
    assert_eq!(
        next.next_execution_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap())
    );
}

#[test]
fn queue_wraps_after_a_full_pass() {
    let engine = RecurrenceEngine::default();
    let mut e = new_loop(ScheduleKind::QueueLoop(queue_of(3)));
    let mut seen = Vec::new();
    for i in 0..3 {
        seen.push(e.current_item().unwrap().item_ref.clone());
        e = engine.record_execution(&e, outcome(true, i), t0()).unwrap();
    }
    assert_eq!(seen, ["post-0", "post-1", "post-2"]);

    let ScheduleKind::QueueLoop(cfg) = &e.kind else {
        panic!("expected queue loop");
    };
    assert_eq!(cfg.current_index, 0);
    assert_eq!(cfg.loop_count, 1);
}

#[test]
fn max_loops_completes_the_queue() {
    let engine = RecurrenceEngine::default();
    let mut e = new_loop(ScheduleKind::QueueLoop(queue_of(2).with_max_loops(2)));
    for i in 0..3 {
        e = engine.record_execution(&e, outcome(true, i), t0()).unwrap();
        assert_eq!(e.status, LoopStatus::Active);
        assert_eq!(e.next_execution_at, Some(t0() + Duration::hours(24)));
    }

    // Fourth success wraps for the second time.
    e = engine.record_execution(&e, outcome(true, 3), t0()).unwrap();
    assert_eq!(e.status, LoopStatus::Completed);
    assert!(e.next_execution_at.is_none());

    // Recomputing later changes nothing, and further runs are refused.
    let next = compute_next_execution(&e, t0() + Duration::days(30)).unwrap();
    assert_eq!(next.status, LoopStatus::Completed);
    assert!(next.next_execution_at.is_none());
    assert!(engine.record_execution(&e, outcome(true, 4), t0()).is_err());
}

#[test]
fn exhausted_queue_completes_even_before_recording() {
    let mut cfg = queue_of(3).with_max_loops(2);
    cfg.loop_count = 2;
    let e = new_loop(ScheduleKind::QueueLoop(cfg));
    let next = compute_next_execution(&e, t0()).unwrap();
    assert_eq!(next.status, LoopStatus::Completed);
    assert!(next.next_execution_at.is_none());
}

#[test]
fn custom_interval_scenario() {
    let e = new_loop(ScheduleKind::Recurring(
        RecurringConfig::new(Frequency::Custom).with_interval_hours(6),
    ));
    let now = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    let next = compute_next_execution(&e, now).unwrap();
    assert_eq!(
        next.next_execution_at.map(|t| t.to_rfc3339()),
        Some("2024-01-01T06:00:00+00:00".to_string())
    );
}

#[test]
fn daily_scenarios() {
    let e = new_loop(ScheduleKind::Recurring(
        RecurringConfig::new(Frequency::Daily).with_time("23:00"),
    ));
    let before = Utc.with_ymd_and_hms(2024, 1, 1, 22, 0, 0).unwrap();
    assert_eq!(
        compute_next_execution(&e, before).unwrap().next_execution_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap())
    );
    let after = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
    assert_eq!(
        compute_next_execution(&e, after).unwrap().next_execution_at,
        Some(Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap())
    );
}
