//! Integration tests for the outdoor session lifecycle.
//!
//! Fixes are fed straight into the engine so each test controls exactly
//! which readings arrive and when.

use crate::session_mock::{SessionHarness, Track, METERS_PER_DEGREE};
use chrono::Utc;
use rustrun::geo::haversine_distance;
use rustrun::location::background::NullBackgroundLocation;
use rustrun::location::types::Fix;
use rustrun::recording::types::{
    ActivityType, PauseReason, RecorderError, SessionEvent, SessionStatus, SplitKind, StartRequest,
};
use rustrun::storage::database::Database;
use rustrun::storage::registry::{ActiveSessionEntry, ActiveSessionRegistry, SessionKind};
use rustrun::sync::remote::MemoryRemoteStore;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use uuid::Uuid;

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Harness over an on-disk database, so a second connection can reach it.
fn file_harness(path: &Path) -> SessionHarness {
    let database = Arc::new(Mutex::new(Database::open(path).unwrap()));
    SessionHarness::with_parts(database, MemoryRemoteStore::new(), Arc::new(NullBackgroundLocation))
}

/// Hide or restore the sample queue table behind the engine's back.
fn set_queue_table_present(path: &Path, present: bool) {
    let sql = if present {
        "ALTER TABLE sample_queue_hidden RENAME TO sample_queue"
    } else {
        "ALTER TABLE sample_queue RENAME TO sample_queue_hidden"
    };
    rusqlite::Connection::open(path).unwrap().execute_batch(sql).unwrap();
}

fn north_of(fix: &Fix, meters: f64) -> Fix {
    Fix::new(fix.latitude + meters / METERS_PER_DEGREE, fix.longitude, Utc::now())
        .with_accuracy(5.0)
        .with_speed(2.5)
}

#[tokio::test]
async fn test_accepted_step_adds_haversine_distance() {
    let mut h = SessionHarness::new();
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();

    let mut track = Track::new();
    let first = track.here(1.2);
    let second = track.step(10.0, 1.2);
    h.engine.handle_foreground_fix(first.clone());
    h.engine.handle_foreground_fix(second.clone());

    let expected = haversine_distance(
        first.latitude,
        first.longitude,
        second.latitude,
        second.longitude,
    );
    assert!((h.engine.live().distance_m - expected).abs() < 1e-9);
    assert!((expected - 10.0).abs() < 0.05);
}

#[tokio::test]
async fn test_distance_sums_only_filtered_steps() {
    let mut h = SessionHarness::new();
    h.engine.start(StartRequest::new(ActivityType::Walk)).await.unwrap();

    let p0 = Track::new().here(2.5);
    let p1 = north_of(&p0, 10.0);
    let inaccurate = north_of(&p1, 20.0).with_accuracy(50.0);
    let p3 = north_of(&p1, 15.0);
    let spike = north_of(&p3, 120.0);
    let p5 = north_of(&p3, 12.0);

    let mut last = 0.0;
    for fix in [&p0, &p1, &inaccurate, &p3, &spike, &p5] {
        h.engine.handle_foreground_fix(fix.clone());
        let distance = h.engine.live().distance_m;
        assert!(distance >= last, "distance decreased");
        last = distance;
    }

    let step = |a: &Fix, b: &Fix| haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude);
    let expected = step(&p0, &p1) + step(&p1, &p3) + step(&p3, &p5);
    assert!((h.engine.live().distance_m - expected).abs() < 1e-6);
    assert_eq!(h.engine.live().sample_count, 6);
}

#[tokio::test]
async fn test_inaccurate_fix_is_stored_but_not_integrated() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();

    let mut track = Track::new();
    h.engine.handle_foreground_fix(track.here(2.0).with_altitude(100.0));
    h.engine.handle_foreground_fix(track.step(10.0, 2.0).with_altitude(101.0));
    let before = h.engine.live();

    let noisy = track.step(10.0, 2.0).with_accuracy(50.0).with_altitude(110.0);
    h.engine.handle_foreground_fix(noisy);

    let after = h.engine.live();
    assert_eq!(after.distance_m, before.distance_m);
    assert_eq!(after.elev_gain_m, before.elev_gain_m);
    assert_eq!(after.sample_count, 3);

    h.engine.finish().await.unwrap();
    let samples = h.store.samples(&id);
    assert_eq!(samples.len(), 3);
    assert_eq!(samples[2].accuracy_m, Some(50.0));
}

#[tokio::test(start_paused = true)]
async fn test_slow_fixes_auto_pause_and_freeze_moving_time() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut rx = h.engine.subscribe();
    let mut track = Track::new();

    tokio::time::advance(Duration::from_secs(5)).await;
    h.engine.handle_foreground_fix(track.here(0.3));
    assert_eq!(h.engine.status(), SessionStatus::Paused);
    assert_eq!(h.engine.pause_reason(), Some(PauseReason::Auto));
    let moving = h.engine.live().moving_time_s;
    assert!((moving - 5.0).abs() < 0.01);

    for _ in 0..2 {
        tokio::time::advance(Duration::from_secs(1)).await;
        h.engine.handle_foreground_fix(track.step(0.3, 0.3));
        assert_eq!(h.engine.status(), SessionStatus::Paused);
    }

    tokio::time::advance(Duration::from_secs(10)).await;
    h.engine.tick();
    assert!((h.engine.live().moving_time_s - moving).abs() < 0.01);
    assert!(drain_events(&mut rx).contains(&SessionEvent::AutoPaused(id)));
}

#[tokio::test(start_paused = true)]
async fn test_auto_resume_needs_resume_threshold() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut rx = h.engine.subscribe();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(0.3));
    assert_eq!(h.engine.status(), SessionStatus::Paused);

    tokio::time::advance(Duration::from_secs(1)).await;
    h.engine.handle_foreground_fix(track.step(1.0, 0.7));
    assert_eq!(h.engine.status(), SessionStatus::Paused);

    tokio::time::advance(Duration::from_secs(1)).await;
    h.engine.handle_foreground_fix(track.step(1.5, 1.5));
    assert_eq!(h.engine.status(), SessionStatus::Recording);
    assert_eq!(h.engine.pause_reason(), None);
    assert!(drain_events(&mut rx).contains(&SessionEvent::AutoResumed(id)));
}

#[tokio::test(start_paused = true)]
async fn test_manual_pause_overrides_auto_pause() {
    let mut h = SessionHarness::new();
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(0.2));
    assert_eq!(h.engine.pause_reason(), Some(PauseReason::Auto));

    h.engine.pause().unwrap();
    assert_eq!(h.engine.pause_reason(), Some(PauseReason::Manual));

    h.engine.handle_foreground_fix(track.step(5.0, 3.0));
    assert_eq!(h.engine.status(), SessionStatus::Paused);

    h.engine.resume().unwrap();
    assert_eq!(h.engine.status(), SessionStatus::Recording);
}

#[tokio::test(start_paused = true)]
async fn test_auto_km_splits_in_order() {
    let mut h = SessionHarness::new();
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut rx = h.engine.subscribe();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(5.0));
    for _ in 0..45 {
        tokio::time::advance(Duration::from_secs(10)).await;
        h.engine.handle_foreground_fix(track.step(50.0, 5.0));
    }

    let splits = h.engine.splits().to_vec();
    let indexes: Vec<u32> = splits
        .iter()
        .filter(|s| s.kind == SplitKind::AutoKm)
        .map(|s| s.index)
        .collect();
    assert_eq!(indexes, vec![1, 2]);

    let recorded: Vec<u32> = drain_events(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::SplitRecorded(split) => Some(split.index),
            _ => None,
        })
        .collect();
    assert_eq!(recorded, vec![1, 2]);

    let live = h.engine.live();
    let total_duration: f64 = splits.iter().map(|s| s.duration_s).sum();
    let total_distance: f64 = splits.iter().map(|s| s.distance_m).sum();
    assert!(total_duration <= live.elapsed_s + 1e-9);
    assert!(total_distance <= live.distance_m + 1e-9);
    for split in &splits {
        assert!((split.distance_m - 1000.0).abs() < 1e-6);
        assert!(split.avg_pace_s_per_km.is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_finish_adds_closing_split_and_aggregates() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(4.0));
    for _ in 0..30 {
        tokio::time::advance(Duration::from_secs(10)).await;
        h.engine.handle_foreground_fix(track.step(40.0, 4.0));
    }
    tokio::time::advance(Duration::from_secs(20)).await;
    h.engine.pause().unwrap();
    tokio::time::advance(Duration::from_secs(60)).await;

    let session = h.engine.finish().await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!((session.distance_m - 1200.0).abs() < 0.1);
    assert!((session.moving_time_s - 320.0).abs() < 0.01);
    assert!((session.paused_time_s - 60.0).abs() < 0.01);
    assert!((session.duration_s - 380.0).abs() < 0.01);
    assert_eq!(session.max_speed_mps, 4.0);
    assert!(session.avg_pace_s_per_km.is_some());

    let auto: Vec<_> = session.splits.iter().filter(|s| s.kind == SplitKind::AutoKm).collect();
    assert_eq!(auto.len(), 2);
    assert!((auto[1].distance_m - 200.0).abs() < 0.1);

    let stored = h.store.session(&id).unwrap();
    let update = stored.update.unwrap();
    assert_eq!(update.status, SessionStatus::Completed);
    assert_eq!(update.splits, session.splits);
    assert!(!h.engine.registry().is_occupied().unwrap());
}

#[tokio::test]
async fn test_start_conflicts_with_indoor_session() {
    let mut h = SessionHarness::new();
    let indoor = ActiveSessionEntry::new(Uuid::new_v4(), SessionKind::IndoorRide, "Trainer", Utc::now());
    ActiveSessionRegistry::new(h.database.clone())
        .claim(&indoor)
        .unwrap();

    let result = h.engine.start(StartRequest::new(ActivityType::Run)).await;
    match result {
        Err(RecorderError::ConflictingActiveSession { kind, session_id }) => {
            assert_eq!(kind, SessionKind::IndoorRide);
            assert_eq!(session_id, indoor.session_id);
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    assert_eq!(h.store.session_count(), 0);
    assert_eq!(h.engine.status(), SessionStatus::Idle);
    assert!(h.engine.session().is_none());
    let current = h.engine.registry().current().unwrap().unwrap();
    assert_eq!(current.session_id, indoor.session_id);
}

#[tokio::test]
async fn test_finish_drains_queue_filled_while_offline() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut track = Track::new();

    h.set_online(false);
    h.engine.handle_foreground_fix(track.here(3.0));
    for _ in 0..14 {
        h.engine.handle_foreground_fix(track.step(5.0, 3.0));
    }
    h.engine.sync_mut().wait_idle().await;
    assert_eq!(h.queued(&id), 10);
    assert_eq!(h.engine.sync().buffered(), 5);

    h.set_online(true);
    h.engine.finish().await.unwrap();

    let samples = h.store.samples(&id);
    assert_eq!(samples.len(), 15);
    assert!(samples.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    assert_eq!(h.queued(&id), 0);
}

#[tokio::test]
async fn test_failed_finish_keeps_session_paused_and_retryable() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut rx = h.engine.subscribe();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(3.0));
    h.engine.handle_foreground_fix(track.step(5.0, 3.0));
    h.engine.handle_foreground_fix(track.step(5.0, 3.0));

    h.set_online(false);
    let result = h.engine.finish().await;
    assert!(matches!(result, Err(RecorderError::FinishPersistFailure(_))));
    assert_eq!(h.engine.status(), SessionStatus::Paused);
    assert_eq!(h.engine.pause_reason(), Some(PauseReason::Manual));
    assert_eq!(h.queued(&id), 3);
    assert!(h.engine.registry().is_occupied().unwrap());
    assert!(drain_events(&mut rx)
        .iter()
        .any(|e| matches!(e, SessionEvent::FinishFailed { .. })));

    h.set_online(true);
    let session = h.engine.finish().await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(h.store.samples(&id).len(), 3);
    assert_eq!(h.queued(&id), 0);
    assert!(!h.engine.registry().is_occupied().unwrap());
}

#[tokio::test]
async fn test_rejected_update_does_not_duplicate_samples() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Hike)).await.unwrap();
    let mut track = Track::new();
    h.engine.handle_foreground_fix(track.here(1.5));
    h.engine.handle_foreground_fix(track.step(3.0, 1.5));

    h.store.set_reject_updates(true);
    assert!(h.engine.finish().await.is_err());
    h.store.set_reject_updates(false);
    h.engine.finish().await.unwrap();

    assert_eq!(h.store.samples(&id).len(), 2);
}

#[tokio::test]
async fn test_cancel_marks_session_canceled() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Walk)).await.unwrap();
    let mut track = Track::new();
    h.engine.handle_foreground_fix(track.here(1.5));

    h.engine.cancel().await.unwrap();
    assert_eq!(h.engine.status(), SessionStatus::Canceled);
    assert!(!h.engine.registry().is_occupied().unwrap());

    let update = h.store.session(&id).unwrap().update.unwrap();
    assert_eq!(update.status, SessionStatus::Canceled);
    assert_eq!(h.store.samples(&id).len(), 1);

    // A new session can start after cancel.
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    assert_eq!(h.engine.status(), SessionStatus::Recording);
}

#[tokio::test]
async fn test_cancel_keeps_session_when_samples_cannot_be_stored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rustrun.db");
    let mut h = file_harness(&path);
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut track = Track::new();
    h.engine.handle_foreground_fix(track.here(3.0));
    h.engine.handle_foreground_fix(track.step(5.0, 3.0));
    h.engine.handle_foreground_fix(track.step(5.0, 3.0));
    assert_eq!(h.engine.sync().buffered(), 3);

    set_queue_table_present(&path, false);
    let result = h.engine.cancel().await;
    assert!(matches!(result, Err(RecorderError::Storage(_))));
    assert_eq!(h.engine.status(), SessionStatus::Paused);
    assert_eq!(h.engine.pause_reason(), Some(PauseReason::Manual));
    assert_eq!(h.engine.sync().buffered(), 3);
    assert_eq!(h.engine.registry().current().unwrap().unwrap().session_id, id);

    set_queue_table_present(&path, true);
    h.engine.cancel().await.unwrap();
    assert_eq!(h.engine.status(), SessionStatus::Canceled);
    assert_eq!(h.store.samples(&id).len(), 3);

    // The next session's samples are its own.
    let next = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    h.engine.handle_foreground_fix(track.step(5.0, 3.0));
    h.engine.finish().await.unwrap();
    assert_eq!(h.store.samples(&id).len(), 3);
    let delivered = h.store.samples(&next);
    assert_eq!(delivered.len(), 1);
    assert!(delivered.iter().all(|s| s.session_id == next));
}

#[tokio::test]
async fn test_discard_keeps_session_when_samples_cannot_be_stored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("rustrun.db");
    let mut h = file_harness(&path);
    let id = h.engine.start(StartRequest::new(ActivityType::Walk)).await.unwrap();
    let mut track = Track::new();
    h.engine.handle_foreground_fix(track.here(1.5));
    h.engine.handle_foreground_fix(track.step(2.0, 1.5));

    set_queue_table_present(&path, false);
    assert!(h.engine.discard().await.is_err());
    assert_eq!(h.engine.status(), SessionStatus::Paused);
    assert_eq!(h.engine.session_id(), Some(id));
    assert_eq!(h.engine.sync().buffered(), 2);

    set_queue_table_present(&path, true);
    assert_eq!(h.engine.discard().await.unwrap(), Some(id));
    assert_eq!(h.engine.status(), SessionStatus::Idle);
    assert!(!h.engine.registry().is_occupied().unwrap());
    assert_eq!(h.store.samples(&id).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_laps_while_paused() {
    let mut h = SessionHarness::new();
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(3.0));
    tokio::time::advance(Duration::from_secs(30)).await;
    h.engine.handle_foreground_fix(track.step(60.0, 3.0));

    let first = h.engine.lap().unwrap();
    assert_eq!(first.kind, SplitKind::Manual);
    assert_eq!(first.index, 1);
    assert!((first.distance_m - 60.0).abs() < 0.01);

    h.engine.pause().unwrap();
    let second = h.engine.lap().unwrap();
    assert_eq!(second.index, 2);
    assert_eq!(second.distance_m, 0.0);
}
