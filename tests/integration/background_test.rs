//! Integration tests for the background location producer.

use crate::session_mock::{SessionHarness, Track};
use rustrun::location::background::ReplayBackgroundLocation;
use rustrun::location::types::{FixSource, PermissionState};
use rustrun::recording::types::{ActivityType, PauseReason, SessionStatus, StartRequest};
use rustrun::storage::database::Database;
use rustrun::sync::remote::MemoryRemoteStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn harness_with_background(background: ReplayBackgroundLocation) -> SessionHarness {
    let database = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    SessionHarness::with_parts(database, MemoryRemoteStore::new(), Arc::new(background))
}

async fn handle_pending_events(h: &mut SessionHarness) {
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(1), h.engine.next_location_event()).await
    {
        h.engine.handle_location_event(event);
    }
}

#[tokio::test(start_paused = true)]
async fn test_background_fixes_are_recorded_but_not_integrated() {
    let mut track = Track::new();
    let fixes: Vec<_> = (0..5).map(|_| track.step(20.0, 4.0)).collect();
    let mut h = harness_with_background(ReplayBackgroundLocation::new(fixes, Duration::from_secs(5)));

    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    assert!(h.engine.background_active());

    tokio::time::sleep(Duration::from_secs(30)).await;
    handle_pending_events(&mut h).await;

    assert_eq!(h.engine.live().distance_m, 0.0);
    assert_eq!(h.engine.live().sample_count, 0);
    assert_eq!(h.engine.sync().buffered(), 5);

    let session = h.engine.finish().await.unwrap();
    assert_eq!(session.distance_m, 0.0);
    let delivered = h.store.samples(&id);
    assert_eq!(delivered.len(), 5);
    assert!(delivered.iter().all(|s| s.source == FixSource::Background));
    assert!(delivered.iter().all(|s| s.is_moving));
}

#[tokio::test(start_paused = true)]
async fn test_mixed_sources_delivered_in_elapsed_order() {
    let mut background_track = Track::new();
    let background = vec![background_track.step(5.0, 3.0), background_track.step(5.0, 3.0)];
    let mut h = harness_with_background(ReplayBackgroundLocation::new(background, Duration::from_secs(5)));
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();

    let mut track = Track::new();
    h.engine.handle_foreground_fix(track.here(3.0));
    for _ in 0..10 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle_pending_events(&mut h).await;
        h.engine.handle_foreground_fix(track.step(3.0, 3.0));
    }
    h.engine.finish().await.unwrap();

    let delivered = h.store.samples(&id);
    assert_eq!(delivered.len(), 13);
    assert!(delivered.windows(2).all(|w| w[0].elapsed_s <= w[1].elapsed_s));

    let background_at: Vec<usize> = delivered
        .iter()
        .enumerate()
        .filter(|(_, s)| s.source == FixSource::Background)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(background_at.len(), 2);
    assert!(background_at[1] < delivered.len() - 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_fix_resumes_auto_pause() {
    let mut h = harness_with_background(ReplayBackgroundLocation::new(Vec::new(), Duration::from_secs(5)));
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(0.2));
    assert_eq!(h.engine.pause_reason(), Some(PauseReason::Auto));

    h.engine.observe_background_fix(&track.step(1.0, 0.8));
    assert_eq!(h.engine.status(), SessionStatus::Paused);

    h.engine.observe_background_fix(&track.step(2.0, 2.0));
    assert_eq!(h.engine.status(), SessionStatus::Recording);
}

#[tokio::test]
async fn test_inaccurate_background_fix_does_not_resume() {
    let mut h = harness_with_background(ReplayBackgroundLocation::new(Vec::new(), Duration::from_secs(5)));
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(0.2));
    h.engine.observe_background_fix(&track.step(2.0, 2.5).with_accuracy(60.0));
    assert_eq!(h.engine.status(), SessionStatus::Paused);
}

#[tokio::test]
async fn test_denied_background_degrades_to_foreground_only() {
    let mut h = harness_with_background(
        ReplayBackgroundLocation::new(Vec::new(), Duration::from_secs(5))
            .with_permission(PermissionState::Denied),
    );
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    assert_eq!(h.engine.status(), SessionStatus::Recording);
    assert!(!h.engine.background_active());
}

#[tokio::test]
async fn test_unavailable_background_still_records() {
    let mut h = SessionHarness::new();
    h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    assert!(!h.engine.background_active());

    let mut track = Track::new();
    h.engine.handle_foreground_fix(track.here(3.0));
    h.engine.handle_foreground_fix(track.step(10.0, 3.0));
    assert!((h.engine.live().distance_m - 10.0).abs() < 0.01);
}
