//! Integration tests for offline-safe sample delivery.

use crate::session_mock::{SessionHarness, Track};
use chrono::{Duration as ChronoDuration, Utc};
use rustrun::location::types::{Fix, FixSource, Sample};
use rustrun::recording::driver::SessionDriver;
use rustrun::recording::types::{ActivityType, StartRequest};
use rustrun::storage::config::{AppConfig, SyncSettings};
use rustrun::storage::database::Database;
use rustrun::storage::queue::DurableQueue;
use rustrun::sync::connectivity::Connectivity;
use rustrun::sync::engine::SyncEngine;
use rustrun::sync::http::HttpRemoteStore;
use rustrun::sync::remote::MemoryRemoteStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

fn samples(session_id: Uuid, count: usize) -> Vec<Sample> {
    let start = Utc::now();
    (0..count)
        .map(|i| {
            let fix = Fix::new(45.0 + i as f64 * 0.0001, -122.0, start + ChronoDuration::seconds(i as i64));
            Sample::from_fix(session_id, &fix, i as f64, FixSource::Foreground)
        })
        .collect()
}

fn sync_engine(
    online: bool,
) -> (SyncEngine<MemoryRemoteStore>, MemoryRemoteStore, Connectivity) {
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let store = MemoryRemoteStore::new();
    store.set_online(online);
    let connectivity = Connectivity::new(online);
    let settings = SyncSettings {
        drain_batch_size: 7,
        ..SyncSettings::default()
    };
    let engine = SyncEngine::new(
        Arc::new(store.clone()),
        DurableQueue::new(db),
        connectivity.clone(),
        &settings,
    );
    (engine, store, connectivity)
}

#[tokio::test]
async fn test_thirty_queued_samples_stay_put_while_offline() {
    let (engine, store, _) = sync_engine(false);
    let id = Uuid::new_v4();
    engine.queue().enqueue(&id, &samples(id, 30)).unwrap();

    for _ in 0..3 {
        let report = engine.drain_pending_sessions().await.unwrap();
        assert_eq!(report.delivered, 0);
        assert!(report.aborted);
    }

    assert_eq!(engine.queue().len(&id).unwrap(), 30);
    assert!(store.samples(&id).is_empty());
    let seqs: HashSet<i64> = engine
        .queue()
        .peek(&id, 100)
        .unwrap()
        .iter()
        .map(|q| q.seq)
        .collect();
    assert_eq!(seqs.len(), 30);
}

#[tokio::test]
async fn test_failed_batch_retried_without_loss_or_reordering() {
    let (engine, store, _) = sync_engine(true);
    let id = Uuid::new_v4();
    engine.queue().enqueue(&id, &samples(id, 20)).unwrap();

    // Connectivity claims online but the store refuses writes.
    store.set_online(false);
    let report = engine.trigger_drain().unwrap().await.unwrap().unwrap();
    assert!(report.aborted);
    assert_eq!(report.remaining, 20);

    store.set_online(true);
    let report = engine.trigger_drain().unwrap().await.unwrap().unwrap();
    assert_eq!(report.delivered, 20);
    assert_eq!(report.remaining, 0);

    let delivered: Vec<f64> = store.samples(&id).iter().map(|s| s.elapsed_s).collect();
    assert_eq!(delivered, (0..20).map(|i| i as f64).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_historical_sessions_drain_independently() {
    let (engine, store, _) = sync_engine(true);
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    engine.queue().enqueue(&first, &samples(first, 3)).unwrap();
    engine.queue().enqueue(&second, &samples(second, 4)).unwrap();

    let report = engine.drain(second).await.unwrap();
    assert_eq!(report.delivered, 4);
    assert_eq!(engine.queue().len(&first).unwrap(), 3);
    assert!(store.samples(&first).is_empty());

    engine.drain_pending_sessions().await.unwrap();
    assert_eq!(store.samples(&first).len(), 3);
    assert_eq!(store.samples(&second).len(), 4);
}

#[tokio::test]
async fn test_live_session_survives_dead_zone() {
    let mut h = SessionHarness::new();
    let id = h.engine.start(StartRequest::new(ActivityType::Run)).await.unwrap();
    let mut track = Track::new();

    h.engine.handle_foreground_fix(track.here(3.0));
    for _ in 0..9 {
        h.engine.handle_foreground_fix(track.step(5.0, 3.0));
    }
    h.engine.sync_mut().wait_idle().await;
    assert_eq!(h.store.samples(&id).len(), 10);

    h.set_online(false);
    for _ in 0..20 {
        h.engine.handle_foreground_fix(track.step(5.0, 3.0));
    }
    h.engine.sync_mut().wait_idle().await;
    assert_eq!(h.queued(&id), 20);
    assert!((h.engine.live().distance_m - 145.0).abs() < 0.1);

    h.set_online(true);
    let report = h.engine.drain_pending().await.unwrap();
    assert_eq!(report.delivered, 20);

    let samples = h.store.samples(&id);
    assert_eq!(samples.len(), 30);
    assert!(samples.windows(2).all(|w| w[0].recorded_at < w[1].recorded_at));
}

#[tokio::test]
async fn test_driver_drains_when_connectivity_returns() {
    let config = AppConfig::default();
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let old_session = Uuid::new_v4();
    DurableQueue::new(Arc::clone(&db))
        .enqueue(&old_session, &samples(old_session, 12))
        .unwrap();

    let store = MemoryRemoteStore::new();
    let h = SessionHarness::with_parts(
        Arc::clone(&db),
        store.clone(),
        Arc::new(rustrun::location::background::NullBackgroundLocation),
    );
    h.set_online(false);
    let connectivity = h.connectivity.clone();
    let (driver, handle) = SessionDriver::new(h.engine, &config);
    let task = driver.spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.samples(&old_session).is_empty());

    store.set_online(true);
    connectivity.set_online(true);

    let delivered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if store.samples(&old_session).len() == 12 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(delivered.is_ok(), "queued samples were not drained");
    assert_eq!(DurableQueue::new(db).len(&old_session).unwrap(), 0);

    handle.shutdown().await;
    task.await.unwrap();
}

/// Whether `request` holds complete headers plus the announced body.
fn request_complete(request: &[u8]) -> bool {
    let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let headers = String::from_utf8_lossy(&request[..end]).to_ascii_lowercase();
    let body_len = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    request.len() >= end + 4 + body_len
}

/// Answers every request with an empty 200.
async fn serve_ok(listener: TcpListener, hits: Arc<AtomicUsize>) {
    while let Ok((mut socket, _)) = listener.accept().await {
        let hits = Arc::clone(&hits);
        tokio::spawn(async move {
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            while !request_complete(&request) {
                match socket.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => request.extend_from_slice(&chunk[..n]),
                }
            }
            hits.fetch_add(1, Ordering::SeqCst);
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
            let _ = socket.shutdown().await;
        });
    }
}

#[tokio::test]
async fn test_periodic_drain_reaches_http_store_after_outage() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connectivity = Connectivity::new(true);
    let store = HttpRemoteStore::new(format!("http://{}", addr), Duration::from_secs(2))
        .unwrap()
        .with_connectivity(connectivity.clone());
    let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
    let engine = SyncEngine::new(
        Arc::new(store),
        DurableQueue::new(db),
        connectivity.clone(),
        &SyncSettings::default(),
    );
    let id = Uuid::new_v4();
    engine.queue().enqueue(&id, &samples(id, 5)).unwrap();

    // Nothing listens yet: the store reports itself offline.
    let report = engine.trigger_drain().unwrap().await.unwrap().unwrap();
    assert!(report.aborted);
    assert_eq!(report.remaining, 5);
    assert!(!connectivity.is_online());

    let listener = TcpListener::bind(addr).await.unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let server = tokio::spawn(serve_ok(listener, Arc::clone(&hits)));

    let report = engine.trigger_drain().unwrap().await.unwrap().unwrap();
    assert_eq!(report.delivered, 5);
    assert_eq!(report.remaining, 0);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(connectivity.is_online());

    server.abort();
}
