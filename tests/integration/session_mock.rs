//! Shared fixtures for session integration tests.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rustrun::location::background::{BackgroundLocation, NullBackgroundLocation};
use rustrun::location::producer::ReplayLocationProducer;
use rustrun::location::types::Fix;
use rustrun::recording::engine::SessionEngine;
use rustrun::storage::config::AppConfig;
use rustrun::storage::database::Database;
use rustrun::storage::disk::{FixedStorageGuard, StorageStatus};
use rustrun::sync::connectivity::Connectivity;
use rustrun::sync::remote::MemoryRemoteStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Meters per degree of latitude on the mean-radius sphere.
pub const METERS_PER_DEGREE: f64 = 111_194.93;

pub struct SessionHarness {
    pub engine: SessionEngine<MemoryRemoteStore>,
    pub store: MemoryRemoteStore,
    pub database: Arc<Mutex<Database>>,
    pub connectivity: Connectivity,
}

impl SessionHarness {
    /// Engine over an in-memory database, fed by hand.
    pub fn new() -> Self {
        let database = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        Self::with_parts(database, MemoryRemoteStore::new(), Arc::new(NullBackgroundLocation))
    }

    pub fn with_parts(
        database: Arc<Mutex<Database>>,
        store: MemoryRemoteStore,
        background: Arc<dyn BackgroundLocation>,
    ) -> Self {
        let connectivity = Connectivity::new(true);
        let engine = SessionEngine::new(
            &AppConfig::default(),
            Arc::clone(&database),
            Arc::new(store.clone()),
            Arc::new(ReplayLocationProducer::new(Vec::new(), Duration::from_secs(1))),
            background,
            connectivity.clone(),
        )
        .with_storage_guard(Arc::new(FixedStorageGuard(StorageStatus::Ok)));

        Self {
            engine,
            store,
            database,
            connectivity,
        }
    }

    /// Cut both the remote store and the connectivity signal.
    pub fn set_online(&self, online: bool) {
        self.store.set_online(online);
        self.connectivity.set_online(online);
    }

    pub fn queued(&self, session_id: &uuid::Uuid) -> usize {
        self.database
            .lock()
            .unwrap()
            .count_samples(session_id)
            .unwrap()
    }
}

/// Walks north from a start point, producing fixes one second apart.
pub struct Track {
    latitude: f64,
    longitude: f64,
    at: DateTime<Utc>,
}

impl Track {
    pub fn new() -> Self {
        Self {
            latitude: 45.0,
            longitude: -122.0,
            at: Utc::now(),
        }
    }

    /// Current point with good accuracy.
    pub fn here(&self, speed_mps: f64) -> Fix {
        Fix::new(self.latitude, self.longitude, self.at)
            .with_accuracy(5.0)
            .with_speed(speed_mps)
    }

    /// Move `meters` north and return the fix there.
    pub fn step(&mut self, meters: f64, speed_mps: f64) -> Fix {
        self.latitude += meters / METERS_PER_DEGREE;
        self.at += ChronoDuration::seconds(1);
        self.here(speed_mps)
    }
}
