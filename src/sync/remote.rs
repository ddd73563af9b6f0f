//! Remote persistence service interface and an in-process implementation.

use crate::location::types::Sample;
use crate::recording::types::{ActivityType, Privacy, SessionStatus, Split};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Fields sent when a session row is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub activity_type: ActivityType,
    pub started_at: DateTime<Utc>,
    pub timezone: String,
    pub privacy: Privacy,
    pub title: String,
}

/// Flags describing how a session was captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    /// The auto-pause detector paused the session at least once
    pub auto_paused: bool,
    /// Background location was active
    pub background_location: bool,
    /// The session was restored after a process restart
    pub restored: bool,
}

/// Final aggregates written when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub ended_at: DateTime<Utc>,
    pub duration_s: f64,
    pub moving_time_s: f64,
    pub paused_time_s: f64,
    pub distance_m: f64,
    pub elev_gain_m: f64,
    pub max_speed_mps: f64,
    pub avg_speed_mps: f64,
    pub avg_pace_s_per_km: Option<f64>,
    pub splits: Vec<Split>,
    pub status: SessionStatus,
    pub flags: SessionFlags,
}

/// Remote store errors. All of them are retryable from the engine's view.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Transport failure or no connectivity
    #[error("Network error: {0}")]
    Network(String),

    /// Non-success HTTP status
    #[error("Remote returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Remote persistence for sessions and samples.
pub trait RemoteStore: Send + Sync + 'static {
    /// Create a session row and return its id.
    fn create_session(
        &self,
        session: &NewSession,
    ) -> impl Future<Output = Result<Uuid, RemoteError>> + Send;

    /// Write final aggregates and status.
    fn update_session(
        &self,
        session_id: Uuid,
        update: &SessionUpdate,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Insert a batch of samples. All-or-nothing.
    fn insert_samples(
        &self,
        session_id: Uuid,
        samples: &[Sample],
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

/// A session as held by [`MemoryRemoteStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub session: NewSession,
    pub update: Option<SessionUpdate>,
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<Uuid, StoredSession>,
    samples: HashMap<Uuid, Vec<Sample>>,
}

/// In-process remote store with an online switch.
///
/// Clones share state, so a test can keep one handle while the engine owns
/// another.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    state: Arc<Mutex<MemoryState>>,
    offline: Arc<AtomicBool>,
    reject_updates: Arc<AtomicBool>,
    insert_attempts: Arc<AtomicUsize>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Make `update_session` fail even while online.
    pub fn set_reject_updates(&self, reject: bool) {
        self.reject_updates.store(reject, Ordering::SeqCst);
    }

    /// Number of `insert_samples` calls, successful or not.
    pub fn insert_attempts(&self) -> usize {
        self.insert_attempts.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }

    pub fn session(&self, session_id: &Uuid) -> Option<StoredSession> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.sessions.get(session_id).cloned())
    }

    /// Samples stored for a session, in arrival order.
    pub fn samples(&self, session_id: &Uuid) -> Vec<Sample> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.samples.get(session_id).cloned())
            .unwrap_or_default()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RemoteError::Network("remote store offline".to_string()))
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, RemoteError> {
        self.state
            .lock()
            .map_err(|e| RemoteError::Network(format!("store lock poisoned: {}", e)))
    }
}

impl RemoteStore for MemoryRemoteStore {
    async fn create_session(&self, session: &NewSession) -> Result<Uuid, RemoteError> {
        self.check_online()?;
        let id = Uuid::new_v4();
        self.lock()?.sessions.insert(
            id,
            StoredSession {
                session: session.clone(),
                update: None,
            },
        );
        Ok(id)
    }

    async fn update_session(
        &self,
        session_id: Uuid,
        update: &SessionUpdate,
    ) -> Result<(), RemoteError> {
        self.check_online()?;
        if self.reject_updates.load(Ordering::SeqCst) {
            return Err(RemoteError::Status {
                status: 503,
                message: "updates rejected".to_string(),
            });
        }
        let mut state = self.lock()?;
        let stored = state.sessions.get_mut(&session_id).ok_or(RemoteError::Status {
            status: 404,
            message: format!("unknown session {}", session_id),
        })?;
        stored.update = Some(update.clone());
        Ok(())
    }

    async fn insert_samples(&self, session_id: Uuid, samples: &[Sample]) -> Result<(), RemoteError> {
        self.insert_attempts.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.lock()?
            .samples
            .entry(session_id)
            .or_default()
            .extend_from_slice(samples);
        Ok(())
    }
}
