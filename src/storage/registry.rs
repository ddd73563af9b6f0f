//! Active-session registry.
//!
//! A single persisted slot naming the one trackable session that is live
//! system-wide. It enforces mutual exclusion between session kinds and lets
//! execution contexts without an in-memory session (the background location
//! producer, a freshly restarted process) find out which session is active.

use crate::storage::database::{Database, DatabaseError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// Kinds of session that compete for the registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// GPS-tracked outdoor run/walk
    Outdoor,
    /// Indoor trainer ride
    IndoorRide,
    /// Structured workout without location
    Workout,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Outdoor => "outdoor",
            SessionKind::IndoorRide => "indoor_ride",
            SessionKind::Workout => "workout",
        }
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "outdoor" => Ok(SessionKind::Outdoor),
            "indoor_ride" => Ok(SessionKind::IndoorRide),
            "workout" => Ok(SessionKind::Workout),
            other => Err(format!("Unknown session kind: {}", other)),
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle phase of the registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Recording,
    Paused,
    Saving,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Recording => "recording",
            SessionPhase::Paused => "paused",
            SessionPhase::Saving => "saving",
        }
    }
}

impl FromStr for SessionPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recording" => Ok(SessionPhase::Recording),
            "paused" => Ok(SessionPhase::Paused),
            "saving" => Ok(SessionPhase::Saving),
            other => Err(format!("Unknown session phase: {}", other)),
        }
    }
}

/// Contents of the registry slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSessionEntry {
    pub session_id: Uuid,
    pub kind: SessionKind,
    pub phase: SessionPhase,
    /// Display title for the resume prompt
    pub title: String,
    pub started_at: DateTime<Utc>,
    /// Elapsed seconds at the last update
    pub elapsed_s: f64,
    /// Distance in meters at the last update
    pub distance_m: f64,
    pub updated_at: DateTime<Utc>,
}

impl ActiveSessionEntry {
    /// A fresh entry for a session that just started recording.
    pub fn new(
        session_id: Uuid,
        kind: SessionKind,
        title: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            kind,
            phase: SessionPhase::Recording,
            title: title.into(),
            started_at,
            elapsed_s: 0.0,
            distance_m: 0.0,
            updated_at: started_at,
        }
    }

    /// Estimate the session's elapsed time at `at`.
    ///
    /// While recording, time keeps running past the last update; otherwise
    /// the stored snapshot is authoritative.
    pub fn elapsed_at(&self, at: DateTime<Utc>) -> f64 {
        match self.phase {
            SessionPhase::Recording => {
                let since = (at - self.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
                self.elapsed_s + since
            }
            _ => self.elapsed_s,
        }
    }
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Another session holds the slot
    #[error("Active session already registered: {} ({})", .0.kind, .0.session_id)]
    Occupied(ActiveSessionEntry),

    /// Storage failure
    #[error("Registry storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Typed access to the registry slot over the shared database.
#[derive(Clone)]
pub struct ActiveSessionRegistry {
    database: Arc<Mutex<Database>>,
}

impl ActiveSessionRegistry {
    pub fn new(database: Arc<Mutex<Database>>) -> Self {
        Self { database }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Database>, DatabaseError> {
        self.database
            .lock()
            .map_err(|e| DatabaseError::LockPoisoned(e.to_string()))
    }

    /// The currently registered session, if any.
    pub fn current(&self) -> Result<Option<ActiveSessionEntry>, RegistryError> {
        Ok(self.lock()?.get_active_session()?)
    }

    /// Whether any session holds the slot.
    pub fn is_occupied(&self) -> Result<bool, RegistryError> {
        Ok(self.current()?.is_some())
    }

    /// Claim the slot for `entry`. Fails without side effects if occupied.
    pub fn claim(&self, entry: &ActiveSessionEntry) -> Result<(), RegistryError> {
        let db = self.lock()?;
        if db.insert_active_session(entry)? {
            tracing::info!(
                "Registered active {} session {}",
                entry.kind,
                entry.session_id
            );
            return Ok(());
        }

        match db.get_active_session()? {
            Some(existing) => Err(RegistryError::Occupied(existing)),
            // Slot was freed between the insert and the read; report the
            // conflict against ourselves rather than retrying silently.
            None => Err(RegistryError::Occupied(entry.clone())),
        }
    }

    /// Refresh the phase and display fields of the registered session.
    ///
    /// Returns false if the slot no longer names this session.
    pub fn update_progress(
        &self,
        session_id: &Uuid,
        phase: SessionPhase,
        elapsed_s: f64,
        distance_m: f64,
    ) -> Result<bool, RegistryError> {
        let mut db = self.lock()?;
        let Some(mut entry) = db.get_active_session()? else {
            return Ok(false);
        };
        if entry.session_id != *session_id {
            return Ok(false);
        }

        entry.phase = phase;
        entry.elapsed_s = elapsed_s;
        entry.distance_m = distance_m;
        entry.updated_at = Utc::now();

        Ok(db.replace_active_session(&entry)?)
    }

    /// Release the slot held by `session_id`. Returns false if it held nothing.
    pub fn release(&self, session_id: &Uuid) -> Result<bool, RegistryError> {
        let released = self.lock()?.delete_active_session(session_id)?;
        if released {
            tracing::info!("Released active session {}", session_id);
        }
        Ok(released)
    }

    /// Clear the slot after the user confirmed discarding the governing session.
    pub fn discard(&self) -> Result<Option<ActiveSessionEntry>, RegistryError> {
        let db = self.lock()?;
        let current = db.get_active_session()?;
        if current.is_some() {
            db.clear_active_session()?;
            tracing::warn!("Discarded active session registry entry");
        }
        Ok(current)
    }
}
