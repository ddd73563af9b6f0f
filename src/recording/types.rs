//! Recording types: session record, splits, live summary and errors.

use crate::location::types::LocationError;
use crate::recording::integrator::IntegratorState;
use crate::recording::splits::SplitTracker;
use crate::storage::database::DatabaseError;
use crate::storage::registry::{RegistryError, SessionKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Status of the session engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session, or resting after completion
    #[default]
    Idle,
    /// Actively recording
    Recording,
    /// Recording paused (manually or automatically)
    Paused,
    /// Stopping producers and persisting
    Saving,
    /// Finished and persisted
    Completed,
    /// Canceled by the user
    Canceled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Recording => "recording",
            SessionStatus::Paused => "paused",
            SessionStatus::Saving => "saving",
            SessionStatus::Completed => "completed",
            SessionStatus::Canceled => "canceled",
        }
    }

    /// Recording or paused: the session holds the registry slot.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Recording | SessionStatus::Paused)
    }

    /// A new session may be started from this status.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionStatus::Idle | SessionStatus::Completed | SessionStatus::Canceled
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of outdoor activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    #[default]
    Run,
    Walk,
    Hike,
}

impl ActivityType {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityType::Run => "Run",
            ActivityType::Walk => "Walk",
            ActivityType::Hike => "Hike",
        }
    }
}

impl std::str::FromStr for ActivityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "run" => Ok(ActivityType::Run),
            "walk" => Ok(ActivityType::Walk),
            "hike" => Ok(ActivityType::Hike),
            other => Err(format!("Unknown activity type: {}", other)),
        }
    }
}

/// Who can see a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    #[default]
    Followers,
    Private,
}

/// Why the session is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseReason {
    /// User pressed pause (or the session was restored)
    Manual,
    /// Auto-pause detector saw the user stop
    Auto,
}

/// Kind of split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    /// One per configured split distance (default 1 km)
    AutoKm,
    /// User lap
    Manual,
}

/// A contiguous sub-interval of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub kind: SplitKind,
    /// 1-based, per kind
    pub index: u32,
    pub distance_m: f64,
    pub duration_s: f64,
    pub avg_pace_s_per_km: Option<f64>,
    pub start_elapsed_s: f64,
    pub end_elapsed_s: f64,
}

/// Parameters for starting a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    pub activity_type: ActivityType,
    pub privacy: Privacy,
    /// IANA timezone name of the device
    pub timezone: String,
    pub title: Option<String>,
}

impl StartRequest {
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            activity_type,
            privacy: Privacy::default(),
            timezone: "UTC".to_string(),
            title: None,
        }
    }

    pub fn with_privacy(mut self, privacy: Privacy) -> Self {
        self.privacy = privacy;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A recorded outdoor session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Identifier assigned by the remote store
    pub id: Uuid,
    pub activity_type: ActivityType,
    pub status: SessionStatus,
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub privacy: Privacy,
    pub timezone: String,
    /// Elapsed plus paused seconds
    pub duration_s: f64,
    pub moving_time_s: f64,
    pub paused_time_s: f64,
    pub distance_m: f64,
    pub elev_gain_m: f64,
    pub max_speed_mps: f64,
    pub avg_speed_mps: f64,
    pub avg_pace_s_per_km: Option<f64>,
    pub splits: Vec<Split>,
}

impl Session {
    pub fn new(id: Uuid, request: &StartRequest, started_at: DateTime<Utc>) -> Self {
        let title = request
            .title
            .clone()
            .unwrap_or_else(|| request.activity_type.label().to_string());
        Self {
            id,
            activity_type: request.activity_type,
            status: SessionStatus::Recording,
            title,
            started_at,
            ended_at: None,
            privacy: request.privacy,
            timezone: request.timezone.clone(),
            duration_s: 0.0,
            moving_time_s: 0.0,
            paused_time_s: 0.0,
            distance_m: 0.0,
            elev_gain_m: 0.0,
            max_speed_mps: 0.0,
            avg_speed_mps: 0.0,
            avg_pace_s_per_km: None,
            splits: Vec::new(),
        }
    }
}

/// Live values for display while a session runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveSummary {
    pub status: SessionStatus,
    pub session_id: Option<Uuid>,
    pub elapsed_s: f64,
    pub moving_time_s: f64,
    pub paused_time_s: f64,
    pub distance_m: f64,
    pub elev_gain_m: f64,
    pub max_speed_mps: f64,
    pub current_speed_mps: f64,
    pub current_pace_s_per_km: Option<f64>,
    /// Samples produced by the foreground producer
    pub sample_count: u64,
    pub auto_paused: bool,
}

/// Snapshot persisted periodically so a session survives a process restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub session: Session,
    pub integrator: IntegratorState,
    pub splits: SplitTracker,
    pub elapsed_s: f64,
    pub moving_time_s: f64,
    pub paused_time_s: f64,
    pub last_sample_elapsed_s: f64,
    pub sample_count: u64,
    pub used_auto_pause: bool,
    pub saved_at: DateTime<Utc>,
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged {
        session_id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    },
    AutoPaused(Uuid),
    AutoResumed(Uuid),
    SplitRecorded(Split),
    /// A batch reached the remote store
    SamplesDelivered { session_id: Uuid, count: usize },
    /// A batch was moved to the durable queue
    SamplesQueued { session_id: Uuid, count: usize },
    FinishFailed { session_id: Uuid, reason: String },
}

/// Errors from the session engine.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// Foreground location permission refused
    #[error("Location permission denied")]
    PermissionDenied,

    /// Another session holds the active-session registry
    #[error("Another {kind} session is active ({session_id})")]
    ConflictingActiveSession { kind: SessionKind, session_id: Uuid },

    /// Final persist failed; the session is paused and finish may be retried
    #[error("Failed to persist session: {0}")]
    FinishPersistFailure(String),

    /// Control not allowed in the current status
    #[error("Cannot {action} while {from}")]
    InvalidTransition {
        from: SessionStatus,
        action: &'static str,
    },

    /// Storage is full or critically low
    #[error("Storage is full - cannot start recording")]
    StorageFull,

    /// Remote session could not be created or producers failed to start
    #[error("Failed to start session: {0}")]
    StartFailed(String),

    /// A restored session could not be rebuilt
    #[error("Failed to recover session: {0}")]
    RecoveryFailed(String),

    /// The driver task is gone
    #[error("Session driver has stopped")]
    DriverStopped,

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

impl From<RegistryError> for RecorderError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Occupied(entry) => RecorderError::ConflictingActiveSession {
                kind: entry.kind,
                session_id: entry.session_id,
            },
            RegistryError::Storage(e) => RecorderError::Storage(e),
        }
    }
}
