//! Location types: raw fixes, normalized samples and producer configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::geo::LatLon;

/// Which producer delivered a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixSource {
    /// High-frequency producer, active only while recording in the foreground
    Foreground,
    /// Low-frequency deferred producer that survives app backgrounding
    Background,
}

impl std::fmt::Display for FixSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixSource::Foreground => write!(f, "foreground"),
            FixSource::Background => write!(f, "background"),
        }
    }
}

/// One device location reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Altitude above sea level in meters
    pub altitude_m: Option<f64>,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: Option<f64>,
    /// Instantaneous speed in m/s
    pub speed_mps: Option<f64>,
    /// Course over ground in degrees
    pub bearing_deg: Option<f64>,
    /// Device timestamp of the reading
    pub timestamp: DateTime<Utc>,
}

impl Fix {
    /// Create a fix at a position with no optional metadata.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude_m: None,
            accuracy_m: None,
            speed_mps: None,
            bearing_deg: None,
            timestamp,
        }
    }

    pub fn with_accuracy(mut self, accuracy_m: f64) -> Self {
        self.accuracy_m = Some(accuracy_m);
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = Some(altitude_m);
        self
    }

    pub fn with_bearing(mut self, bearing_deg: f64) -> Self {
        self.bearing_deg = Some(bearing_deg);
        self
    }

    /// Position of this fix.
    pub fn position(&self) -> LatLon {
        LatLon::new(self.latitude, self.longitude)
    }

    /// Reported speed, treating missing or negative values as zero.
    pub fn speed_or_zero(&self) -> f64 {
        self.speed_mps.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(0.0)
    }
}

/// A normalized, persisted record derived from a fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Owning session
    pub session_id: Uuid,
    /// Wall-clock time the fix was taken
    pub recorded_at: DateTime<Utc>,
    /// Session elapsed time when the sample was captured
    pub elapsed_s: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: Option<f64>,
    pub accuracy_m: Option<f64>,
    pub speed_mps: Option<f64>,
    pub bearing_deg: Option<f64>,
    /// Not captured yet; reserved for paired sensors
    pub heart_rate_bpm: Option<u8>,
    /// Not captured yet; reserved for paired sensors
    pub cadence_spm: Option<u16>,
    /// Grade against the previous accepted fix, in percent
    pub grade_pct: Option<f64>,
    /// Whether the session was recording (not paused) at capture time
    pub is_moving: bool,
    /// Producer that delivered the fix
    pub source: FixSource,
}

impl Sample {
    /// Build a sample from a fix captured at `elapsed_s` into the session.
    pub fn from_fix(session_id: Uuid, fix: &Fix, elapsed_s: f64, source: FixSource) -> Self {
        Self {
            session_id,
            recorded_at: fix.timestamp,
            elapsed_s,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude_m: fix.altitude_m,
            accuracy_m: fix.accuracy_m,
            speed_mps: fix.speed_mps,
            bearing_deg: fix.bearing_deg,
            heart_rate_bpm: None,
            cadence_spm: None,
            grade_pct: None,
            is_moving: false,
            source,
        }
    }
}

/// Desired accuracy tier for a location subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyTier {
    /// Best available (GNSS)
    High,
    /// Balanced power/accuracy
    Balanced,
    /// Coarse network location
    Low,
}

/// Accuracy/interval configuration handed to a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    pub accuracy: AccuracyTier,
    /// Minimum time between fixes in milliseconds
    pub interval_ms: u64,
    /// Minimum movement between fixes in meters
    pub distance_filter_m: f64,
    /// Allow the platform to batch and deliver fixes late
    pub deferred: bool,
}

impl LocationRequest {
    /// High-frequency request for the foreground producer.
    pub fn foreground() -> Self {
        Self {
            accuracy: AccuracyTier::High,
            interval_ms: 1_000,
            distance_filter_m: 2.0,
            deferred: false,
        }
    }

    /// Low-frequency deferred request for the background producer.
    pub fn background() -> Self {
        Self {
            accuracy: AccuracyTier::Balanced,
            interval_ms: 5_000,
            distance_filter_m: 10.0,
            deferred: true,
        }
    }
}

/// Platform permission state for a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not asked yet
    Undetermined,
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        matches!(self, PermissionState::Granted)
    }
}

/// Errors from location producers.
#[derive(Debug, Error)]
pub enum LocationError {
    /// User refused location access
    #[error("Location permission denied")]
    PermissionDenied,

    /// Runtime has no background location module
    #[error("Background location is not available on this runtime")]
    BackgroundCapabilityUnavailable,

    /// Producer failed to start
    #[error("Location producer failed: {0}")]
    ProducerFailed(String),

    /// GPX file could not be read
    #[error("Failed to import track: {0}")]
    ImportFailed(String),
}
