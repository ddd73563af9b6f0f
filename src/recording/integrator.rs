//! Distance, elevation and speed accumulation from foreground fixes.

use crate::geo::{calculate_grade, pace_from_speed, LatLon};
use crate::location::types::Fix;
use crate::storage::config::RecordingSettings;
use serde::{Deserialize, Serialize};

/// How a fix was treated by the integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixVerdict {
    /// First accurate fix; becomes the reference point
    FirstPoint,
    /// Distance accumulated and reference advanced
    Accepted,
    /// Accuracy worse than the threshold; sampled only
    Inaccurate,
    /// Jump too large to be real movement; reference kept
    Spike,
}

/// Result of integrating one fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Integration {
    pub verdict: FixVerdict,
    /// Distance added by this fix
    pub distance_delta_m: f64,
    /// Grade over the accepted step, when both ends have altitude
    pub grade_pct: Option<f64>,
}

impl Integration {
    /// Whether the fix passed the accuracy gate.
    pub fn is_accurate(&self) -> bool {
        self.verdict != FixVerdict::Inaccurate
    }
}

/// Accumulated state, persisted in checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegratorState {
    pub distance_m: f64,
    pub elev_gain_m: f64,
    pub max_speed_mps: f64,
    pub current_speed_mps: f64,
    pub last_accepted: Option<LatLon>,
    pub last_altitude_m: Option<f64>,
}

/// Integrates foreground fixes into session metrics.
#[derive(Debug, Clone)]
pub struct MetricIntegrator {
    good_accuracy_m: f64,
    spike_distance_m: f64,
    elevation_noise_m: f64,
    state: IntegratorState,
}

impl MetricIntegrator {
    pub fn new(settings: &RecordingSettings) -> Self {
        Self {
            good_accuracy_m: settings.good_accuracy_m,
            spike_distance_m: settings.spike_distance_m,
            elevation_noise_m: settings.elevation_noise_m,
            state: IntegratorState::default(),
        }
    }

    /// Restore accumulated state from a checkpoint.
    pub fn with_state(mut self, state: IntegratorState) -> Self {
        self.state = state;
        self
    }

    pub fn reset(&mut self) {
        self.state = IntegratorState::default();
    }

    pub fn state(&self) -> &IntegratorState {
        &self.state
    }

    pub fn distance_m(&self) -> f64 {
        self.state.distance_m
    }

    pub fn elev_gain_m(&self) -> f64 {
        self.state.elev_gain_m
    }

    pub fn max_speed_mps(&self) -> f64 {
        self.state.max_speed_mps
    }

    pub fn current_speed_mps(&self) -> f64 {
        self.state.current_speed_mps
    }

    /// Current pace in s/km, undefined when standing still.
    pub fn current_pace_s_per_km(&self) -> Option<f64> {
        pace_from_speed(self.state.current_speed_mps)
    }

    /// Whether a fix is accurate enough to integrate. Unknown accuracy passes.
    pub fn is_accurate(&self, fix: &Fix) -> bool {
        fix.accuracy_m.map_or(true, |acc| acc <= self.good_accuracy_m)
    }

    /// Integrate one fix.
    pub fn ingest(&mut self, fix: &Fix) -> Integration {
        // Speed is tracked for every fix, accurate or not.
        let speed = fix.speed_or_zero();
        self.state.current_speed_mps = speed;
        if speed > self.state.max_speed_mps {
            self.state.max_speed_mps = speed;
        }

        if !self.is_accurate(fix) {
            return Integration {
                verdict: FixVerdict::Inaccurate,
                distance_delta_m: 0.0,
                grade_pct: None,
            };
        }

        let climb = self.track_elevation(fix.altitude_m);
        let position = fix.position();

        let Some(last) = self.state.last_accepted else {
            self.state.last_accepted = Some(position);
            return Integration {
                verdict: FixVerdict::FirstPoint,
                distance_delta_m: 0.0,
                grade_pct: None,
            };
        };

        let delta = last.distance_to(&position);
        if delta >= self.spike_distance_m {
            tracing::debug!("Ignoring {:.1} m GPS spike", delta);
            return Integration {
                verdict: FixVerdict::Spike,
                distance_delta_m: 0.0,
                grade_pct: None,
            };
        }

        self.state.distance_m += delta;
        self.state.last_accepted = Some(position);

        Integration {
            verdict: FixVerdict::Accepted,
            distance_delta_m: delta,
            grade_pct: climb.map(|change| calculate_grade(change, delta)),
        }
    }

    /// Update elevation gain; returns the raw altitude change when known.
    fn track_elevation(&mut self, altitude_m: Option<f64>) -> Option<f64> {
        let altitude = altitude_m?;
        let previous = self.state.last_altitude_m.replace(altitude)?;
        let change = altitude - previous;
        if change > self.elevation_noise_m {
            self.state.elev_gain_m += change;
        }
        Some(change)
    }
}
