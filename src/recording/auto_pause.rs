//! Speed-driven automatic pause with hysteresis.

use crate::recording::types::SessionStatus;
use crate::storage::config::RecordingSettings;

/// Transition requested by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoPauseAction {
    Pause,
    Resume,
}

/// Decides auto-pause transitions from fix speed.
///
/// The resume threshold sits above the pause threshold so a speed hovering
/// around one boundary cannot flap the state.
#[derive(Debug, Clone, Copy)]
pub struct AutoPauseDetector {
    enabled: bool,
    pause_below_mps: f64,
    resume_above_mps: f64,
}

impl AutoPauseDetector {
    pub fn new(enabled: bool, pause_below_mps: f64, resume_above_mps: f64) -> Self {
        Self {
            enabled,
            pause_below_mps,
            resume_above_mps,
        }
    }

    pub fn from_settings(settings: &RecordingSettings) -> Self {
        Self::new(
            settings.auto_pause,
            settings.pause_speed_mps,
            settings.resume_speed_mps,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Evaluate one sufficiently accurate fix.
    ///
    /// `status` must be `Paused` only when the pause was automatic; manual
    /// pauses are never resumed by speed.
    pub fn evaluate(&self, status: SessionStatus, speed_mps: f64) -> Option<AutoPauseAction> {
        if !self.enabled || !speed_mps.is_finite() {
            return None;
        }

        match status {
            SessionStatus::Recording if speed_mps < self.pause_below_mps => {
                Some(AutoPauseAction::Pause)
            }
            SessionStatus::Paused if speed_mps > self.resume_above_mps => {
                Some(AutoPauseAction::Resume)
            }
            _ => None,
        }
    }
}
