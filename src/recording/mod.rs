//! Outdoor session recording: metric integration, auto-pause, splits and
//! the session state machine.

pub mod auto_pause;
pub mod driver;
pub mod engine;
pub mod integrator;
pub mod splits;
pub mod types;

pub use auto_pause::{AutoPauseAction, AutoPauseDetector};
pub use driver::{SessionCommand, SessionDriver, SessionHandle};
pub use engine::SessionEngine;
pub use integrator::{FixVerdict, Integration, IntegratorState, MetricIntegrator};
pub use splits::SplitTracker;
pub use types::{
    ActivityType, LiveSummary, PauseReason, Privacy, RecorderError, Session, SessionCheckpoint,
    SessionEvent, SessionStatus, Split, SplitKind, StartRequest,
};
