//! Location source adapter.
//!
//! Foreground and background producers deliver [`Fix`]es that are
//! normalized into [`Sample`]s tagged with their [`FixSource`].

pub mod background;
pub mod gpx;
pub mod producer;
pub mod types;

pub use background::{
    BackgroundFixHandler, BackgroundLocation, BackgroundOutcome, NullBackgroundLocation,
    ReplayBackgroundLocation,
};
pub use producer::{FixSink, LocationEvent, LocationProducer, ReplayLocationProducer};
pub use types::{
    AccuracyTier, Fix, FixSource, LocationError, LocationRequest, PermissionState, Sample,
};
