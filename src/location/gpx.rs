//! GPX track import for replaying recorded routes.

use super::types::{Fix, LocationError};
use crate::geo::haversine_distance;
use chrono::{DateTime, Duration, Utc};
use std::path::Path;

/// Spacing used when a track carries no timestamps.
const DEFAULT_POINT_SPACING_SECS: i64 = 1;

/// Convert gpx::Time to chrono DateTime<Utc>.
fn gpx_time_to_chrono(time: gpx::Time) -> Option<DateTime<Utc>> {
    let formatted = time.format().ok()?;
    DateTime::parse_from_rfc3339(&formatted)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Load fixes from a GPX file on disk.
pub fn load_fixes(path: &Path) -> Result<Vec<Fix>, LocationError> {
    let content = std::fs::read(path)
        .map_err(|e| LocationError::ImportFailed(format!("{}: {}", path.display(), e)))?;
    parse_fixes(&content)
}

/// Parse fixes from GPX content.
///
/// Track points are used first, then route points. Points without a
/// timestamp are spaced one second after their predecessor. Speed is taken
/// from the point when present, otherwise derived from the previous point.
pub fn parse_fixes(content: &[u8]) -> Result<Vec<Fix>, LocationError> {
    let gpx_data: gpx::Gpx = gpx::read(content)
        .map_err(|e| LocationError::ImportFailed(format!("GPX parse error: {}", e)))?;

    let mut waypoints: Vec<gpx::Waypoint> = gpx_data
        .tracks
        .into_iter()
        .flat_map(|track| track.segments)
        .flat_map(|segment| segment.points)
        .collect();

    if waypoints.is_empty() {
        waypoints = gpx_data
            .routes
            .into_iter()
            .flat_map(|route| route.points)
            .collect();
    }

    if waypoints.is_empty() {
        return Err(LocationError::ImportFailed(
            "No track or route points found in GPX file".to_string(),
        ));
    }

    let mut fixes: Vec<Fix> = Vec::with_capacity(waypoints.len());
    for point in waypoints {
        let latitude = point.point().y();
        let longitude = point.point().x();

        let timestamp = match point.time.and_then(gpx_time_to_chrono) {
            Some(ts) => ts,
            None => match fixes.last() {
                Some(prev) => prev.timestamp + Duration::seconds(DEFAULT_POINT_SPACING_SECS),
                None => Utc::now(),
            },
        };

        let mut fix = Fix::new(latitude, longitude, timestamp);
        fix.altitude_m = point.elevation;
        // Horizontal dilution is the closest GPX has to an accuracy radius.
        fix.accuracy_m = point.hdop.map(|hdop| hdop * 5.0);
        fix.speed_mps = point.speed.or_else(|| {
            let prev = fixes.last()?;
            let dt = (timestamp - prev.timestamp).num_milliseconds() as f64 / 1000.0;
            if dt <= 0.0 {
                return None;
            }
            Some(haversine_distance(prev.latitude, prev.longitude, latitude, longitude) / dt)
        });

        fixes.push(fix);
    }

    tracing::info!("Loaded {} fixes from GPX", fixes.len());
    Ok(fixes)
}
