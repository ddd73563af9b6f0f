//! Geospatial math for outdoor tracking.
//!
//! Pure functions: great-circle distance, pace/speed conversions and grade.

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LatLon {
    pub latitude: f64,
    pub longitude: f64,
}

impl LatLon {
    /// Create a new coordinate.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance to another coordinate in meters.
    pub fn distance_to(&self, other: &LatLon) -> f64 {
        haversine_distance(self.latitude, self.longitude, other.latitude, other.longitude)
    }
}

/// Calculate horizontal distance between two GPS points (Haversine formula)
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Pace in seconds per kilometer for a speed in m/s.
///
/// Undefined (`None`) for non-positive or non-finite speeds.
pub fn pace_from_speed(speed_mps: f64) -> Option<f64> {
    if speed_mps.is_finite() && speed_mps > 0.0 {
        Some(1000.0 / speed_mps)
    } else {
        None
    }
}

/// Speed in m/s for a pace in seconds per kilometer.
pub fn speed_from_pace(pace_s_per_km: f64) -> Option<f64> {
    if pace_s_per_km.is_finite() && pace_s_per_km > 0.0 {
        Some(1000.0 / pace_s_per_km)
    } else {
        None
    }
}

/// Average pace for a distance covered in a duration.
pub fn average_pace(distance_m: f64, duration_s: f64) -> Option<f64> {
    if distance_m <= 0.0 || duration_s <= 0.0 {
        return None;
    }
    Some(duration_s / (distance_m / 1000.0))
}

/// Average speed in m/s, zero when nothing was covered.
pub fn average_speed(distance_m: f64, duration_s: f64) -> f64 {
    if duration_s <= 0.0 {
        return 0.0;
    }
    distance_m / duration_s
}

/// Speed in km/h from m/s.
pub fn mps_to_kmh(speed_mps: f64) -> f64 {
    speed_mps * 3.6
}

/// Calculate gradient between two points, in percent
pub fn calculate_grade(elevation_change_m: f64, horizontal_distance_m: f64) -> f64 {
    if horizontal_distance_m < 0.1 {
        return 0.0;
    }
    elevation_change_m / horizontal_distance_m * 100.0
}

/// Format a pace as `m:ss` per kilometer.
pub fn format_pace(pace_s_per_km: Option<f64>) -> String {
    match pace_s_per_km {
        Some(pace) if pace.is_finite() => {
            let total = pace.round() as u64;
            format!("{}:{:02}", total / 60, total % 60)
        }
        _ => "--:--".to_string(),
    }
}
