//! Unit tests for geospatial math.

use rustrun::geo::{
    average_pace, average_speed, calculate_grade, format_pace, haversine_distance,
    pace_from_speed, speed_from_pace, LatLon,
};

#[test]
fn test_haversine_one_degree_of_latitude() {
    let d = haversine_distance(0.0, 0.0, 1.0, 0.0);
    assert!((d - 111_194.93).abs() < 0.5);
}

#[test]
fn test_haversine_symmetric_and_zero() {
    let a = LatLon::new(45.52, -122.68);
    let b = LatLon::new(45.53, -122.66);
    assert!((a.distance_to(&b) - b.distance_to(&a)).abs() < 1e-9);
    assert_eq!(a.distance_to(&a), 0.0);
}

#[test]
fn test_pace_and_speed_are_inverse() {
    let pace = pace_from_speed(2.5).unwrap();
    assert!((pace - 400.0).abs() < 1e-9);
    assert!((speed_from_pace(pace).unwrap() - 2.5).abs() < 1e-9);
    assert!(pace_from_speed(0.0).is_none());
    assert!(pace_from_speed(f64::NAN).is_none());
}

#[test]
fn test_averages() {
    assert_eq!(average_pace(5000.0, 1500.0), Some(300.0));
    assert_eq!(average_pace(0.0, 100.0), None);
    assert_eq!(average_speed(1000.0, 400.0), 2.5);
    assert_eq!(average_speed(1000.0, 0.0), 0.0);
}

#[test]
fn test_grade_and_formatting() {
    assert!((calculate_grade(5.0, 100.0) - 5.0).abs() < 1e-9);
    assert_eq!(calculate_grade(5.0, 0.0), 0.0);
    assert_eq!(format_pace(Some(359.6)), "6:00");
}
