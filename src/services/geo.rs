//! Geographic calculations

use crate::defaults::ROAD_COEFFICIENT;
use crate::types::Coordinates;

/// Earth radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers (haversine)
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Calculate Haversine distance between two points in kilometers
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    distance_km(from.lat, from.lng, to.lat, to.lng)
}

/// Estimate road distance from straight-line distance
pub fn road_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    haversine_distance(from, to) * ROAD_COEFFICIENT
}

/// Travel time in seconds for a distance at a constant average speed.
///
/// Degraded-quality data: only for explicit fallbacks, never in place of a
/// provider result.
pub fn time_from_distance(distance_km: f64, average_speed_kmh: f64) -> f64 {
    if average_speed_kmh <= 0.0 {
        return 0.0;
    }
    distance_km / average_speed_kmh * 3600.0
}
