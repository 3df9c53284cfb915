use geo::{HaversineDistance, Point};

use crate::models::{BoundingBox, GeoPoint};

/// Approximate kilometres per degree of latitude
const KM_PER_DEGREE: f64 = 111.0;

/// Great-circle distance between two points in metres
#[inline]
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let from = Point::new(a.lon, a.lat);
    let to = Point::new(b.lon, b.lat);
    from.haversine_distance(&to)
}

/// Great-circle distance between two points in kilometres
#[inline]
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_meters(a, b) / 1000.0
}

/// Square-ish box around `center`, used as a cheap reject before haversine
///
/// Longitude span grows with 1 / cos(latitude).
pub fn calculate_bounding_box(center: GeoPoint, radius_km: f64) -> BoundingBox {
    let lat_delta = radius_km / KM_PER_DEGREE;
    let lon_delta = radius_km / (KM_PER_DEGREE * center.lat.to_radians().cos().abs());

    BoundingBox {
        min_lat: center.lat - lat_delta,
        max_lat: center.lat + lat_delta,
        min_lon: center.lon - lon_delta,
        max_lon: center.lon + lon_delta,
    }
}

/// Inclusive on every edge
#[inline]
pub fn is_within_bounding_box(point: GeoPoint, bbox: &BoundingBox) -> bool {
    point.lat >= bbox.min_lat
        && point.lat <= bbox.max_lat
        && point.lon >= bbox.min_lon
        && point.lon <= bbox.max_lon
}

/// Box check first, exact distance only for points that survive it
pub fn within_radius_km(center: GeoPoint, point: GeoPoint, radius_km: f64) -> bool {
    let bbox = calculate_bounding_box(center, radius_km);
    is_within_bounding_box(point, &bbox) && haversine_km(center, point) <= radius_km
}
