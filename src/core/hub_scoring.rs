use crate::core::distance::haversine_meters;
use crate::models::{GeoPoint, Hub};

/// A hub this close to the rider counts as an exact match
pub const HUB_EXACT_METERS: f64 = 500.0;
/// A hub this close to the rider counts as nearby
pub const HUB_NEAR_METERS: f64 = 2000.0;

const NO_HUB_SCORE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Exact,
    Near,
    Far,
}

fn band(distance_m: Option<f64>) -> Band {
    match distance_m {
        Some(d) if d <= HUB_EXACT_METERS => Band::Exact,
        Some(d) if d <= HUB_NEAR_METERS => Band::Near,
        _ => Band::Far,
    }
}

/// Scores how well a route's curated hubs line up with the rider's raw
/// coordinates. A secondary ranking signal, never a filter.
///
/// Within each two-value band the pickup side earns the upper value.
#[derive(Debug, Clone, Copy, Default)]
pub struct HubCompatibilityScorer;

impl HubCompatibilityScorer {
    pub fn score(
        &self,
        origin_hub: Option<&Hub>,
        destination_hub: Option<&Hub>,
        rider_origin: GeoPoint,
        rider_destination: Option<GeoPoint>,
    ) -> f64 {
        if origin_hub.is_none() && destination_hub.is_none() {
            return NO_HUB_SCORE;
        }

        let origin_distance = origin_hub.map(|hub| haversine_meters(hub.point(), rider_origin));
        let destination_distance = match (destination_hub, rider_destination) {
            (Some(hub), Some(point)) => Some(haversine_meters(hub.point(), point)),
            _ => None,
        };

        Self::score_bands(band(origin_distance), band(destination_distance))
    }

    fn score_bands(origin: Band, destination: Band) -> f64 {
        use Band::*;
        match (origin, destination) {
            (Exact, Exact) => 1.0,
            (Exact, Near) => 0.8,
            (Near, Exact) => 0.6,
            (Exact, Far) => 0.7,
            (Far, Exact) => 0.5,
            (Near, Near) => 0.4,
            (Near, Far) => 0.3,
            (Far, Near) => 0.2,
            (Far, Far) => NO_HUB_SCORE,
        }
    }
}
