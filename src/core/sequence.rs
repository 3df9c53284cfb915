use uuid::Uuid;

use crate::core::distance::haversine_km;
use crate::models::{GeoPoint, Route};

const BONUS_PER_INTERMEDIATE_STOP: f64 = 0.1;
const MAX_FLEXIBILITY_BONUS: f64 = 0.2;

/// Closest stop of a route to one of the rider's ends
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopHit {
    /// Position in the route's ordered stop sequence
    pub index: usize,
    pub distance_km: f64,
}

/// Outcome of the precise, order-aware check for one route
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceMatch {
    pub route_id: Uuid,
    pub origin: StopHit,
    pub destination: Option<StopHit>,
    pub origin_covered: bool,
    pub destination_covered: bool,
    pub direction_ok: bool,
    pub coverage_score: f64,
}

impl SequenceMatch {
    /// Both ends served, in travel order
    pub fn is_exact(&self) -> bool {
        self.origin_covered && self.destination_covered && self.direction_ok
    }

    pub fn stops_between(&self) -> usize {
        match self.destination {
            Some(dest) if dest.index > self.origin.index => dest.index - self.origin.index - 1,
            _ => 0,
        }
    }
}

/// Precision half of candidate retrieval: the geo pre-filter only guarantees
/// some stop near some end, this checks both ends and their order.
#[derive(Debug, Clone, Copy)]
pub struct StopSequenceValidator {
    proximity_threshold_km: f64,
}

impl StopSequenceValidator {
    pub fn new(proximity_threshold_km: f64) -> Self {
        Self { proximity_threshold_km }
    }

    pub fn threshold_km(&self) -> f64 {
        self.proximity_threshold_km
    }

    /// 1 at the stop, 0 at the threshold
    #[inline]
    pub fn proximity_score(&self, distance_km: f64) -> f64 {
        (1.0 - distance_km / self.proximity_threshold_km).clamp(0.0, 1.0)
    }

    /// Returns `None` when the route must be dropped from the candidate set
    pub fn validate(
        &self,
        route: &Route,
        origin: GeoPoint,
        destination: Option<GeoPoint>,
    ) -> Option<SequenceMatch> {
        let origin_hit = closest_stop(route, origin)?;
        let origin_covered = origin_hit.distance_km <= self.proximity_threshold_km;
        if !origin_covered {
            return None;
        }

        let Some(dest_point) = destination else {
            return Some(SequenceMatch {
                route_id: route.id,
                origin: origin_hit,
                destination: None,
                origin_covered,
                destination_covered: false,
                direction_ok: true,
                coverage_score: self.proximity_score(origin_hit.distance_km),
            });
        };

        let dest_hit = closest_stop(route, dest_point)?;
        let destination_covered = dest_hit.distance_km <= self.proximity_threshold_km;
        let direction_ok = origin_hit.index < dest_hit.index;
        if !destination_covered || !direction_ok {
            return None;
        }

        let proximity = (self.proximity_score(origin_hit.distance_km)
            + self.proximity_score(dest_hit.distance_km))
            / 2.0;
        let intermediate = (dest_hit.index - origin_hit.index - 1) as f64;
        let bonus = (intermediate * BONUS_PER_INTERMEDIATE_STOP).min(MAX_FLEXIBILITY_BONUS);

        Some(SequenceMatch {
            route_id: route.id,
            origin: origin_hit,
            destination: Some(dest_hit),
            origin_covered,
            destination_covered,
            direction_ok,
            coverage_score: (proximity + bonus).clamp(0.0, 1.0),
        })
    }

    /// Validates every route, keeping survivors paired with their match
    pub fn apply(
        &self,
        routes: Vec<Route>,
        origin: GeoPoint,
        destination: Option<GeoPoint>,
    ) -> Vec<(Route, SequenceMatch)> {
        routes
            .into_iter()
            .filter_map(|route| {
                let matched = self.validate(&route, origin, destination)?;
                Some((route, matched))
            })
            .collect()
    }
}

impl Default for StopSequenceValidator {
    fn default() -> Self {
        Self::new(2.0)
    }
}

/// First stop wins on equal distance
fn closest_stop(route: &Route, point: GeoPoint) -> Option<StopHit> {
    route
        .stops
        .iter()
        .enumerate()
        .map(|(index, stop)| StopHit {
            index,
            distance_km: haversine_km(point, stop.stop.point()),
        })
        .fold(None, |best: Option<StopHit>, hit| match best {
            Some(current) if current.distance_km <= hit.distance_km => Some(current),
            _ => Some(hit),
        })
}
