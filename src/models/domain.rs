use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A WGS84 coordinate pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Lifecycle state of a recurring route, owned by the route service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteStatus {
    Active,
    Paused,
    Cancelled,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Active => "ACTIVE",
            RouteStatus::Paused => "PAUSED",
            RouteStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRouteStatus(pub String);

impl fmt::Display for UnknownRouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown route status '{}'", self.0)
    }
}

impl std::error::Error for UnknownRouteStatus {}

impl FromStr for RouteStatus {
    type Err = UnknownRouteStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(RouteStatus::Active),
            "PAUSED" => Ok(RouteStatus::Paused),
            "CANCELLED" | "CANCELED" => Ok(RouteStatus::Cancelled),
            _ => Err(UnknownRouteStatus(s.to_string())),
        }
    }
}

/// A geographic point on some route's path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub zone: Option<String>,
}

impl Stop {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// A curated pickup/dropoff point, coarser than a stop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hub {
    pub id: Uuid,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub area: Option<String>,
}

impl Hub {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// One entry of a route's ordered stop sequence.
///
/// The first stop has offset 0 and price 0; offsets and prices never decrease
/// with `stop_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStop {
    pub route_id: Uuid,
    pub stop: Stop,
    pub stop_order: i32,
    pub planned_arrival_offset_minutes: i32,
    pub price_from_origin: f64,
}

/// A recurring carpool route as seen by the matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub vehicle_id: Uuid,
    pub name: String,
    pub departure_time: NaiveTime,
    /// ISO weekdays (1 = Monday .. 7 = Sunday)
    #[serde(default)]
    pub active_days: Vec<u8>,
    pub seats_total: u32,
    pub seats_available: u32,
    pub base_price: f64,
    pub status: RouteStatus,
    #[serde(default)]
    pub origin_hub_id: Option<Uuid>,
    #[serde(default)]
    pub destination_hub_id: Option<Uuid>,
    #[serde(default)]
    pub stops: Vec<RouteStop>,
}

impl Route {
    /// ACTIVE with at least one free seat
    pub fn is_bookable(&self) -> bool {
        self.status == RouteStatus::Active && self.seats_available > 0
    }

    pub fn has_hubs(&self) -> bool {
        self.origin_hub_id.is_some() || self.destination_hub_id.is_some()
    }

    /// Share of seats still available, 0 when the vehicle reports no seats
    pub fn utilization(&self) -> f64 {
        if self.seats_total == 0 {
            return 0.0;
        }
        self.seats_available as f64 / self.seats_total as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverTier {
    New,
    Regular,
    Trusted,
    Elite,
}

impl FromStr for DriverTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(DriverTier::New),
            "regular" => Ok(DriverTier::Regular),
            "trusted" => Ok(DriverTier::Trusted),
            "elite" => Ok(DriverTier::Elite),
            other => Err(format!("unknown driver tier '{}'", other)),
        }
    }
}

/// Aggregated reputation data for a driver, maintained outside this service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
    pub driver_id: Uuid,
    pub rating_avg: f64,
    pub rating_count: u32,
    pub cancellation_rate: f64,
    pub completed_trips: u32,
    pub tier: DriverTier,
}

impl DriverStats {
    /// Placeholder for drivers the aggregate has no row for yet
    pub fn new_driver(driver_id: Uuid) -> Self {
        Self {
            driver_id,
            rating_avg: 0.0,
            rating_count: 0,
            cancellation_rate: 0.0,
            completed_trips: 0,
            tier: DriverTier::New,
        }
    }

    /// Average rating, or `None` when nobody has rated the driver yet
    pub fn rating(&self) -> Option<f64> {
        (self.rating_count > 0).then(|| self.rating_avg.clamp(0.0, 5.0))
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Weights of the four rule-based sub-scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub route_match: f64,
    pub time_match: f64,
    pub rating: f64,
    pub price: f64,
}

impl ScoringWeights {
    pub const SUM_TOLERANCE: f64 = 0.01;

    pub fn sum(&self) -> f64 {
        self.route_match + self.time_match + self.rating + self.price
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() <= Self::SUM_TOLERANCE
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            route_match: 0.40,
            time_match: 0.30,
            rating: 0.15,
            price: 0.15,
        }
    }
}

/// The four rule-based sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub route_match: f64,
    pub time_match: f64,
    pub rating: f64,
    pub price: f64,
}

impl ScoreBreakdown {
    pub fn composite(&self, weights: &ScoringWeights) -> f64 {
        let total = self.route_match * weights.route_match
            + self.time_match * weights.time_match
            + self.rating * weights.rating
            + self.price * weights.price;
        total.clamp(0.0, 1.0)
    }
}
