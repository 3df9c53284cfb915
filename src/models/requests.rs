use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::domain::GeoPoint;

/// Request to find carpool routes for a rider
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_destination_pair"))]
pub struct MatchRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "riderId")]
    pub rider_id: String,
    #[validate(range(min = -90.0, max = 90.0))]
    #[serde(alias = "originLat")]
    pub origin_lat: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    #[serde(alias = "originLon")]
    pub origin_lon: f64,
    #[validate(range(min = -90.0, max = 90.0))]
    #[serde(default, alias = "destLat")]
    pub dest_lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    #[serde(default, alias = "destLon")]
    pub dest_lon: Option<f64>,
    #[serde(alias = "desiredTime")]
    pub desired_time: NaiveDateTime,
    #[validate(range(min = 0.0))]
    #[serde(default, alias = "maxPrice")]
    pub max_price: Option<f64>,
    #[validate(range(min = 1))]
    #[serde(default = "default_min_seats", alias = "minSeats")]
    pub min_seats: u32,
    #[validate(range(min = 0.1, max = 20.0))]
    #[serde(default = "default_radius_km", alias = "radiusKm")]
    pub radius_km: f64,
}

impl MatchRequest {
    pub fn origin(&self) -> GeoPoint {
        GeoPoint::new(self.origin_lat, self.origin_lon)
    }

    /// Destination point, present only when both coordinates were supplied
    pub fn destination(&self) -> Option<GeoPoint> {
        match (self.dest_lat, self.dest_lon) {
            (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)),
            _ => None,
        }
    }

    pub fn radius_meters(&self) -> f64 {
        self.radius_km * 1000.0
    }
}

fn default_min_seats() -> u32 {
    1
}

fn default_radius_km() -> f64 {
    5.0
}

fn validate_destination_pair(request: &MatchRequest) -> Result<(), ValidationError> {
    if request.dest_lat.is_some() != request.dest_lon.is_some() {
        let mut error = ValidationError::new("destination_pair");
        error.message = Some("dest_lat and dest_lon must be provided together".into());
        return Err(error);
    }
    Ok(())
}

/// Query for routes running between two known hubs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubRoutesQuery {
    #[serde(alias = "originHubId")]
    pub origin_hub_id: Uuid,
    #[serde(alias = "destinationHubId")]
    pub destination_hub_id: Uuid,
    pub time: NaiveTime,
    #[serde(default, alias = "windowMinutes")]
    pub window_minutes: Option<u32>,
}
