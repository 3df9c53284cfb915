use async_trait::async_trait;
use chrono::NaiveTime;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::{DriverStats, GeoPoint, Hub, Route};

/// Broad spatial query: any stop near the origin OR near the destination
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearbyQuery {
    pub origin: GeoPoint,
    pub destination: Option<GeoPoint>,
    pub radius_meters: f64,
    pub max_results: usize,
}

/// Read-only access to routes owned by the route service
#[async_trait]
pub trait RouteRepository: Send + Sync {
    /// Up to `max_results` distinct, ACTIVE routes with free seats that have
    /// at least one stop inside the radius of either end.
    async fn find_nearby(&self, query: &NearbyQuery) -> Result<Vec<Route>, RepositoryError>;

    /// Subset of `route_ids` departing within ±window of `desired`
    async fn filter_by_time_window(
        &self,
        route_ids: &[Uuid],
        desired: NaiveTime,
        window_minutes: u32,
    ) -> Result<Vec<Uuid>, RepositoryError>;

    /// Routes registered against the given hubs; `None` matches any hub
    async fn find_routes_by_hubs(
        &self,
        origin_hub: Option<Uuid>,
        destination_hub: Option<Uuid>,
        active_only: bool,
    ) -> Result<Vec<Route>, RepositoryError>;
}

/// Read-only access to curated hubs
#[async_trait]
pub trait HubRepository: Send + Sync {
    /// Hubs within `radius_meters`, nearest first
    async fn find_hubs_near(
        &self,
        center: GeoPoint,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<Hub>, RepositoryError>;

    async fn get_hubs(&self, ids: &[Uuid]) -> Result<Vec<Hub>, RepositoryError>;
}

/// Externally maintained driver reputation aggregate
#[async_trait]
pub trait DriverStatsSource: Send + Sync {
    /// One entry per requested id; drivers without aggregate rows come back
    /// as [`DriverStats::new_driver`].
    async fn get_batch(&self, driver_ids: &[Uuid]) -> Result<HashMap<Uuid, DriverStats>, RepositoryError>;
}
