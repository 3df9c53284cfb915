// Shared in-memory collaborators for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use carpool_match::config::MatchingConfig;
use carpool_match::core::{time_diff_minutes, GeoCandidateFinder, MatchingOrchestrator};
use carpool_match::error::RepositoryError;
use carpool_match::models::{
    DriverStats, DriverTier, GeoPoint, Hub, MatchRequest, Route, RouteStatus, RouteStop, Stop,
};
use carpool_match::services::{
    CacheError, CacheStore, DriverStatsCache, DriverStatsSource, HubCache, HubRepository,
    InvalidationChannel, InvalidationEvent, LocalCacheStore, NearbyQuery, RouteCache, RouteRepository,
};
use carpool_match::core::haversine_meters;
use chrono::{NaiveDateTime, NaiveTime};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const ORIGIN: GeoPoint = GeoPoint { lat: 12.9716, lon: 77.5946 };
pub const DESTINATION: GeoPoint = GeoPoint { lat: 12.9352, lon: 77.6245 };

/// Roughly 110 m of latitude
pub const NUDGE: f64 = 0.001;

pub struct InMemoryRoutes {
    routes: Vec<Route>,
    fail: bool,
    pub nearby_calls: AtomicUsize,
}

impl InMemoryRoutes {
    pub fn new(routes: Vec<Route>) -> Self {
        Self {
            routes,
            fail: false,
            nearby_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            routes: Vec::new(),
            fail: true,
            nearby_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RouteRepository for InMemoryRoutes {
    async fn find_nearby(&self, query: &NearbyQuery) -> Result<Vec<Route>, RepositoryError> {
        self.nearby_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RepositoryError::Unavailable("spatial index offline".to_string()));
        }

        let near = |point: GeoPoint| haversine_meters(point, query.origin) <= query.radius_meters
            || query
                .destination
                .map(|d| haversine_meters(point, d) <= query.radius_meters)
                .unwrap_or(false);

        Ok(self
            .routes
            .iter()
            .filter(|r| r.status == RouteStatus::Active && r.seats_available > 0)
            .filter(|r| r.stops.iter().any(|s| near(s.stop.point())))
            .take(query.max_results)
            .cloned()
            .collect())
    }

    async fn filter_by_time_window(
        &self,
        route_ids: &[Uuid],
        desired: NaiveTime,
        window_minutes: u32,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        Ok(self
            .routes
            .iter()
            .filter(|r| route_ids.contains(&r.id))
            .filter(|r| time_diff_minutes(r.departure_time, desired) <= i64::from(window_minutes))
            .map(|r| r.id)
            .collect())
    }

    async fn find_routes_by_hubs(
        &self,
        origin_hub: Option<Uuid>,
        destination_hub: Option<Uuid>,
        active_only: bool,
    ) -> Result<Vec<Route>, RepositoryError> {
        Ok(self
            .routes
            .iter()
            .filter(|r| origin_hub.is_none() || r.origin_hub_id == origin_hub)
            .filter(|r| destination_hub.is_none() || r.destination_hub_id == destination_hub)
            .filter(|r| !active_only || r.status == RouteStatus::Active)
            .cloned()
            .collect())
    }
}

pub struct InMemoryHubs {
    hubs: Vec<Hub>,
}

impl InMemoryHubs {
    pub fn new(hubs: Vec<Hub>) -> Self {
        Self { hubs }
    }
}

#[async_trait]
impl HubRepository for InMemoryHubs {
    async fn find_hubs_near(
        &self,
        center: GeoPoint,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<Hub>, RepositoryError> {
        let mut near: Vec<Hub> = self
            .hubs
            .iter()
            .filter(|h| haversine_meters(center, h.point()) <= radius_meters)
            .cloned()
            .collect();
        near.sort_by(|a, b| {
            haversine_meters(center, a.point())
                .partial_cmp(&haversine_meters(center, b.point()))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        near.truncate(limit);
        Ok(near)
    }

    async fn get_hubs(&self, ids: &[Uuid]) -> Result<Vec<Hub>, RepositoryError> {
        Ok(self.hubs.iter().filter(|h| ids.contains(&h.id)).cloned().collect())
    }
}

pub struct InMemoryDriverStats {
    stats: HashMap<Uuid, DriverStats>,
    fail: bool,
}

impl InMemoryDriverStats {
    pub fn new(stats: Vec<DriverStats>) -> Self {
        Self {
            stats: stats.into_iter().map(|s| (s.driver_id, s)).collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            stats: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl DriverStatsSource for InMemoryDriverStats {
    async fn get_batch(&self, driver_ids: &[Uuid]) -> Result<HashMap<Uuid, DriverStats>, RepositoryError> {
        if self.fail {
            return Err(RepositoryError::Unavailable("stats aggregate offline".to_string()));
        }
        Ok(driver_ids
            .iter()
            .map(|id| {
                let stats = self.stats.get(id).cloned().unwrap_or_else(|| DriverStats::new_driver(*id));
                (*id, stats)
            })
            .collect())
    }
}

/// Invalidation channel fed from a tokio broadcast sender
pub struct BroadcastChannel {
    pub sender: broadcast::Sender<InvalidationEvent>,
}

impl BroadcastChannel {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }
}

#[async_trait]
impl InvalidationChannel for BroadcastChannel {
    async fn subscribe(&self, _topics: &[String]) -> Result<BoxStream<'static, InvalidationEvent>, CacheError> {
        let receiver = self.sender.subscribe();
        let events = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }
}

pub fn time(hhmm: &str) -> NaiveTime {
    NaiveTime::parse_from_str(hhmm, "%H:%M").unwrap()
}

pub fn datetime(value: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").unwrap()
}

pub fn hub_at(point: GeoPoint) -> Hub {
    Hub {
        id: Uuid::new_v4(),
        name: "Hub".to_string(),
        latitude: point.lat,
        longitude: point.lon,
        area: None,
    }
}

/// Route whose stops visit `points` in order
pub fn route_through(points: &[GeoPoint], departure: &str, price: f64) -> Route {
    let id = Uuid::new_v4();
    let stops = points
        .iter()
        .enumerate()
        .map(|(i, point)| RouteStop {
            route_id: id,
            stop: Stop {
                id: Uuid::new_v4(),
                name: format!("Stop {}", i),
                latitude: point.lat,
                longitude: point.lon,
                zone: None,
            },
            stop_order: i as i32,
            planned_arrival_offset_minutes: i as i32 * 10,
            price_from_origin: price * i as f64 / points.len().max(1) as f64,
        })
        .collect();

    Route {
        id,
        driver_id: Uuid::new_v4(),
        vehicle_id: Uuid::new_v4(),
        name: format!("Route departing {}", departure),
        departure_time: time(departure),
        active_days: vec![1, 2, 3, 4, 5],
        seats_total: 4,
        seats_available: 3,
        base_price: price,
        status: RouteStatus::Active,
        origin_hub_id: None,
        destination_hub_id: None,
        stops,
    }
}

/// Forward route: near the origin, a midpoint, near the destination
pub fn commute_route(departure: &str, price: f64) -> Route {
    let midpoint = GeoPoint::new((ORIGIN.lat + DESTINATION.lat) / 2.0, (ORIGIN.lon + DESTINATION.lon) / 2.0);
    route_through(
        &[
            GeoPoint::new(ORIGIN.lat + NUDGE, ORIGIN.lon),
            midpoint,
            GeoPoint::new(DESTINATION.lat + NUDGE, DESTINATION.lon),
        ],
        departure,
        price,
    )
}

pub fn rated_driver(driver_id: Uuid, rating: f64) -> DriverStats {
    DriverStats {
        driver_id,
        rating_avg: rating,
        rating_count: 40,
        cancellation_rate: 0.01,
        completed_trips: 120,
        tier: DriverTier::Trusted,
    }
}

pub fn request(desired: &str) -> MatchRequest {
    MatchRequest {
        rider_id: "rider-1".to_string(),
        origin_lat: ORIGIN.lat,
        origin_lon: ORIGIN.lon,
        dest_lat: Some(DESTINATION.lat),
        dest_lon: Some(DESTINATION.lon),
        desired_time: datetime(desired),
        max_price: None,
        min_seats: 1,
        radius_km: 5.0,
    }
}

/// Fully wired pipeline over in-memory collaborators
pub struct Harness {
    pub orchestrator: MatchingOrchestrator,
    pub cache: Arc<dyn CacheStore>,
    pub routes: Arc<InMemoryRoutes>,
}

pub fn harness_with(
    config: MatchingConfig,
    routes: InMemoryRoutes,
    hubs: Vec<Hub>,
    stats: InMemoryDriverStats,
) -> Harness {
    let cache: Arc<dyn CacheStore> = Arc::new(LocalCacheStore::new(1_000, Duration::from_secs(3_600)));
    let routes = Arc::new(routes);
    let ttls = config.cache_ttls;

    let finder = GeoCandidateFinder::new(
        routes.clone(),
        RouteCache::new(cache.clone(), ttls.route),
        config.max_candidate_routes,
    );
    let hub_cache = HubCache::new(
        cache.clone(),
        Arc::new(InMemoryHubs::new(hubs)),
        ttls.hub,
        ttls.hub_grid_precision,
    );
    let driver_stats = DriverStatsCache::new(cache.clone(), Arc::new(stats), ttls.driver_stats);

    let orchestrator = MatchingOrchestrator::new(config, finder, hub_cache, driver_stats).unwrap();
    Harness {
        orchestrator,
        cache,
        routes,
    }
}

/// Rule score only, so expected values are exact
pub fn rule_only_config() -> MatchingConfig {
    MatchingConfig {
        ml_enabled: false,
        ..MatchingConfig::default()
    }
}

pub fn harness(routes: Vec<Route>, stats: Vec<DriverStats>) -> Harness {
    harness_with(
        rule_only_config(),
        InMemoryRoutes::new(routes),
        Vec::new(),
        InMemoryDriverStats::new(stats),
    )
}
