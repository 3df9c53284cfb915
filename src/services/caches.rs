use chrono::{NaiveTime, Timelike};
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::core::distance::{haversine_meters, within_radius_km};
use crate::error::RepositoryError;
use crate::models::{DriverStats, GeoPoint, Hub, Route};
use crate::services::cache::{CacheError, CacheKey, CacheStore};
use crate::services::repository::{DriverStatsSource, HubRepository};

/// Concurrent cache lookups issued by one batch read
const BATCH_FANOUT: usize = 8;

const SLOT_MINUTES: u32 = 15;

/// Radius searched around a grid cell for nearby hubs
const HUB_SEARCH_RADIUS_METERS: f64 = 2_000.0;
const HUB_SEARCH_LIMIT: usize = 20;
const METERS_PER_DEGREE: f64 = 111_000.0;

async fn get_json<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Option<T> {
    let raw = store.get(key).await?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            let e = CacheError::from(e);
            tracing::warn!(key, error = %e, "Dropping undecodable cache entry");
            store.delete(&[key.to_string()]).await;
            None
        }
    }
}

async fn set_json<T: Serialize + ?Sized>(store: &dyn CacheStore, key: &str, value: &T, ttl: Duration) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => store.set(key, &json, ttl).await,
        Err(e) => {
            let e = CacheError::from(e);
            tracing::warn!(key, error = %e, "Failed to encode cache entry");
            false
        }
    }
}

/// Candidate-list cache for geo searches and hub-pair lookups
#[derive(Clone)]
pub struct RouteCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl RouteCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Desired time truncated to its 15-minute slot
    pub fn departure_slot(time: NaiveTime) -> NaiveTime {
        let minute = time.minute() - time.minute() % SLOT_MINUTES;
        NaiveTime::from_hms_opt(time.hour(), minute, 0).unwrap_or(time)
    }

    pub async fn get_search(
        &self,
        origin_hub: Uuid,
        destination_hub: Option<Uuid>,
        radius_meters: u32,
        desired: NaiveTime,
        active_only: bool,
    ) -> Option<Vec<Route>> {
        let slot = Self::departure_slot(desired);
        let key = CacheKey::route_search(origin_hub, destination_hub, radius_meters, slot, active_only);
        get_json(self.store.as_ref(), &key).await
    }

    pub async fn put_search(
        &self,
        origin_hub: Uuid,
        destination_hub: Option<Uuid>,
        radius_meters: u32,
        desired: NaiveTime,
        active_only: bool,
        routes: &[Route],
    ) -> bool {
        let slot = Self::departure_slot(desired);
        let key = CacheKey::route_search(origin_hub, destination_hub, radius_meters, slot, active_only);
        set_json(self.store.as_ref(), &key, routes, self.ttl).await
    }

    pub async fn get_hub_routes(
        &self,
        origin_hub: Uuid,
        destination_hub: Uuid,
        time: NaiveTime,
        window_minutes: u32,
    ) -> Option<Vec<Route>> {
        let key = CacheKey::hub_routes(origin_hub, destination_hub, time, window_minutes);
        get_json(self.store.as_ref(), &key).await
    }

    pub async fn put_hub_routes(
        &self,
        origin_hub: Uuid,
        destination_hub: Uuid,
        time: NaiveTime,
        window_minutes: u32,
        routes: &[Route],
    ) -> bool {
        let key = CacheKey::hub_routes(origin_hub, destination_hub, time, window_minutes);
        set_json(self.store.as_ref(), &key, routes, self.ttl).await
    }
}

/// Read-through cache over the driver reputation aggregate
#[derive(Clone)]
pub struct DriverStatsCache {
    store: Arc<dyn CacheStore>,
    source: Arc<dyn DriverStatsSource>,
    ttl: Duration,
}

impl DriverStatsCache {
    pub fn new(store: Arc<dyn CacheStore>, source: Arc<dyn DriverStatsSource>, ttl: Duration) -> Self {
        Self { store, source, ttl }
    }

    /// Stats for each distinct driver id.
    ///
    /// Cached entries are fetched concurrently; the remaining ids go to the
    /// source in a single bulk call and are written back. When the source
    /// fails, only the cached entries are returned.
    pub async fn get_batch(&self, driver_ids: &[Uuid]) -> HashMap<Uuid, DriverStats> {
        let mut seen = HashSet::with_capacity(driver_ids.len());
        let unique: Vec<Uuid> = driver_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let store = self.store.as_ref();
        let lookups: Vec<(Uuid, Option<DriverStats>)> = stream::iter(unique)
            .map(|id| async move {
                let key = CacheKey::driver_stats(id);
                (id, get_json::<DriverStats>(store, &key).await)
            })
            .buffer_unordered(BATCH_FANOUT)
            .collect()
            .await;

        let mut found = HashMap::with_capacity(lookups.len());
        let mut misses = Vec::new();
        for (id, cached) in lookups {
            match cached {
                Some(stats) => {
                    found.insert(id, stats);
                }
                None => misses.push(id),
            }
        }

        if misses.is_empty() {
            return found;
        }

        let mut fetched = match self.source.get_batch(&misses).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(
                    missing = misses.len(),
                    error = %e,
                    "Driver stats source unavailable, continuing without them"
                );
                return found;
            }
        };

        let fresh: Vec<DriverStats> = misses
            .into_iter()
            .map(|id| fetched.remove(&id).unwrap_or_else(|| DriverStats::new_driver(id)))
            .collect();

        let ttl = self.ttl;
        stream::iter(fresh.iter())
            .for_each_concurrent(BATCH_FANOUT, |stats| async move {
                set_json(store, &CacheKey::driver_stats(stats.driver_id), stats, ttl).await;
            })
            .await;

        tracing::debug!(cached = found.len(), fetched = fresh.len(), "Driver stats batch resolved");
        found.extend(fresh.into_iter().map(|stats| (stats.driver_id, stats)));
        found
    }
}

/// Read-through cache of curated hubs, by id and by grid cell
#[derive(Clone)]
pub struct HubCache {
    store: Arc<dyn CacheStore>,
    repo: Arc<dyn HubRepository>,
    ttl: Duration,
    grid_precision: u32,
}

impl HubCache {
    pub fn new(store: Arc<dyn CacheStore>, repo: Arc<dyn HubRepository>, ttl: Duration, grid_precision: u32) -> Self {
        Self {
            store,
            repo,
            ttl,
            grid_precision,
        }
    }

    /// Round a coordinate pair onto the cache grid
    pub fn snap(&self, point: GeoPoint) -> GeoPoint {
        let factor = 10f64.powi(self.grid_precision as i32);
        GeoPoint::new((point.lat * factor).round() / factor, (point.lon * factor).round() / factor)
    }

    pub async fn get_hubs(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Hub>, RepositoryError> {
        let store = self.store.as_ref();
        let mut hubs = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();

        for id in ids {
            if hubs.contains_key(id) || misses.contains(id) {
                continue;
            }
            match get_json::<Hub>(store, &CacheKey::hub(*id)).await {
                Some(hub) => {
                    hubs.insert(*id, hub);
                }
                None => misses.push(*id),
            }
        }

        if !misses.is_empty() {
            for hub in self.repo.get_hubs(&misses).await? {
                set_json(store, &CacheKey::hub(hub.id), &hub, self.ttl).await;
                hubs.insert(hub.id, hub);
            }
        }

        Ok(hubs)
    }

    /// Closest hub within `max_meters` of `point`
    pub async fn nearest_hub(&self, point: GeoPoint, max_meters: f64) -> Result<Option<Hub>, RepositoryError> {
        let cell = self.snap(point);
        let key = CacheKey::hubs_near(cell.lat, cell.lon, self.grid_precision);

        let nearby = match get_json::<Vec<Hub>>(self.store.as_ref(), &key).await {
            Some(hubs) => hubs,
            None => {
                // Pad by one cell so every point in the cell sees the same hubs
                let margin = METERS_PER_DEGREE * 10f64.powi(-(self.grid_precision as i32));
                let hubs = self
                    .repo
                    .find_hubs_near(cell, HUB_SEARCH_RADIUS_METERS + margin, HUB_SEARCH_LIMIT)
                    .await?;
                set_json(self.store.as_ref(), &key, &hubs, self.ttl).await;
                hubs
            }
        };

        let radius_km = max_meters / 1000.0;
        Ok(nearby
            .into_iter()
            .filter(|hub| within_radius_km(point, hub.point(), radius_km))
            .min_by(|a, b| {
                haversine_meters(point, a.point())
                    .partial_cmp(&haversine_meters(point, b.point()))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }))
    }
}
