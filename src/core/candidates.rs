use chrono::NaiveTime;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::{GeoPoint, Route};
use crate::services::caches::RouteCache;
use crate::services::repository::{NearbyQuery, RouteRepository};

/// Inputs to the broad spatial pre-filter
#[derive(Debug, Clone, Copy)]
pub struct CandidateSearch {
    pub origin: GeoPoint,
    pub destination: Option<GeoPoint>,
    pub radius_meters: f64,
    /// Hubs resolved for the rider; a known origin hub enables the cache
    pub origin_hub: Option<Uuid>,
    pub destination_hub: Option<Uuid>,
    pub desired_time: NaiveTime,
}

impl CandidateSearch {
    /// Hubs and radius identifying a shareable search list.
    ///
    /// `None` when the origin hub is unknown, or when a destination was given
    /// but resolved to no hub: its list depends on the exact coordinates.
    fn cache_scope(&self) -> Option<(Uuid, Option<Uuid>, u32)> {
        let origin_hub = self.origin_hub?;
        if self.destination.is_some() && self.destination_hub.is_none() {
            return None;
        }
        Some((origin_hub, self.destination_hub, self.radius_meters.round() as u32))
    }
}

/// Recall half of candidate retrieval.
///
/// Returns routes with any stop near either end of the trip, capped at
/// `max_candidates`. Direction and both-ends coverage are checked later.
#[derive(Clone)]
pub struct GeoCandidateFinder {
    routes: Arc<dyn RouteRepository>,
    cache: RouteCache,
    max_candidates: usize,
}

impl GeoCandidateFinder {
    pub fn new(routes: Arc<dyn RouteRepository>, cache: RouteCache, max_candidates: usize) -> Self {
        Self {
            routes,
            cache,
            max_candidates,
        }
    }

    pub fn max_candidates(&self) -> usize {
        self.max_candidates
    }

    pub async fn find(&self, search: &CandidateSearch) -> Result<Vec<Route>, RepositoryError> {
        let cache_key = search.cache_scope();

        if let Some((origin_hub, destination_hub, radius)) = cache_key {
            if let Some(cached) = self
                .cache
                .get_search(origin_hub, destination_hub, radius, search.desired_time, true)
                .await
            {
                tracing::debug!(count = cached.len(), "Route search served from cache");
                return Ok(self.finalize(cached));
            }
        }

        let query = NearbyQuery {
            origin: search.origin,
            destination: search.destination,
            radius_meters: search.radius_meters,
            max_results: self.max_candidates,
        };
        let routes = self.finalize(self.routes.find_nearby(&query).await?);

        if let Some((origin_hub, destination_hub, radius)) = cache_key {
            self.cache
                .put_search(origin_hub, destination_hub, radius, search.desired_time, true, &routes)
                .await;
        }

        Ok(routes)
    }

    /// Active routes registered between two hubs departing within the window
    pub async fn find_by_hubs(
        &self,
        origin_hub: Uuid,
        destination_hub: Uuid,
        time: NaiveTime,
        window_minutes: u32,
    ) -> Result<Vec<Route>, RepositoryError> {
        if let Some(cached) = self
            .cache
            .get_hub_routes(origin_hub, destination_hub, time, window_minutes)
            .await
        {
            return Ok(cached);
        }

        let routes = self
            .routes
            .find_routes_by_hubs(Some(origin_hub), Some(destination_hub), true)
            .await?;
        let ids: Vec<Uuid> = routes.iter().map(|r| r.id).collect();
        let in_window: HashSet<Uuid> = self
            .routes
            .filter_by_time_window(&ids, time, window_minutes)
            .await?
            .into_iter()
            .collect();

        let routes: Vec<Route> = routes.into_iter().filter(|r| in_window.contains(&r.id)).collect();
        self.cache
            .put_hub_routes(origin_hub, destination_hub, time, window_minutes, &routes)
            .await;

        Ok(routes)
    }

    /// Distinct, bookable, and within the candidate cap
    fn finalize(&self, routes: Vec<Route>) -> Vec<Route> {
        let mut seen = HashSet::with_capacity(routes.len());
        let mut kept: Vec<Route> = routes
            .into_iter()
            .filter(|route| route.is_bookable() && seen.insert(route.id))
            .collect();
        kept.truncate(self.max_candidates);
        kept
    }
}
