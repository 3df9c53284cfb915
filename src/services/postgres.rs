use async_trait::async_trait;
use chrono::NaiveTime;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::core::filters::{minutes_since_midnight, time_diff_minutes};
use crate::error::RepositoryError;
use crate::models::{DriverStats, DriverTier, GeoPoint, Hub, Route, RouteStatus, RouteStop, Stop};
use crate::services::repository::{DriverStatsSource, HubRepository, NearbyQuery, RouteRepository};

/// PostGIS-backed read model of routes, hubs and driver aggregates.
///
/// Expects `routes`, `route_stops`, `stops` and `hubs` tables with
/// `geography(Point)` `location` columns, and the `driver_stats_aggregate`
/// view maintained by the ratings pipeline.
pub struct PostgresStore {
    pool: PgPool,
}

const ROUTE_COLUMNS: &str = r#"
    r.id, r.driver_id, r.vehicle_id, r.name, r.departure_time, r.active_days,
    r.seats_total, r.seats_available, r.base_price::float8 AS base_price, r.status,
    r.origin_hub_id, r.destination_hub_id
"#;

impl PostgresStore {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
        idle_timeout: Duration,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(idle_timeout)
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a new store from the optional settings values
    pub async fn from_settings(
        url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
        acquire_timeout_secs: Option<u64>,
        idle_timeout_secs: Option<u64>,
    ) -> Result<Self, RepositoryError> {
        tracing::info!("Connecting to PostgreSQL");

        Self::new(
            url,
            max_connections.unwrap_or(10),
            min_connections.unwrap_or(1),
            Duration::from_secs(acquire_timeout_secs.unwrap_or(5)),
            Duration::from_secs(idle_timeout_secs.unwrap_or(600)),
        )
        .await
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Load full routes, stop sequences included, preserving `ids` order
    async fn load_routes(&self, ids: &[Uuid]) -> Result<Vec<Route>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!("SELECT {} FROM routes r WHERE r.id = ANY($1)", ROUTE_COLUMNS);
        let rows = sqlx::query(&query).bind(ids).fetch_all(&self.pool).await?;

        let mut routes: HashMap<Uuid, Route> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let route = route_from_row(row)?;
            routes.insert(route.id, route);
        }

        let stop_rows = sqlx::query(
            r#"
            SELECT rs.route_id, rs.stop_order, rs.planned_arrival_offset_minutes,
                   rs.price_from_origin::float8 AS price_from_origin,
                   s.id AS stop_id, s.name AS stop_name, s.zone,
                   ST_Y(s.location::geometry) AS latitude,
                   ST_X(s.location::geometry) AS longitude
            FROM route_stops rs
            JOIN stops s ON s.id = rs.stop_id
            WHERE rs.route_id = ANY($1)
            ORDER BY rs.route_id, rs.stop_order
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        for row in &stop_rows {
            let stop = route_stop_from_row(row)?;
            if let Some(route) = routes.get_mut(&stop.route_id) {
                route.stops.push(stop);
            }
        }

        Ok(ids.iter().filter_map(|id| routes.remove(id)).collect())
    }
}

#[async_trait]
impl RouteRepository for PostgresStore {
    async fn find_nearby(&self, query: &NearbyQuery) -> Result<Vec<Route>, RepositoryError> {
        // One OR predicate over route stops; direction is checked in-app
        let sql = r#"
            SELECT r.id
            FROM routes r
            WHERE r.status = 'ACTIVE'
              AND r.seats_available > 0
              AND EXISTS (
                  SELECT 1
                  FROM route_stops rs
                  JOIN stops s ON s.id = rs.stop_id
                  WHERE rs.route_id = r.id
                    AND (
                        ST_DWithin(s.location, ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography, $5)
                        OR ($3::float8 IS NOT NULL AND $4::float8 IS NOT NULL
                            AND ST_DWithin(s.location, ST_SetSRID(ST_MakePoint($4, $3), 4326)::geography, $5))
                    )
              )
            LIMIT $6
        "#;

        let rows = sqlx::query(sql)
            .bind(query.origin.lat)
            .bind(query.origin.lon)
            .bind(query.destination.map(|d| d.lat))
            .bind(query.destination.map(|d| d.lon))
            .bind(query.radius_meters)
            .bind(query.max_results as i64)
            .fetch_all(&self.pool)
            .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!("Spatial query matched {} routes", ids.len());
        self.load_routes(&ids).await
    }

    async fn filter_by_time_window(
        &self,
        route_ids: &[Uuid],
        desired: NaiveTime,
        window_minutes: u32,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        if route_ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT id, departure_time FROM routes WHERE id = ANY($1)")
            .bind(route_ids)
            .fetch_all(&self.pool)
            .await?;

        let window = i64::from(window_minutes);
        let mut kept = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let departure: NaiveTime = row.try_get("departure_time")?;
            if time_diff_minutes(departure, desired) <= window {
                kept.push(id);
            }
        }

        tracing::trace!(
            desired_minute = minutes_since_midnight(desired),
            kept = kept.len(),
            "Filtered routes by time window"
        );
        Ok(kept)
    }

    async fn find_routes_by_hubs(
        &self,
        origin_hub: Option<Uuid>,
        destination_hub: Option<Uuid>,
        active_only: bool,
    ) -> Result<Vec<Route>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM routes
            WHERE ($1::uuid IS NULL OR origin_hub_id = $1)
              AND ($2::uuid IS NULL OR destination_hub_id = $2)
              AND (NOT $3 OR status = 'ACTIVE')
            ORDER BY departure_time
            "#,
        )
        .bind(origin_hub)
        .bind(destination_hub)
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<Result<Vec<_>, _>>()?;

        self.load_routes(&ids).await
    }
}

#[async_trait]
impl HubRepository for PostgresStore {
    async fn find_hubs_near(
        &self,
        center: GeoPoint,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<Hub>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, area,
                   ST_Y(location::geometry) AS latitude,
                   ST_X(location::geometry) AS longitude
            FROM hubs
            WHERE ST_DWithin(location, ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography, $3)
            ORDER BY ST_Distance(location, ST_SetSRID(ST_MakePoint($2, $1), 4326)::geography)
            LIMIT $4
            "#,
        )
        .bind(center.lat)
        .bind(center.lon)
        .bind(radius_meters)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hub_from_row).collect()
    }

    async fn get_hubs(&self, ids: &[Uuid]) -> Result<Vec<Hub>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, name, area,
                   ST_Y(location::geometry) AS latitude,
                   ST_X(location::geometry) AS longitude
            FROM hubs
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(hub_from_row).collect()
    }
}

#[async_trait]
impl DriverStatsSource for PostgresStore {
    async fn get_batch(&self, driver_ids: &[Uuid]) -> Result<HashMap<Uuid, DriverStats>, RepositoryError> {
        let mut stats: HashMap<Uuid, DriverStats> = HashMap::with_capacity(driver_ids.len());
        if driver_ids.is_empty() {
            return Ok(stats);
        }

        let rows = sqlx::query(
            r#"
            SELECT driver_id, rating_avg::float8 AS rating_avg, rating_count,
                   cancellation_rate::float8 AS cancellation_rate, completed_trips, tier
            FROM driver_stats_aggregate
            WHERE driver_id = ANY($1)
            "#,
        )
        .bind(driver_ids)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let entry = driver_stats_from_row(row)?;
            stats.insert(entry.driver_id, entry);
        }

        for id in driver_ids {
            stats.entry(*id).or_insert_with(|| DriverStats::new_driver(*id));
        }

        Ok(stats)
    }
}

fn route_from_row(row: &PgRow) -> Result<Route, RepositoryError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<RouteStatus>()
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active_days: Vec<i16> = row.try_get("active_days")?;
    let seats_total: i32 = row.try_get("seats_total")?;
    let seats_available: i32 = row.try_get("seats_available")?;

    Ok(Route {
        id: row.try_get("id")?,
        driver_id: row.try_get("driver_id")?,
        vehicle_id: row.try_get("vehicle_id")?,
        name: row.try_get("name")?,
        departure_time: row.try_get("departure_time")?,
        active_days: active_days
            .into_iter()
            .filter_map(|d| u8::try_from(d).ok())
            .collect(),
        seats_total: non_negative(seats_total, "seats_total")?,
        seats_available: non_negative(seats_available, "seats_available")?,
        base_price: row.try_get("base_price")?,
        status,
        origin_hub_id: row.try_get("origin_hub_id")?,
        destination_hub_id: row.try_get("destination_hub_id")?,
        stops: Vec::new(),
    })
}

fn route_stop_from_row(row: &PgRow) -> Result<RouteStop, RepositoryError> {
    Ok(RouteStop {
        route_id: row.try_get("route_id")?,
        stop: Stop {
            id: row.try_get("stop_id")?,
            name: row.try_get("stop_name")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            zone: row.try_get("zone")?,
        },
        stop_order: row.try_get("stop_order")?,
        planned_arrival_offset_minutes: row.try_get("planned_arrival_offset_minutes")?,
        price_from_origin: row.try_get("price_from_origin")?,
    })
}

fn hub_from_row(row: &PgRow) -> Result<Hub, RepositoryError> {
    Ok(Hub {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        area: row.try_get("area")?,
    })
}

fn driver_stats_from_row(row: &PgRow) -> Result<DriverStats, RepositoryError> {
    let tier: String = row.try_get("tier")?;
    let rating_count: i32 = row.try_get("rating_count")?;
    let completed_trips: i32 = row.try_get("completed_trips")?;

    Ok(DriverStats {
        driver_id: row.try_get("driver_id")?,
        rating_avg: row.try_get("rating_avg")?,
        rating_count: non_negative(rating_count, "rating_count")?,
        cancellation_rate: row.try_get("cancellation_rate")?,
        completed_trips: non_negative(completed_trips, "completed_trips")?,
        tier: tier.parse::<DriverTier>().unwrap_or(DriverTier::New),
    })
}

fn non_negative(value: i32, column: &str) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Decode(format!("{} is negative: {}", column, value)))
}
