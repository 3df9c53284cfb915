use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::MatchingOrchestrator;
use crate::error::MatchingError;
use crate::models::{ErrorResponse, HealthResponse, HubRoutesQuery, HubRoutesResponse, MatchRequest};
use crate::services::{CacheStore, PostgresStore};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<MatchingOrchestrator>,
    pub cache: Arc<dyn CacheStore>,
    /// Absent when running against in-memory collaborators
    pub database: Option<Arc<PostgresStore>>,
    pub request_timeout: Option<Duration>,
}

/// Configure all match-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/matches/find", web::post().to(find_matches))
        .route("/routes/by-hubs", web::get().to(routes_by_hubs));
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    let db_healthy = match &state.database {
        Some(db) => db.health_check().await,
        None => true,
    };

    let status = if db_healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache: state.cache.backend().to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Find matches endpoint
///
/// POST /api/v1/matches/find
///
/// Request body:
/// ```json
/// {
///   "rider_id": "string",
///   "origin_lat": 12.97, "origin_lon": 77.59,
///   "dest_lat": 12.93, "dest_lon": 77.62,
///   "desired_time": "2026-10-19T08:00:00",
///   "max_price": 2000.0,
///   "min_seats": 1,
///   "radius_km": 5.0
/// }
/// ```
async fn find_matches(state: web::Data<AppState>, req: web::Json<MatchRequest>) -> impl Responder {
    let deadline = state.request_timeout.map(|timeout| Instant::now() + timeout);

    match state.orchestrator.find_matches(&req, deadline).await {
        Ok(response) => HttpResponse::Ok().json(response),
        Err(e) => error_response(&e),
    }
}

/// Routes between two hubs
///
/// GET /api/v1/routes/by-hubs?origin_hub_id={id}&destination_hub_id={id}&time=08:00:00
async fn routes_by_hubs(state: web::Data<AppState>, query: web::Query<HubRoutesQuery>) -> impl Responder {
    match state.orchestrator.find_routes_by_hubs(&query).await {
        Ok(routes) => HttpResponse::Ok().json(HubRoutesResponse {
            total: routes.len(),
            routes,
        }),
        Err(e) => error_response(&e),
    }
}

pub fn status_for(err: &MatchingError) -> StatusCode {
    match err {
        MatchingError::Validation(_) => StatusCode::BAD_REQUEST,
        MatchingError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        MatchingError::Repository(_) => StatusCode::BAD_GATEWAY,
    }
}

fn error_response(err: &MatchingError) -> HttpResponse {
    let status = status_for(err);
    let error = match err {
        MatchingError::Validation(_) => "Validation failed",
        MatchingError::DeadlineExceeded { .. } => "Deadline exceeded",
        MatchingError::Repository(_) => "Route store unavailable",
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "Matching request failed");
    } else {
        tracing::info!(error = %err, "Matching request rejected");
    }

    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
        message: err.to_string(),
        status_code: status.as_u16(),
    })
}
