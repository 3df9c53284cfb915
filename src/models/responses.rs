use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::domain::{Route, ScoreBreakdown};

/// One ranked route offered to the rider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub route_id: Uuid,
    pub driver_id: Uuid,
    pub final_score: f64,
    pub scores: ScoreBreakdown,
    pub explanation: String,
    pub recommended: bool,
    pub route_name: String,
    pub departure_time: NaiveTime,
    pub seats_available: u32,
    pub base_price: f64,
    pub driver_rating: Option<f64>,
}

/// Response for the find matches endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub matches: Vec<MatchResult>,
    pub total_candidates: usize,
    pub matched_candidates: usize,
    pub execution_time_ms: u64,
}

impl MatchResponse {
    pub fn empty(total_candidates: usize, execution_time_ms: u64) -> Self {
        Self {
            matches: Vec::new(),
            total_candidates,
            matched_candidates: 0,
            execution_time_ms,
        }
    }
}

/// Response for the hub-to-hub route lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubRoutesResponse {
    pub routes: Vec<Route>,
    pub total: usize,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cache: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
