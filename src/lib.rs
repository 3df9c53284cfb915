//! Carpool Match - real-time route matching and ranking for riders
//!
//! Given a rider's origin, optional destination and desired departure, the
//! pipeline retrieves nearby routes, filters them by time, seats and price,
//! validates stop order, then scores and ranks the survivors.

pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use config::{MatchingConfig, Settings};
pub use core::{GeoCandidateFinder, MatchingOrchestrator};
pub use error::{ConfigError, MatchingError, PipelineStage, RepositoryError};
pub use models::{MatchRequest, MatchResponse, MatchResult, Route, ScoreBreakdown, ScoringWeights};
