// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    BoundingBox, DriverStats, DriverTier, GeoPoint, Hub, Route, RouteStatus, RouteStop,
    ScoreBreakdown, ScoringWeights, Stop,
};
pub use requests::{HubRoutesQuery, MatchRequest};
pub use responses::{ErrorResponse, HealthResponse, HubRoutesResponse, MatchResponse, MatchResult};
