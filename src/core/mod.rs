// Core algorithm exports
pub mod candidates;
pub mod distance;
pub mod features;
pub mod filters;
pub mod hub_scoring;
pub mod matcher;
pub mod ml;
pub mod scoring;
pub mod sequence;

pub use candidates::{CandidateSearch, GeoCandidateFinder};
pub use distance::{calculate_bounding_box, haversine_km, haversine_meters, is_within_bounding_box};
pub use features::{FeatureContext, FeatureExtractor, FeatureVector, FEATURE_COUNT};
pub use filters::{time_diff_minutes, AvailabilityFilter, TimeWindowFilter};
pub use hub_scoring::HubCompatibilityScorer;
pub use matcher::MatchingOrchestrator;
pub use ml::{HybridScorer, MLScorer};
pub use scoring::{PriceRange, RouteScorer, ScoreInputs};
pub use sequence::{SequenceMatch, StopSequenceValidator};
