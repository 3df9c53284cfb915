use std::fmt;
use thiserror::Error;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Retrieve,
    FilterTime,
    FilterAvailability,
    ValidateSequence,
    Score,
    EnrichTopK,
    Respond,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Retrieve => "retrieve",
            PipelineStage::FilterTime => "filter_time",
            PipelineStage::FilterAvailability => "filter_availability",
            PipelineStage::ValidateSequence => "validate_sequence",
            PipelineStage::Score => "score",
            PipelineStage::EnrichTopK => "enrich_top_k",
            PipelineStage::Respond => "respond",
        };
        f.write_str(name)
    }
}

/// Errors raised by the backing route/hub/driver-stats stores
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid row: {0}")]
    Decode(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to callers of the matching pipeline
#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Repository failure: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Deadline exceeded before stage {stage}")]
    DeadlineExceeded { stage: PipelineStage },
}

impl From<validator::ValidationErrors> for MatchingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        MatchingError::Validation(errors.to_string())
    }
}

/// Configuration problems, raised once at process start
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Scoring weights must sum to 1.0 (got {sum:.4})")]
    InvalidWeights { sum: f64 },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
