use crate::core::features::{FeatureVector, FEATURE_COUNT};

pub const DEFAULT_ALPHA: f64 = 0.6;

const BASELINE: f64 = 0.5;

/// Hand-authored linear weights, index-aligned with `FEATURE_NAMES`.
/// Negative entries penalise (time gap, price, cancellations, walking).
const DEFAULT_WEIGHTS: [f64; FEATURE_COUNT] = [
    0.0,      // hour
    0.0,      // weekday
    -0.02,    // is_weekend
    0.03,     // is_rush_hour
    0.15,     // exact_match
    -0.002,   // time_diff_minutes
    -0.10,    // time_diff_normalized
    -0.00002, // price
    -0.005,   // price_rank
    -0.08,    // price_percentile
    0.005,    // stop_count
    0.0,      // destination_position
    0.02,     // destination_position_normalized
    0.02,     // driver_rating
    0.0002,   // driver_rating_count
    -0.30,    // driver_cancellation_rate
    0.0001,   // driver_completed_trips
    0.01,     // seats_available
    0.03,     // seat_utilization
    -0.05,    // origin_distance_km
    -0.05,    // destination_distance_km
    -0.01,    // total_walk_km
    0.02,     // has_origin_hub
    0.02,     // has_destination_hub
];

/// Linear scorer over the feature vector:
/// `clamp(0.5 + Σ feature·weight, 0, 1)`
#[derive(Debug, Clone)]
pub struct MLScorer {
    weights: [f64; FEATURE_COUNT],
}

impl MLScorer {
    pub fn with_weights(weights: [f64; FEATURE_COUNT]) -> Self {
        Self { weights }
    }

    pub fn score(&self, features: &FeatureVector) -> f64 {
        let dot: f64 = features
            .iter()
            .zip(self.weights.iter())
            .map(|(feature, weight)| feature * weight)
            .sum();
        let score = BASELINE + dot;
        if score.is_nan() {
            return BASELINE;
        }
        score.clamp(0.0, 1.0)
    }
}

impl Default for MLScorer {
    fn default() -> Self {
        Self::with_weights(DEFAULT_WEIGHTS)
    }
}

/// Blends rule and ML scores: `alpha·rule + (1 - alpha)·ml`
#[derive(Debug, Clone, Copy)]
pub struct HybridScorer {
    alpha: f64,
}

impl HybridScorer {
    /// Alpha outside [0, 1] (or NaN) falls back to the default
    pub fn new(alpha: f64) -> Self {
        if (0.0..=1.0).contains(&alpha) {
            return Self { alpha };
        }
        tracing::warn!(alpha, default = DEFAULT_ALPHA, "Hybrid alpha out of range, using default");
        Self { alpha: DEFAULT_ALPHA }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn blend(&self, rule_score: f64, ml_score: f64) -> f64 {
        if self.alpha == 1.0 {
            return rule_score;
        }
        (self.alpha * rule_score + (1.0 - self.alpha) * ml_score).clamp(0.0, 1.0)
    }
}

impl Default for HybridScorer {
    fn default() -> Self {
        Self { alpha: DEFAULT_ALPHA }
    }
}
