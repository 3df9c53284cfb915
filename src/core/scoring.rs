use crate::config::validate_weights;
use crate::core::sequence::SequenceMatch;
use crate::error::ConfigError;
use crate::models::{ScoreBreakdown, ScoringWeights};

/// Rating sub-score when the driver's rating is unknown
pub const NEUTRAL_RATING_SCORE: f64 = 0.5;

const PARTIAL_MATCH_SCORE: f64 = 0.7;

/// Per-candidate inputs to the rule-based score
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub sequence: &'a SequenceMatch,
    pub time_diff_minutes: i64,
    pub window_minutes: u32,
    pub driver_rating: Option<f64>,
    pub base_price: f64,
}

/// Min/max over the prices of every candidate in the current request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    min: f64,
    max: f64,
}

impl PriceRange {
    pub fn from_prices<I: IntoIterator<Item = f64>>(prices: I) -> Option<Self> {
        prices.into_iter().fold(None, |range, price| match range {
            None => Some(Self { min: price, max: price }),
            Some(r) => Some(Self {
                min: r.min.min(price),
                max: r.max.max(price),
            }),
        })
    }

    pub fn has_spread(&self) -> bool {
        self.max > self.min
    }
}

/// Rule-based composite scorer
///
/// score = route_match * w1 + time_match * w2 + rating * w3 + price * w4
#[derive(Debug, Clone)]
pub struct RouteScorer {
    weights: ScoringWeights,
}

impl RouteScorer {
    /// Rejects weights that do not sum to 1.0 within tolerance
    pub fn new(weights: ScoringWeights) -> Result<Self, ConfigError> {
        validate_weights(&weights)?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, inputs: &ScoreInputs<'_>, prices: Option<PriceRange>) -> (ScoreBreakdown, f64) {
        let breakdown = ScoreBreakdown {
            route_match: route_match_score(inputs.sequence),
            time_match: time_match_score(inputs.time_diff_minutes, inputs.window_minutes),
            rating: rating_score(inputs.driver_rating),
            price: price_score(inputs.base_price, prices),
        };
        let composite = breakdown.composite(&self.weights);
        (breakdown, composite)
    }

    /// Human readable summary for the rider-facing UI
    pub fn explain(&self, breakdown: &ScoreBreakdown, time_diff_minutes: i64) -> String {
        let mut clauses: Vec<String> = Vec::with_capacity(4);

        if breakdown.route_match >= 1.0 {
            clauses.push("Exact route match".to_string());
        } else if breakdown.route_match > 0.0 {
            clauses.push("Partial route match".to_string());
        }

        if time_diff_minutes == 0 {
            clauses.push("departs right on time".to_string());
        } else if breakdown.time_match >= 0.7 {
            clauses.push(format!("departs within {} min", time_diff_minutes));
        } else if breakdown.time_match > 0.0 {
            clauses.push(format!("departs {} min from your time", time_diff_minutes));
        }

        if breakdown.rating >= 0.9 {
            clauses.push("top-rated driver".to_string());
        } else if breakdown.rating >= 0.8 {
            clauses.push("well-rated driver".to_string());
        }

        if breakdown.price >= 0.8 {
            clauses.push("great price".to_string());
        } else if breakdown.price >= 0.5 {
            clauses.push("fair price".to_string());
        }

        if clauses.is_empty() {
            return "Available route".to_string();
        }
        clauses.join(", ")
    }
}

/// 1.0 for both ends in order, 0.7 for a single covered end
#[inline]
pub fn route_match_score(sequence: &SequenceMatch) -> f64 {
    if sequence.is_exact() {
        1.0
    } else if sequence.origin_covered || sequence.destination_covered {
        PARTIAL_MATCH_SCORE
    } else {
        0.0
    }
}

/// Piecewise-linear decay of the departure gap:
/// 0 → 1.0, ≤5 → 0.9..1.0, ≤10 → 0.7..0.9, ≤window → 0.5..0.7, beyond → 0
pub fn time_match_score(time_diff_minutes: i64, window_minutes: u32) -> f64 {
    let diff = time_diff_minutes.unsigned_abs() as f64;
    let window = f64::from(window_minutes);

    if diff > window {
        return 0.0;
    }
    let score = if diff <= 5.0 {
        1.0 - 0.1 * (diff / 5.0)
    } else if diff <= 10.0 {
        0.9 - 0.2 * ((diff - 5.0) / 5.0)
    } else {
        // window > 10 here since diff > 10 and diff <= window
        0.7 - 0.2 * ((diff - 10.0) / (window - 10.0))
    };
    score.clamp(0.0, 1.0)
}

/// Rating 0..5 mapped onto 0..1, neutral when unknown
#[inline]
pub fn rating_score(rating: Option<f64>) -> f64 {
    match rating {
        Some(r) => (r / 5.0).clamp(0.0, 1.0),
        None => NEUTRAL_RATING_SCORE,
    }
}

/// Inverse min–max normalisation: cheapest → 1.0, dearest → 0.0
#[inline]
pub fn price_score(price: f64, range: Option<PriceRange>) -> f64 {
    match range {
        Some(r) if r.has_spread() => ((r.max - price) / (r.max - r.min)).clamp(0.0, 1.0),
        _ => 1.0,
    }
}
