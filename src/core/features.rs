use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::core::sequence::SequenceMatch;
use crate::models::{DriverStats, Route};

pub const FEATURE_COUNT: usize = 24;

pub type FeatureVector = [f64; FEATURE_COUNT];

/// Column names, index-aligned with [`FeatureVector`]
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    // temporal
    "hour",
    "weekday",
    "is_weekend",
    "is_rush_hour",
    // match quality
    "exact_match",
    "time_diff_minutes",
    "time_diff_normalized",
    // pricing
    "price",
    "price_rank",
    "price_percentile",
    // route topology
    "stop_count",
    "destination_position",
    "destination_position_normalized",
    // driver
    "driver_rating",
    "driver_rating_count",
    "driver_cancellation_rate",
    "driver_completed_trips",
    // availability
    "seats_available",
    "seat_utilization",
    // distance
    "origin_distance_km",
    "destination_distance_km",
    "total_walk_km",
    // hubs
    "has_origin_hub",
    "has_destination_hub",
];

const DEFAULT_DRIVER_RATING: f64 = 4.0;

const MORNING_RUSH: std::ops::RangeInclusive<u32> = 7..=9;
const EVENING_RUSH: std::ops::RangeInclusive<u32> = 17..=19;

/// Request-wide inputs shared by every candidate's vector
#[derive(Debug, Clone)]
pub struct FeatureContext {
    desired: NaiveDateTime,
    window_minutes: u32,
    sorted_prices: Vec<f64>,
}

impl FeatureContext {
    pub fn new<I: IntoIterator<Item = f64>>(desired: NaiveDateTime, window_minutes: u32, prices: I) -> Self {
        let mut sorted_prices: Vec<f64> = prices.into_iter().collect();
        sorted_prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        Self {
            desired,
            window_minutes,
            sorted_prices,
        }
    }

    /// Zero-based position of the first candidate with this price in
    /// ascending order; equal prices share the lowest position.
    pub fn price_rank(&self, price: f64) -> usize {
        self.sorted_prices
            .iter()
            .position(|p| *p == price)
            .unwrap_or_else(|| self.sorted_prices.partition_point(|p| *p < price))
    }

    pub fn price_percentile(&self, price: f64) -> f64 {
        let n = self.sorted_prices.len();
        if n <= 1 {
            return 0.0;
        }
        self.price_rank(price) as f64 / (n - 1) as f64
    }
}

/// Builds the fixed-width numeric description of a candidate
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn extract(
        &self,
        context: &FeatureContext,
        route: &Route,
        sequence: &SequenceMatch,
        time_diff_minutes: i64,
        driver: Option<&DriverStats>,
    ) -> FeatureVector {
        let mut features = [0.0; FEATURE_COUNT];

        let hour = context.desired.hour();
        let weekday = context.desired.weekday().num_days_from_monday();
        features[0] = f64::from(hour);
        features[1] = f64::from(weekday);
        features[2] = flag(weekday >= 5);
        features[3] = flag(MORNING_RUSH.contains(&hour) || EVENING_RUSH.contains(&hour));

        let diff = time_diff_minutes.unsigned_abs() as f64;
        features[4] = flag(sequence.is_exact());
        features[5] = diff;
        features[6] = if context.window_minutes > 0 {
            (diff / f64::from(context.window_minutes)).min(1.0)
        } else {
            1.0
        };

        features[7] = route.base_price;
        features[8] = context.price_rank(route.base_price) as f64;
        features[9] = context.price_percentile(route.base_price);

        let stop_count = route.stops.len();
        let last_index = stop_count.saturating_sub(1);
        let position = sequence.destination.map(|d| d.index).unwrap_or(last_index);
        features[10] = stop_count as f64;
        features[11] = position as f64;
        features[12] = if last_index > 0 {
            position as f64 / last_index as f64
        } else {
            0.0
        };

        let (rating, rating_count, cancellation_rate, completed_trips) = match driver {
            Some(stats) => (
                stats.rating().unwrap_or(DEFAULT_DRIVER_RATING),
                f64::from(stats.rating_count),
                stats.cancellation_rate.clamp(0.0, 1.0),
                f64::from(stats.completed_trips),
            ),
            None => (DEFAULT_DRIVER_RATING, 0.0, 0.0, 0.0),
        };
        features[13] = rating;
        features[14] = rating_count;
        features[15] = cancellation_rate;
        features[16] = completed_trips;

        features[17] = f64::from(route.seats_available);
        features[18] = route.utilization();

        let origin_km = sequence.origin.distance_km;
        let destination_km = sequence.destination.map(|d| d.distance_km).unwrap_or(0.0);
        features[19] = origin_km;
        features[20] = destination_km;
        features[21] = origin_km + destination_km;

        features[22] = flag(route.origin_hub_id.is_some());
        features[23] = flag(route.destination_hub_id.is_some());

        features
    }
}

#[inline]
fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}
