use chrono::{NaiveDateTime, NaiveTime, Timelike};

use crate::models::Route;

const MINUTES_PER_DAY: i64 = 1440;

/// Horizon inside which an imminent trip widens the time window
const URGENCY_HORIZON_MINUTES: f64 = 60.0;
const MAX_URGENCY_MULTIPLIER: f64 = 1.5;

#[inline]
pub fn minutes_since_midnight(time: NaiveTime) -> i64 {
    i64::from(time.hour()) * 60 + i64::from(time.minute())
}

/// Circular distance in minutes between two times of day
#[inline]
pub fn time_diff_minutes(a: NaiveTime, b: NaiveTime) -> i64 {
    let delta = (minutes_since_midnight(a) - minutes_since_midnight(b)).abs();
    delta.min(MINUTES_PER_DAY - delta)
}

/// Keeps routes departing within ±window of the rider's desired time
#[derive(Debug, Clone, Copy)]
pub struct TimeWindowFilter {
    default_window_minutes: u32,
}

impl TimeWindowFilter {
    pub fn new(default_window_minutes: u32) -> Self {
        Self { default_window_minutes }
    }

    pub fn default_window(&self) -> u32 {
        self.default_window_minutes
    }

    /// Multiplier in [1.0, 1.5]; grows linearly as the desired departure
    /// approaches `now` within the urgency horizon.
    pub fn urgency_multiplier(desired: NaiveDateTime, now: NaiveDateTime) -> f64 {
        let lead_minutes = (desired - now).num_seconds() as f64 / 60.0;
        if !(0.0..=URGENCY_HORIZON_MINUTES).contains(&lead_minutes) {
            return 1.0;
        }
        let closeness = 1.0 - lead_minutes / URGENCY_HORIZON_MINUTES;
        1.0 + (MAX_URGENCY_MULTIPLIER - 1.0) * closeness
    }

    /// Window for this query after the urgency widening
    pub fn effective_window(&self, desired: NaiveDateTime, now: NaiveDateTime) -> u32 {
        let widened = f64::from(self.default_window_minutes) * Self::urgency_multiplier(desired, now);
        widened.round() as u32
    }

    pub fn accepts(&self, route: &Route, desired: NaiveTime, window_minutes: u32) -> bool {
        time_diff_minutes(route.departure_time, desired) <= i64::from(window_minutes)
    }

    pub fn apply(&self, routes: Vec<Route>, desired: NaiveTime, window_minutes: u32) -> Vec<Route> {
        routes
            .into_iter()
            .filter(|route| self.accepts(route, desired, window_minutes))
            .collect()
    }
}

/// Keeps routes with enough seats and, when capped, an acceptable price
#[derive(Debug, Clone, Copy, Default)]
pub struct AvailabilityFilter;

impl AvailabilityFilter {
    #[inline]
    pub fn accepts(&self, route: &Route, min_seats: u32, max_price: Option<f64>) -> bool {
        if route.seats_available < min_seats {
            return false;
        }
        match max_price {
            Some(cap) => route.base_price <= cap,
            None => true,
        }
    }

    pub fn apply(&self, routes: Vec<Route>, min_seats: u32, max_price: Option<f64>) -> Vec<Route> {
        routes
            .into_iter()
            .filter(|route| self.accepts(route, min_seats, max_price))
            .collect()
    }
}
