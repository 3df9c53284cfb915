use chrono::NaiveDateTime;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::config::MatchingConfig;
use crate::core::candidates::{CandidateSearch, GeoCandidateFinder};
use crate::core::features::{FeatureContext, FeatureExtractor};
use crate::core::filters::{time_diff_minutes, AvailabilityFilter, TimeWindowFilter};
use crate::core::hub_scoring::{HubCompatibilityScorer, HUB_EXACT_METERS};
use crate::core::ml::{HybridScorer, MLScorer};
use crate::core::scoring::{PriceRange, RouteScorer, ScoreInputs};
use crate::core::sequence::{SequenceMatch, StopSequenceValidator};
use crate::error::{ConfigError, MatchingError, PipelineStage};
use crate::models::{
    DriverStats, GeoPoint, Hub, HubRoutesQuery, MatchRequest, MatchResponse, MatchResult, Route,
    ScoreBreakdown,
};
use crate::services::caches::{DriverStatsCache, HubCache};

/// A route that survived validation, with everything needed to rank it
#[derive(Debug)]
struct Candidate {
    route: Route,
    sequence: SequenceMatch,
    time_diff: i64,
    hub_score: f64,
    driver: Option<DriverStats>,
    breakdown: ScoreBreakdown,
    final_score: f64,
}

impl Candidate {
    fn driver_rating(&self) -> Option<f64> {
        self.driver.as_ref().and_then(DriverStats::rating)
    }
}

/// Request-wide scoring inputs
struct ScoringContext {
    window_minutes: u32,
    prices: Option<PriceRange>,
    features: FeatureContext,
}

/// Main matching orchestrator
///
/// # Pipeline Stages
/// 1. RETRIEVE: broad geo pre-filter (cache first)
/// 2. FILTER_TIME: departure within the (urgency widened) window
/// 3. FILTER_AVAILABILITY: seats and price
/// 4. VALIDATE_SEQUENCE: both ends covered, in travel order
/// 5. SCORE: rule score, optionally blended with the feature score
/// 6. ENRICH_TOP_K: driver stats for the leaders, then re-score
/// 7. RESPOND
///
/// A caller deadline is checked between stages. Exceeding
/// `performance_target_ms` is logged, never enforced.
pub struct MatchingOrchestrator {
    config: MatchingConfig,
    finder: GeoCandidateFinder,
    hubs: HubCache,
    driver_stats: DriverStatsCache,
    time_filter: TimeWindowFilter,
    availability: AvailabilityFilter,
    validator: StopSequenceValidator,
    hub_scorer: HubCompatibilityScorer,
    scorer: RouteScorer,
    extractor: FeatureExtractor,
    ml: MLScorer,
    hybrid: HybridScorer,
}

impl MatchingOrchestrator {
    pub fn new(
        config: MatchingConfig,
        finder: GeoCandidateFinder,
        hubs: HubCache,
        driver_stats: DriverStatsCache,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let scorer = RouteScorer::new(config.weights)?;

        tracing::info!(
            weights = ?config.weights,
            ml_enabled = config.ml_enabled,
            max_candidates = config.max_candidate_routes,
            "Matching orchestrator initialized"
        );

        Ok(Self {
            time_filter: TimeWindowFilter::new(config.time_window_minutes),
            availability: AvailabilityFilter,
            validator: StopSequenceValidator::new(config.stop_proximity_km),
            hub_scorer: HubCompatibilityScorer,
            scorer,
            extractor: FeatureExtractor,
            ml: MLScorer::default(),
            hybrid: HybridScorer::new(config.hybrid_alpha),
            config,
            finder,
            hubs,
            driver_stats,
        })
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub async fn find_matches(
        &self,
        request: &MatchRequest,
        deadline: Option<Instant>,
    ) -> Result<MatchResponse, MatchingError> {
        self.find_matches_at(request, chrono::Local::now().naive_local(), deadline)
            .await
    }

    /// Same as [`find_matches`](Self::find_matches) with an explicit clock
    /// for the urgency widening of the time window.
    pub async fn find_matches_at(
        &self,
        request: &MatchRequest,
        now: NaiveDateTime,
        deadline: Option<Instant>,
    ) -> Result<MatchResponse, MatchingError> {
        request.validate()?;
        let started = Instant::now();

        let origin = request.origin();
        let destination = request.destination();
        let desired = request.desired_time.time();

        let origin_hub = self.resolve_hub(origin).await;
        let destination_hub = match destination {
            Some(point) => self.resolve_hub(point).await,
            None => None,
        };

        // Stage 1: geo retrieval
        check_deadline(deadline, PipelineStage::Retrieve)?;
        let search = CandidateSearch {
            origin,
            destination,
            radius_meters: request.radius_meters(),
            origin_hub: origin_hub.as_ref().map(|h| h.id),
            destination_hub: destination_hub.as_ref().map(|h| h.id),
            desired_time: desired,
        };
        let routes = self.finder.find(&search).await?;
        let total_candidates = routes.len();
        tracing::debug!(stage = %PipelineStage::Retrieve, count = total_candidates, "Stage complete");

        // Stage 2: time window
        check_deadline(deadline, PipelineStage::FilterTime)?;
        let window = self.time_filter.effective_window(request.desired_time, now);
        let routes = self.time_filter.apply(routes, desired, window);
        tracing::debug!(stage = %PipelineStage::FilterTime, count = routes.len(), window, "Stage complete");
        if routes.is_empty() {
            return Ok(self.finish(request, MatchResponse::empty(total_candidates, 0), started));
        }

        // Stage 3: seats and price
        check_deadline(deadline, PipelineStage::FilterAvailability)?;
        let routes = self.availability.apply(routes, request.min_seats, request.max_price);
        tracing::debug!(stage = %PipelineStage::FilterAvailability, count = routes.len(), "Stage complete");
        if routes.is_empty() {
            return Ok(self.finish(request, MatchResponse::empty(total_candidates, 0), started));
        }

        // Stage 4: ordering and coverage
        check_deadline(deadline, PipelineStage::ValidateSequence)?;
        let validated = self.validator.apply(routes, origin, destination);
        tracing::debug!(stage = %PipelineStage::ValidateSequence, count = validated.len(), "Stage complete");
        if validated.is_empty() {
            return Ok(self.finish(request, MatchResponse::empty(total_candidates, 0), started));
        }

        // Stage 5: scoring
        check_deadline(deadline, PipelineStage::Score)?;
        let route_hubs = self.load_route_hubs(validated.iter().map(|(route, _)| route)).await;
        let prices: Vec<f64> = validated.iter().map(|(route, _)| route.base_price).collect();
        let context = ScoringContext {
            window_minutes: window,
            prices: PriceRange::from_prices(prices.iter().copied()),
            features: FeatureContext::new(request.desired_time, window, prices),
        };

        let mut candidates: Vec<Candidate> = validated
            .into_iter()
            .map(|(route, sequence)| {
                let hub_score = self.hub_scorer.score(
                    route.origin_hub_id.and_then(|id| route_hubs.get(&id)),
                    route.destination_hub_id.and_then(|id| route_hubs.get(&id)),
                    origin,
                    destination,
                );
                let mut candidate = Candidate {
                    time_diff: time_diff_minutes(route.departure_time, desired),
                    route,
                    sequence,
                    hub_score,
                    driver: None,
                    breakdown: ScoreBreakdown::default(),
                    final_score: 0.0,
                };
                self.score(&mut candidate, &context);
                candidate
            })
            .collect();
        candidates.sort_by(rank);
        tracing::debug!(stage = %PipelineStage::Score, count = candidates.len(), "Stage complete");

        // Stage 6: enrich the leaders with driver stats and re-rank
        check_deadline(deadline, PipelineStage::EnrichTopK)?;
        let top_k = self.config.enrichment_top_k.min(candidates.len());
        let driver_ids: Vec<Uuid> = candidates[..top_k].iter().map(|c| c.route.driver_id).collect();
        let stats = self.driver_stats.get_batch(&driver_ids).await;
        for candidate in candidates.iter_mut().take(top_k) {
            candidate.driver = stats.get(&candidate.route.driver_id).cloned();
            self.score(candidate, &context);
        }
        candidates.sort_by(rank);
        tracing::debug!(stage = %PipelineStage::EnrichTopK, enriched = top_k, "Stage complete");

        // Stage 7: respond
        check_deadline(deadline, PipelineStage::Respond)?;
        let matches: Vec<MatchResult> = candidates.into_iter().map(|c| self.to_result(c)).collect();
        let response = MatchResponse {
            matched_candidates: matches.len(),
            matches,
            total_candidates,
            execution_time_ms: 0,
        };

        Ok(self.finish(request, response, started))
    }

    /// Active routes between two hubs, using the configured window by default
    pub async fn find_routes_by_hubs(&self, query: &HubRoutesQuery) -> Result<Vec<Route>, MatchingError> {
        let window = query.window_minutes.unwrap_or(self.config.time_window_minutes);
        let routes = self
            .finder
            .find_by_hubs(query.origin_hub_id, query.destination_hub_id, query.time, window)
            .await?;
        Ok(routes)
    }

    /// Rule score, blended with the feature score when ML is enabled
    fn score(&self, candidate: &mut Candidate, context: &ScoringContext) {
        let inputs = ScoreInputs {
            sequence: &candidate.sequence,
            time_diff_minutes: candidate.time_diff,
            window_minutes: context.window_minutes,
            driver_rating: candidate.driver_rating(),
            base_price: candidate.route.base_price,
        };
        let (breakdown, rule_score) = self.scorer.score(&inputs, context.prices);

        candidate.breakdown = breakdown;
        candidate.final_score = if self.config.ml_enabled {
            let features = self.extractor.extract(
                &context.features,
                &candidate.route,
                &candidate.sequence,
                candidate.time_diff,
                candidate.driver.as_ref(),
            );
            self.hybrid.blend(rule_score, self.ml.score(&features))
        } else {
            rule_score
        };
    }

    fn to_result(&self, candidate: Candidate) -> MatchResult {
        let explanation = self.scorer.explain(&candidate.breakdown, candidate.time_diff);
        let driver_rating = candidate.driver_rating();
        let route = candidate.route;

        MatchResult {
            route_id: route.id,
            driver_id: route.driver_id,
            final_score: candidate.final_score,
            scores: candidate.breakdown,
            explanation,
            recommended: candidate.final_score >= self.config.recommend_threshold,
            route_name: route.name,
            departure_time: route.departure_time,
            seats_available: route.seats_available,
            base_price: route.base_price,
            driver_rating,
        }
    }

    /// Nearest curated hub within the exact-match radius, `None` on failure
    async fn resolve_hub(&self, point: GeoPoint) -> Option<Hub> {
        match self.hubs.nearest_hub(point, HUB_EXACT_METERS).await {
            Ok(hub) => hub,
            Err(e) => {
                tracing::warn!(error = %e, "Hub resolution failed");
                None
            }
        }
    }

    async fn load_route_hubs<'a, I>(&self, routes: I) -> HashMap<Uuid, Hub>
    where
        I: Iterator<Item = &'a Route>,
    {
        let mut ids: Vec<Uuid> = routes
            .flat_map(|route| [route.origin_hub_id, route.destination_hub_id])
            .flatten()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return HashMap::new();
        }

        self.hubs.get_hubs(&ids).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Route hub lookup failed, scoring without hubs");
            HashMap::new()
        })
    }

    fn finish(&self, request: &MatchRequest, mut response: MatchResponse, started: Instant) -> MatchResponse {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        response.execution_time_ms = elapsed_ms;

        if elapsed_ms > self.config.performance_target_ms {
            tracing::warn!(
                elapsed_ms,
                target_ms = self.config.performance_target_ms,
                "Matching exceeded performance target"
            );
        }
        tracing::info!(
            rider_id = %request.rider_id,
            total_candidates = response.total_candidates,
            matched = response.matched_candidates,
            elapsed_ms,
            "Matching complete"
        );

        response
    }
}

/// Errors once the caller's deadline has passed, naming the stage not run
fn check_deadline(deadline: Option<Instant>, next: PipelineStage) -> Result<(), MatchingError> {
    match deadline {
        Some(at) if Instant::now() >= at => Err(MatchingError::DeadlineExceeded { stage: next }),
        _ => Ok(()),
    }
}

/// Best first; ties go to hub score, then coverage, then route id
fn rank(a: &Candidate, b: &Candidate) -> Ordering {
    b.final_score
        .partial_cmp(&a.final_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.hub_score.partial_cmp(&a.hub_score).unwrap_or(Ordering::Equal))
        .then_with(|| {
            b.sequence
                .coverage_score
                .partial_cmp(&a.sequence.coverage_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.route.id.cmp(&b.route.id))
}
