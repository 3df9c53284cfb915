// Integration tests for the matching pipeline

mod common;

use carpool_match::config::MatchingConfig;
use carpool_match::error::{MatchingError, PipelineStage};
use carpool_match::models::{GeoPoint, HubRoutesQuery};
use common::*;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

/// A day before every desired time used below, so no urgency widening applies
const CALM_NOW: &str = "2026-10-18 12:00";

#[tokio::test]
async fn test_exact_departure_gets_full_time_match() {
    let route = commute_route("08:00", 1000.0);
    let stats = rated_driver(route.driver_id, 4.5);
    let h = harness(vec![route], vec![stats]);

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    assert_eq!(response.matched_candidates, 1);
    assert_eq!(response.matches[0].scores.time_match, 1.0);
}

#[tokio::test]
async fn test_midpoint_price_scores_half() {
    let routes = vec![
        commute_route("08:00", 1000.0),
        commute_route("08:00", 1500.0),
        commute_route("08:00", 2000.0),
    ];
    let h = harness(routes, vec![]);

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    assert_eq!(response.matched_candidates, 3);
    let mid = response.matches.iter().find(|m| m.base_price == 1500.0).unwrap();
    assert!((mid.scores.price - 0.5).abs() < 1e-9);
    let cheapest = response.matches.iter().find(|m| m.base_price == 1000.0).unwrap();
    assert_eq!(cheapest.scores.price, 1.0);
}

#[tokio::test]
async fn test_full_coverage_is_exact_match_and_recommended() {
    let route = commute_route("08:00", 1000.0);
    let stats = rated_driver(route.driver_id, 4.5);
    let h = harness(vec![route], vec![stats]);

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    let m = &response.matches[0];
    assert_eq!(m.scores.route_match, 1.0);
    // 0.40 + 0.30 + 0.15 * 0.9 + 0.15
    assert!((m.final_score - 0.985).abs() < 1e-9);
    assert!(m.recommended);
    assert_eq!(m.driver_rating, Some(4.5));
    assert!(m.explanation.starts_with("Exact route match"));
}

#[tokio::test]
async fn test_weak_candidate_not_recommended() {
    let late = commute_route("08:25", 2000.0);
    let cheap = commute_route("08:00", 1000.0);
    let late_id = late.id;
    let h = harness(vec![late, cheap], vec![]);

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    let m = response.matches.iter().find(|m| m.route_id == late_id).unwrap();
    // 0.40 + 0.30 * 0.55 + 0.15 * 0.5 + 0.15 * 0.0
    assert!((m.final_score - 0.64).abs() < 1e-9);
    assert!(!m.recommended);
    assert_eq!(m.driver_rating, None);
}

#[tokio::test]
async fn test_matches_sorted_by_final_score() {
    let routes = vec![
        commute_route("08:20", 1800.0),
        commute_route("08:00", 1000.0),
        commute_route("07:52", 1200.0),
        commute_route("08:09", 1500.0),
    ];
    let h = harness_with(
        MatchingConfig::default(),
        InMemoryRoutes::new(routes),
        vec![],
        InMemoryDriverStats::new(vec![]),
    );

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    assert_eq!(response.matched_candidates, 4);
    for pair in response.matches.windows(2) {
        assert!(pair[0].final_score >= pair[1].final_score);
    }
    for m in &response.matches {
        assert!((0.0..=1.0).contains(&m.final_score));
    }
}

#[tokio::test]
async fn test_backwards_route_dropped() {
    let midpoint = GeoPoint::new((ORIGIN.lat + DESTINATION.lat) / 2.0, (ORIGIN.lon + DESTINATION.lon) / 2.0);
    let backwards = route_through(&[DESTINATION, midpoint, ORIGIN], "08:00", 1000.0);
    let h = harness(vec![backwards], vec![]);

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    assert_eq!(response.total_candidates, 1);
    assert_eq!(response.matched_candidates, 0);
    assert!(response.matches.is_empty());
}

#[tokio::test]
async fn test_nothing_nearby_is_empty_success() {
    let far = route_through(
        &[GeoPoint::new(13.5, 78.2), GeoPoint::new(13.6, 78.3)],
        "08:00",
        1000.0,
    );
    let h = harness(vec![far], vec![]);

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    assert_eq!(response.total_candidates, 0);
    assert_eq!(response.matched_candidates, 0);
    assert!(response.matches.is_empty());
}

#[tokio::test]
async fn test_time_window_wraps_midnight() {
    let h = harness(vec![commute_route("23:50", 1000.0)], vec![]);

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 00:10"), datetime(CALM_NOW), None)
            .await
    );

    assert_eq!(response.matched_candidates, 1);
    assert!(response.matches[0].scores.time_match > 0.5);
}

#[tokio::test]
async fn test_imminent_trip_widens_window() {
    let h = harness(vec![commute_route("08:40", 1000.0)], vec![]);
    let req = request("2026-10-19 08:00");

    let calm = assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);
    assert_eq!(calm.matched_candidates, 0);

    // Leaving right now: 30 min window widened by 1.5x
    let urgent = assert_ok!(
        h.orchestrator
            .find_matches_at(&req, datetime("2026-10-19 08:00"), None)
            .await
    );
    assert_eq!(urgent.matched_candidates, 1);
}

#[tokio::test]
async fn test_seats_and_price_filters() {
    let h = harness(vec![commute_route("08:00", 1000.0)], vec![]);

    let mut req = request("2026-10-19 08:00");
    req.min_seats = 4;
    let response = assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);
    assert_eq!(response.matched_candidates, 0);

    let mut req = request("2026-10-19 08:00");
    req.max_price = Some(900.0);
    let response = assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);
    assert_eq!(response.matched_candidates, 0);

    req.max_price = Some(1000.0);
    let response = assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);
    assert_eq!(response.matched_candidates, 1);
}

#[tokio::test]
async fn test_stats_outage_falls_back_to_neutral_rating() {
    let h = harness_with(
        rule_only_config(),
        InMemoryRoutes::new(vec![commute_route("08:00", 1000.0)]),
        vec![],
        InMemoryDriverStats::failing(),
    );

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    let m = &response.matches[0];
    assert_eq!(m.scores.rating, 0.5);
    assert_eq!(m.driver_rating, None);
}

#[tokio::test]
async fn test_only_top_k_enriched() {
    let first = commute_route("08:00", 1000.0);
    let second = commute_route("08:00", 1000.0);
    let stats = vec![rated_driver(first.driver_id, 5.0), rated_driver(second.driver_id, 5.0)];
    let config = MatchingConfig {
        enrichment_top_k: 1,
        ..rule_only_config()
    };
    let h = harness_with(config, InMemoryRoutes::new(vec![first, second]), vec![], InMemoryDriverStats::new(stats));

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    let enriched = response.matches.iter().filter(|m| m.driver_rating.is_some()).count();
    assert_eq!(enriched, 1);
    assert_eq!(response.matches[0].driver_rating, Some(5.0));
}

#[tokio::test]
async fn test_expired_deadline_stops_pipeline() {
    let h = harness(vec![commute_route("08:00", 1000.0)], vec![]);

    let result = h
        .orchestrator
        .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), Some(Instant::now()))
        .await;

    match assert_err!(result) {
        MatchingError::DeadlineExceeded { stage } => assert_eq!(stage, PipelineStage::Retrieve),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.routes.nearby_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_half_destination_rejected() {
    let h = harness(vec![], vec![]);
    let mut req = request("2026-10-19 08:00");
    req.dest_lon = None;

    let result = h.orchestrator.find_matches(&req, None).await;
    assert!(matches!(assert_err!(result), MatchingError::Validation(_)));
}

#[tokio::test]
async fn test_repository_failure_surfaces() {
    let h = harness_with(
        rule_only_config(),
        InMemoryRoutes::failing(),
        vec![],
        InMemoryDriverStats::new(vec![]),
    );

    let result = h
        .orchestrator
        .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
        .await;
    assert!(matches!(assert_err!(result), MatchingError::Repository(_)));
}

#[tokio::test]
async fn test_known_hubs_serve_search_from_cache() {
    let hubs = vec![hub_at(ORIGIN), hub_at(DESTINATION)];
    let h = harness_with(
        rule_only_config(),
        InMemoryRoutes::new(vec![commute_route("08:00", 1000.0)]),
        hubs,
        InMemoryDriverStats::new(vec![]),
    );
    let req = request("2026-10-19 08:00");

    let first = assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);
    let second = assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);

    assert_eq!(h.routes.nearby_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.matched_candidates, second.matched_candidates);
    assert_eq!(first.matches[0].route_id, second.matches[0].route_id);
}

#[tokio::test]
async fn test_cached_search_is_scoped_to_radius() {
    let hubs = vec![hub_at(ORIGIN), hub_at(DESTINATION)];
    let h = harness_with(
        rule_only_config(),
        InMemoryRoutes::new(vec![commute_route("08:00", 1000.0)]),
        hubs,
        InMemoryDriverStats::new(vec![]),
    );
    // Stops sit ~110 m from both ends
    let mut narrow = request("2026-10-19 08:00");
    narrow.radius_km = 0.1;
    let wide = request("2026-10-19 08:00");

    let first = assert_ok!(h.orchestrator.find_matches_at(&narrow, datetime(CALM_NOW), None).await);
    let second = assert_ok!(h.orchestrator.find_matches_at(&wide, datetime(CALM_NOW), None).await);

    assert_eq!(first.total_candidates, 0);
    assert_eq!(second.total_candidates, 1);
    assert_eq!(second.matched_candidates, 1);
    assert_eq!(h.routes.nearby_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unresolved_destination_skips_search_cache() {
    // Only the pickup side has a hub
    let h = harness_with(
        rule_only_config(),
        InMemoryRoutes::new(vec![commute_route("08:00", 1000.0)]),
        vec![hub_at(ORIGIN)],
        InMemoryDriverStats::new(vec![]),
    );
    let mut origin_only = request("2026-10-19 08:00");
    origin_only.dest_lat = None;
    origin_only.dest_lon = None;
    let with_destination = request("2026-10-19 08:00");

    assert_ok!(h.orchestrator.find_matches_at(&origin_only, datetime(CALM_NOW), None).await);
    assert_ok!(h.orchestrator.find_matches_at(&with_destination, datetime(CALM_NOW), None).await);
    assert_ok!(h.orchestrator.find_matches_at(&with_destination, datetime(CALM_NOW), None).await);
    assert_eq!(h.routes.nearby_calls.load(Ordering::SeqCst), 3);

    // Origin-only lists are still shared
    let again = assert_ok!(h.orchestrator.find_matches_at(&origin_only, datetime(CALM_NOW), None).await);
    assert_eq!(h.routes.nearby_calls.load(Ordering::SeqCst), 3);
    assert_eq!(again.matched_candidates, 1);
}

#[tokio::test]
async fn test_origin_only_request_is_partial_match() {
    let h = harness(vec![commute_route("08:00", 1000.0)], vec![]);
    let mut req = request("2026-10-19 08:00");
    req.dest_lat = None;
    req.dest_lon = None;

    let response = assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);

    assert_eq!(response.matched_candidates, 1);
    let m = &response.matches[0];
    assert_eq!(m.scores.route_match, 0.7);
    assert!(m.explanation.starts_with("Partial route match"));
    // 0.40 * 0.7 + 0.30 + 0.15 * 0.5 + 0.15
    assert!((m.final_score - 0.805).abs() < 1e-9);
    assert!(m.recommended);
}

#[tokio::test]
async fn test_hub_alignment_breaks_score_ties() {
    let pickup_hub = hub_at(ORIGIN);
    let distant_hub = hub_at(GeoPoint::new(DESTINATION.lat - 0.05, DESTINATION.lon));

    // Same geometry, time and price; the plain route wins on id alone
    let mut plain = commute_route("08:00", 1000.0);
    plain.id = Uuid::from_u128(1);
    let mut aligned = commute_route("08:00", 1000.0);
    aligned.id = Uuid::from_u128(2);
    aligned.origin_hub_id = Some(pickup_hub.id);
    aligned.destination_hub_id = Some(distant_hub.id);

    let h = harness_with(
        rule_only_config(),
        InMemoryRoutes::new(vec![plain, aligned]),
        vec![pickup_hub, distant_hub],
        InMemoryDriverStats::new(vec![]),
    );

    let response = assert_ok!(
        h.orchestrator
            .find_matches_at(&request("2026-10-19 08:00"), datetime(CALM_NOW), None)
            .await
    );

    assert_eq!(response.matched_candidates, 2);
    assert_eq!(response.matches[0].final_score, response.matches[1].final_score);
    assert_eq!(response.matches[0].route_id, Uuid::from_u128(2));
    assert_eq!(response.matches[1].route_id, Uuid::from_u128(1));
}

#[tokio::test]
async fn test_unknown_hubs_always_query_store() {
    let h = harness(vec![commute_route("08:00", 1000.0)], vec![]);
    let req = request("2026-10-19 08:00");

    assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);
    assert_ok!(h.orchestrator.find_matches_at(&req, datetime(CALM_NOW), None).await);

    assert_eq!(h.routes.nearby_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_routes_between_hubs_respect_window() {
    let origin_hub = hub_at(ORIGIN);
    let destination_hub = hub_at(DESTINATION);

    let mut on_time = commute_route("08:10", 1000.0);
    on_time.origin_hub_id = Some(origin_hub.id);
    on_time.destination_hub_id = Some(destination_hub.id);
    let mut too_late = commute_route("09:30", 1000.0);
    too_late.origin_hub_id = Some(origin_hub.id);
    too_late.destination_hub_id = Some(destination_hub.id);
    let unrelated = commute_route("08:00", 1000.0);
    let on_time_id = on_time.id;

    let h = harness(vec![on_time, too_late, unrelated], vec![]);
    let query = HubRoutesQuery {
        origin_hub_id: origin_hub.id,
        destination_hub_id: destination_hub.id,
        time: time("08:00"),
        window_minutes: None,
    };

    let routes = assert_ok!(h.orchestrator.find_routes_by_hubs(&query).await);
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].id, on_time_id);
}
