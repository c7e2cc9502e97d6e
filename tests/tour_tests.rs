//! Tour builder tests
//!
//! Positions, sentinel handling, tie-breaking and 2-opt behaviour.

mod fixtures;

use fixtures::*;
use route_filler::error::ContractViolation;
use route_filler::haversine::HaversineMatrix;
use route_filler::model::{Coordinate, Point, TourAssignment};
use route_filler::tour::{TourOptions, TourStart, build_tour, tour_locations};

fn sequence(points: &[Point], depot: Option<Coordinate>, options: &TourOptions) -> TourAssignment {
    let matrix = HaversineMatrix::compute(&tour_locations(points, depot));
    build_tour(points, &matrix, depot.map(|_| TourStart::Depot), options).unwrap()
}

/// Deterministic scatter, no external RNG needed.
fn scatter(count: usize) -> Vec<Point> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    (0..count)
        .map(|i| {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let a = (state >> 33) as f64 / (1u64 << 31) as f64;
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let b = (state >> 33) as f64 / (1u64 << 31) as f64;
            customer_at(&format!("s{i:02}"), MAKATI.0 + a * 0.05, MAKATI.1 + b * 0.05)
        })
        .collect()
}

// ============================================================================
// Positions
// ============================================================================

#[test]
fn located_points_get_a_permutation_of_one_to_k() {
    let points = scatter(25);
    let tour = sequence(&points, None, &TourOptions::default());

    let mut positions: Vec<u32> = tour.entries.iter().map(|e| e.position).collect();
    positions.sort();
    assert_eq!(positions, (1..=25).collect::<Vec<u32>>());
}

#[test]
fn unlocated_points_take_the_sentinel_and_come_last() {
    let mut points = scatter(5);
    points.insert(2, unlocated("u1"));
    points.push(unlocated("u2"));

    let tour = sequence(&points, None, &TourOptions::default());

    assert_eq!(tour.len(), 7);
    let tail: Vec<(&str, u32)> =
        tour.entries[5..].iter().map(|e| (e.point.id.as_str(), e.position)).collect();
    assert_eq!(tail, vec![("u1", 100), ("u2", 100)]);
    assert_eq!(tour.located().count(), 5);
}

#[test]
fn only_unlocated_points() {
    let points = vec![unlocated("a"), unlocated("b"), unlocated("c")];
    let tour = sequence(&points, None, &TourOptions::default());
    assert!(tour.entries.iter().all(|e| e.position == 100));
    assert_eq!(tour.length_km, 0.0);
}

#[test]
fn empty_point_set() {
    let tour = sequence(&[], None, &TourOptions::default());
    assert!(tour.is_empty());
}

#[test]
fn custom_sentinel_is_used() {
    let points = vec![customer_at("a", MAKATI.0, MAKATI.1), unlocated("b")];
    let options = TourOptions { sentinel: 999, ..TourOptions::default() };
    let tour = sequence(&points, None, &options);
    assert_eq!(tour.entries[1].position, 999);
}

// ============================================================================
// Determinism and ties
// ============================================================================

#[test]
fn identical_inputs_give_identical_tours() {
    let points = scatter(30);
    let first = sequence(&points, None, &TourOptions::default());
    let second = sequence(&points, None, &TourOptions::default());
    assert_eq!(first, second);
}

#[test]
fn identical_coordinates_order_by_identifier() {
    let points = vec![
        customer_at("p3", MAKATI.0, MAKATI.1),
        customer_at("p1", MAKATI.0, MAKATI.1),
        customer_at("p2", MAKATI.0, MAKATI.1),
    ];
    let tour = sequence(&points, None, &TourOptions::default());

    assert_eq!(tour.order(), vec!["p1", "p2", "p3"]);
    assert_eq!(tour.length_km, 0.0);
}

// ============================================================================
// Start handling
// ============================================================================

#[test]
fn explicit_start_point_is_visited_first() {
    let points = scatter(10);
    let matrix = HaversineMatrix::compute(&tour_locations(&points, None));
    let start = Some(TourStart::Point("s07"));
    let tour = build_tour(&points, &matrix, start, &TourOptions::default()).unwrap();
    assert_eq!(tour.order()[0], "s07");
}

#[test]
fn depot_start_counts_the_first_leg() {
    let points = vec![customer_at("a", BGC.0, BGC.1)];
    let depot = Some(Coordinate::new(MAKATI.0, MAKATI.1));
    let tour = sequence(&points, depot, &TourOptions::default());
    assert_eq!(tour.order(), vec!["a"]);
    assert!(tour.length_km > 2.0, "depot leg missing: {}", tour.length_km);
}

#[test]
fn depot_start_visits_nearest_stop_first() {
    let points = vec![
        customer_at("far", MAKATI.0, MAKATI.1),
        customer_at("near", BGC.0, BGC.1 - 0.001),
    ];
    let tour = sequence(&points, Some(Coordinate::new(BGC.0, BGC.1)), &TourOptions::default());
    assert_eq!(tour.order(), vec!["near", "far"]);
}

// ============================================================================
// Refinement
// ============================================================================

#[test]
fn two_opt_never_lengthens_the_tour() {
    for count in [4, 12, 40] {
        let points = scatter(count);
        let greedy_only = TourOptions { two_opt: false, ..TourOptions::default() };
        let greedy = sequence(&points, None, &greedy_only);
        let refined = sequence(&points, None, &TourOptions::default());
        assert!(refined.length_km <= greedy.length_km + 1e-9, "{count} points");
        assert_eq!(refined.order()[0], greedy.order()[0]);
    }
}

// ============================================================================
// Contract violations
// ============================================================================

#[test]
fn duplicate_identifiers_are_rejected() {
    let points = vec![customer_at("a", MAKATI.0, MAKATI.1), unlocated("a")];
    let matrix = HaversineMatrix::compute(&tour_locations(&points, None));
    let err = build_tour(&points, &matrix, None, &TourOptions::default()).unwrap_err();
    assert_eq!(err, ContractViolation::DuplicateId("a".to_string()));
}

#[test]
fn matrix_must_include_the_depot() {
    let points = vec![customer_at("a", MAKATI.0, MAKATI.1)];
    let matrix = HaversineMatrix::compute(&tour_locations(&points, None));
    let err =
        build_tour(&points, &matrix, Some(TourStart::Depot), &TourOptions::default()).unwrap_err();
    assert_eq!(err, ContractViolation::MatrixDimension { expected: 2, actual: 1 });
}
