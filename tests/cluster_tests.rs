//! Prospect clusterer tests
//!
//! Size bounds, merge behaviour and zone separation.

mod fixtures;

use std::collections::HashSet;

use fixtures::*;
use route_filler::cluster::{ClusterOptions, Clusterer};
use route_filler::distance::DistanceProvider;
use route_filler::model::{Cluster, Point};

fn cluster(points: &[Point], options: ClusterOptions) -> Vec<Cluster> {
    let provider = DistanceProvider::haversine_only();
    Clusterer::new(options, &provider).cluster(points)
}

fn ids(clusters: &[Cluster]) -> Vec<String> {
    let mut ids: Vec<String> =
        clusters.iter().flat_map(|c| c.points.iter().map(|p| p.id.clone())).collect();
    ids.sort();
    ids
}

// ============================================================================
// Split pass
// ============================================================================

#[test]
fn dense_pool_is_split_under_the_maximum() {
    let points = prospects_on_grid("p", MAKATI, 150, "Z1");
    let clusters = cluster(&points, ClusterOptions::default());

    let sizes: Vec<usize> = clusters.iter().map(Cluster::size).collect();
    assert!(sizes.iter().all(|&size| size <= 60), "{sizes:?}");
    assert_eq!(clusters.len(), 3);
    assert_eq!(ids(&clusters).len(), 150);
    assert_eq!(ids(&clusters).into_iter().collect::<HashSet<_>>().len(), 150);
}

#[test]
fn small_maximum_is_still_respected() {
    let points = prospects_on_grid("p", MAKATI, 45, "Z1");
    let options = ClusterOptions { max_size: 7, min_size: 1, ..ClusterOptions::default() };
    let clusters = cluster(&points, options);

    assert!(clusters.iter().all(|c| c.size() <= 7 && c.size() > 0));
    assert_eq!(ids(&clusters).len(), 45);
}

#[test]
fn unlocated_points_are_ignored() {
    let mut points = prospects_on_grid("p", MAKATI, 5, "Z1");
    points.push(Point::prospect("nowhere", None, Some("Z1".to_string())));
    let clusters = cluster(&points, ClusterOptions::default());
    assert!(!ids(&clusters).contains(&"nowhere".to_string()));
    assert_eq!(ids(&clusters).len(), 5);
}

#[test]
fn cluster_ids_are_sequential() {
    let points = prospects_on_grid("p", MAKATI, 150, "Z1");
    let clusters = cluster(&points, ClusterOptions::default());
    let cluster_ids: Vec<usize> = clusters.iter().map(|c| c.id).collect();
    assert_eq!(cluster_ids, (0..clusters.len()).collect::<Vec<_>>());
}

// ============================================================================
// Merge pass
// ============================================================================

#[test]
fn undersized_group_joins_nearest_cluster_with_room() {
    let mut points = prospects_on_grid("big", MAKATI, 40, "Z1");
    points.extend(prospects_on_grid("small", (MAKATI.0 + 0.02, MAKATI.1), 5, "Z1"));

    let clusters = cluster(&points, ClusterOptions::default());

    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].size(), 45);
    assert!(!clusters[0].undersized);
}

#[test]
fn merge_never_overflows_the_maximum() {
    let mut points = prospects_on_grid("big", MAKATI, 58, "Z1");
    points.extend(prospects_on_grid("small", (MAKATI.0 + 0.02, MAKATI.1), 5, "Z1"));

    let clusters = cluster(&points, ClusterOptions::default());

    assert_eq!(clusters.len(), 2);
    assert!(clusters.iter().all(|c| c.size() <= 60));
    let small = clusters.iter().find(|c| c.size() == 5).unwrap();
    assert!(small.undersized);
}

#[test]
fn undersized_clusters_only_remain_when_flagged() {
    let mut points = prospects_on_grid("a", MAKATI, 130, "Z1");
    points.extend(prospects_on_grid("b", BGC, 7, "Z1"));

    let clusters = cluster(&points, ClusterOptions::default());

    for c in &clusters {
        assert!(c.size() <= 60);
        if c.size() < 20 {
            assert!(c.undersized, "cluster {} has {} points but is not flagged", c.id, c.size());
        }
    }
    assert_eq!(ids(&clusters).len(), 137);
}

// ============================================================================
// Zones
// ============================================================================

#[test]
fn clusters_never_mix_zones() {
    let mut points = prospects_on_grid("n", MAKATI, 30, "NORTH");
    // Same coordinates, different zone tag.
    points.extend(prospects_on_grid("s", MAKATI, 30, "SOUTH"));

    let clusters = cluster(&points, ClusterOptions::default());

    assert_eq!(clusters.len(), 2);
    for c in &clusters {
        let zones: HashSet<_> = c.points.iter().map(|p| p.zone.clone()).collect();
        assert_eq!(zones.len(), 1);
        assert_eq!(c.zone, c.points[0].zone);
    }
}

#[test]
fn clustering_is_deterministic() {
    let mut points = prospects_on_grid("p", MAKATI, 90, "Z1");
    points.reverse();
    let first = cluster(&points, ClusterOptions::default());
    let second = cluster(&points, ClusterOptions::default());
    assert_eq!(first, second);
}
