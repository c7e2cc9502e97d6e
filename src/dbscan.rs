//! Density-Based Spatial Clustering of Applications with Noise (DBSCAN).

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Groups points whose neighbourhoods are dense enough.
///
/// `min_points`: minimum neighbourhood size (the point itself included) for a
/// point to seed or extend a group.
/// `neighborhood_fn`: returns the neighbours of a point, including the point
/// itself.
///
/// Points that end up in no group are noise and are left out of the result.
/// Output order follows input order, so the result is deterministic.
pub fn create_clusters<'a, T, IS, FN, IR>(
    points: IS,
    min_points: usize,
    neighborhood_fn: FN,
) -> Vec<Vec<&'a T>>
where
    T: Hash + Eq + ?Sized,
    IS: IntoIterator<Item = &'a T>,
    FN: Fn(&'a T) -> IR,
    IR: Iterator<Item = &'a T>,
{
    let mut states = HashMap::<&T, PointState>::new();
    let mut clusters = Vec::new();

    for point in points {
        if states.contains_key(point) {
            continue;
        }

        let mut frontier = neighborhood_fn(point).collect::<Vec<_>>();
        if frontier.len() < min_points {
            states.insert(point, PointState::Noise);
            continue;
        }

        let mut queued = frontier.iter().copied().collect::<HashSet<_>>();
        let mut cluster = vec![point];
        states.insert(point, PointState::Clustered);

        let mut index = 0;
        while index < frontier.len() {
            let neighbour = frontier[index];
            index += 1;

            match states.get(neighbour) {
                Some(PointState::Clustered) => continue,
                // Noise reached from a core point becomes a border point.
                Some(PointState::Noise) => {}
                None => {
                    let extended = neighborhood_fn(neighbour).collect::<Vec<_>>();
                    if extended.len() >= min_points {
                        for candidate in extended {
                            if queued.insert(candidate) {
                                frontier.push(candidate);
                            }
                        }
                    }
                }
            }

            states.insert(neighbour, PointState::Clustered);
            cluster.push(neighbour);
        }

        clusters.push(cluster);
    }

    clusters
}

#[derive(Clone, Copy, Eq, PartialEq)]
enum PointState {
    Noise,
    Clustered,
}
