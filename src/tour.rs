//! Tour construction: greedy nearest-neighbour walk with optional 2-opt refinement.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ContractViolation;
use crate::matrix::DistanceMatrix;
use crate::model::{Coordinate, Point, TourAssignment, TourEntry};

/// Sequence position given to stops without a usable coordinate.
pub const DEFAULT_SENTINEL: u32 = 100;

/// Improvements smaller than this are treated as ties.
const EPSILON_KM: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TourOptions {
    /// Reserved terminal position for unlocated stops.
    pub sentinel: u32,
    /// Run pairwise segment reversal after the greedy walk.
    pub two_opt: bool,
    pub max_two_opt_passes: usize,
}

impl Default for TourOptions {
    fn default() -> Self {
        Self {
            sentinel: DEFAULT_SENTINEL,
            two_opt: true,
            max_two_opt_passes: 50,
        }
    }
}

/// Where the walk begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TourStart<'a> {
    /// An external origin (distributor depot) stored at matrix index 0. It is
    /// not a stop and receives no position.
    Depot,
    /// A member of the point set, visited first.
    Point(&'a str),
}

/// Coordinates in the order [`build_tour`] expects its matrix to be indexed:
/// the depot (if any) followed by located points in input order.
pub fn tour_locations(points: &[Point], depot: Option<Coordinate>) -> Vec<Coordinate> {
    depot
        .into_iter()
        .chain(points.iter().filter_map(|point| point.coordinate))
        .collect()
}

/// Orders `points` into a visiting sequence.
///
/// Unlocated points are set aside with the sentinel position, which must lie
/// beyond the located points whenever there are any. Located points
/// are visited by repeatedly moving to the nearest unvisited point; ties go
/// to the lowest identifier so identical inputs give identical tours. Without
/// a start, the walk begins at the lowest identifier.
///
/// `matrix` must be indexed like [`tour_locations`].
pub fn build_tour(
    points: &[Point],
    matrix: &DistanceMatrix,
    start: Option<TourStart<'_>>,
    options: &TourOptions,
) -> Result<TourAssignment, ContractViolation> {
    let mut seen = HashSet::with_capacity(points.len());
    if let Some(duplicate) = points.iter().find(|point| !seen.insert(point.id.as_str())) {
        return Err(ContractViolation::DuplicateId(duplicate.id.clone()));
    }

    let located: Vec<&Point> = points.iter().filter(|point| point.is_located()).collect();
    let offset = usize::from(start == Some(TourStart::Depot));
    matrix.ensure_size(located.len() + offset)?;

    let unlocated = points.len() - located.len();
    if unlocated > 0 && located.len() >= options.sentinel as usize {
        return Err(ContractViolation::SentinelCollision {
            located: located.len(),
            sentinel: options.sentinel,
        });
    }

    let ids: Vec<&str> = located.iter().map(|point| point.id.as_str()).collect();
    let walk = Walk { matrix, ids: &ids, offset };

    let mut path = walk.nearest_neighbour(start)?;
    if options.two_opt {
        walk.two_opt(&mut path, options.max_two_opt_passes);
    }
    let length_km = walk.length(&path);

    debug!(
        located = located.len(),
        unlocated,
        length_km,
        "tour built"
    );

    let entries = path
        .iter()
        .enumerate()
        .map(|(rank, &node)| TourEntry {
            point: located[node].clone(),
            position: rank as u32 + 1,
        })
        .chain(points.iter().filter(|point| !point.is_located()).map(|point| TourEntry {
            point: point.clone(),
            position: options.sentinel,
        }))
        .collect();

    Ok(TourAssignment {
        entries,
        sentinel: options.sentinel,
        length_km,
    })
}

/// Greedy walk state over located points. Node `n` lives at matrix index `n + offset`.
struct Walk<'a> {
    matrix: &'a DistanceMatrix,
    ids: &'a [&'a str],
    offset: usize,
}

impl Walk<'_> {
    fn cost(&self, from: Option<usize>, to: usize) -> f64 {
        match from {
            Some(from) => self.matrix.get(from + self.offset, to + self.offset),
            // Depot leg; zero when there is no depot.
            None if self.offset == 1 => self.matrix.get(0, to + 1),
            None => 0.0,
        }
    }

    /// Nearest unvisited node from `from`, ties to the lowest identifier.
    fn nearest(&self, from: Option<usize>, visited: &[bool]) -> Option<usize> {
        let mut best: Option<(f64, usize)> = None;
        for candidate in (0..self.ids.len()).filter(|&n| !visited[n]) {
            let distance = self.cost(from, candidate);
            let better = match best {
                None => true,
                Some((best_distance, best_node)) => {
                    distance < best_distance
                        || (distance == best_distance && self.ids[candidate] < self.ids[best_node])
                }
            };
            if better {
                best = Some((distance, candidate));
            }
        }
        best.map(|(_, node)| node)
    }

    fn nearest_neighbour(
        &self,
        start: Option<TourStart<'_>>,
    ) -> Result<Vec<usize>, ContractViolation> {
        let n = self.ids.len();
        let mut visited = vec![false; n];
        let mut path = Vec::with_capacity(n);
        if n == 0 {
            return Ok(path);
        }

        let first = match start {
            Some(TourStart::Depot) => self.nearest(None, &visited),
            Some(TourStart::Point(id)) => Some(
                self.ids
                    .iter()
                    .position(|candidate| *candidate == id)
                    .ok_or_else(|| ContractViolation::UnknownStart(id.to_string()))?,
            ),
            None => (0..n).min_by_key(|&node| self.ids[node]),
        };

        let mut current = first;
        while let Some(node) = current {
            visited[node] = true;
            path.push(node);
            current = self.nearest(Some(node), &visited);
        }

        Ok(path)
    }

    fn length(&self, path: &[usize]) -> f64 {
        let mut previous = None;
        let mut total = 0.0;
        for &node in path {
            total += self.cost(previous, node);
            previous = Some(node);
        }
        total
    }

    /// Segment reversal on the open path. The first stop never moves.
    fn two_opt(&self, path: &mut [usize], max_passes: usize) {
        if path.len() < 3 {
            return;
        }

        for _ in 0..max_passes {
            let mut improved = false;
            let last = path.len() - 1;

            for i in 1..last {
                for j in (i + 1)..=last {
                    let before = Some(path[i - 1]);
                    let mut delta = self.cost(before, path[j]) - self.cost(before, path[i]);
                    if j < last {
                        let next = path[j + 1];
                        delta += self.cost(Some(path[i]), next) - self.cost(Some(path[j]), next);
                    }
                    if delta < -EPSILON_KM {
                        path[i..=j].reverse();
                        improved = true;
                    }
                }
            }

            if !improved {
                break;
            }
        }
    }
}
