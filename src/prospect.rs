//! Prospect discovery and admission for under-sized routes.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::{ClusterOptions, Clusterer};
use crate::distance::{DistanceProvider, lock};
use crate::error::{ContractViolation, StoreError};
use crate::haversine::haversine_km;
use crate::model::{Cluster, Coordinate, Point, StopKind, TourAssignment, UnitKey};
use crate::tour::{TourOptions, TourStart, build_tour, tour_locations};
use crate::traits::{RadiusPolicy, StoreConnection};

/// Radius expansion used when zone matching leaves a route short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchRadius {
    /// `initial_km`, doubled until the maximum is reached.
    Doubling { initial_km: f64 },
    /// Explicit radii; steps above the maximum are dropped.
    Fixed { steps_km: Vec<f64> },
}

impl Default for SearchRadius {
    fn default() -> Self {
        SearchRadius::Doubling { initial_km: 1.25 }
    }
}

impl RadiusPolicy for SearchRadius {
    fn radii(&self, max_km: f64) -> Vec<f64> {
        if !(max_km > 0.0) {
            return Vec::new();
        }
        match self {
            SearchRadius::Doubling { initial_km } => {
                let mut radii = Vec::new();
                let mut radius = initial_km.max(f64::EPSILON);
                while radius < max_km {
                    radii.push(radius);
                    radius *= 2.0;
                }
                radii.push(max_km);
                radii
            }
            SearchRadius::Fixed { steps_km } => {
                let mut radii: Vec<f64> =
                    steps_km.iter().copied().filter(|r| *r > 0.0 && *r <= max_km).collect();
                radii.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                radii.dedup();
                radii
            }
        }
    }
}

/// Run-wide record of admitted prospects.
///
/// Claims happen under a single lock so two units never admit the same
/// prospect.
#[derive(Debug, Default)]
pub struct AdmissionRegistry {
    claimed: Mutex<HashSet<String>>,
}

impl AdmissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims up to `limit` of `ranked`, in order, skipping ids already claimed.
    pub fn claim(&self, ranked: impl IntoIterator<Item = Point>, limit: usize) -> Vec<Point> {
        let mut claimed = lock(&self.claimed);
        let mut admitted = Vec::new();
        for point in ranked {
            if admitted.len() >= limit {
                break;
            }
            if claimed.insert(point.id.clone()) {
                admitted.push(point);
            }
        }
        admitted
    }

    pub fn release<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let mut claimed = lock(&self.claimed);
        for id in ids {
            claimed.remove(id);
        }
    }

    pub fn is_claimed(&self, id: &str) -> bool {
        lock(&self.claimed).contains(id)
    }

    pub fn len(&self) -> usize {
        lock(&self.claimed).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Search settings for [`ProspectSelector`].
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    pub zone_matching: bool,
    pub max_search_radius_km: f64,
    pub radius: SearchRadius,
    pub cluster: ClusterOptions,
}

/// Finds and admits prospects for one unit.
pub struct ProspectSelector<'a> {
    policy: &'a SelectionPolicy,
    distances: &'a DistanceProvider,
    registry: &'a AdmissionRegistry,
}

impl<'a> ProspectSelector<'a> {
    pub fn new(
        policy: &'a SelectionPolicy,
        distances: &'a DistanceProvider,
        registry: &'a AdmissionRegistry,
    ) -> Self {
        Self {
            policy,
            distances,
            registry,
        }
    }

    /// Admits up to `deficit` prospects near the `existing` stops.
    ///
    /// Candidates come from the stops' zones first, then from growing radii
    /// around the centroid of located stops. A short supply is not an error:
    /// fewer than `deficit` prospects may be returned.
    pub fn select<C: StoreConnection>(
        &self,
        conn: &mut C,
        unit: &UnitKey,
        existing: &[Point],
        visited: &HashSet<String>,
        deficit: usize,
    ) -> Result<Vec<Point>, StoreError> {
        if deficit == 0 {
            return Ok(Vec::new());
        }

        let excluded: HashSet<&str> = existing
            .iter()
            .map(|point| point.id.as_str())
            .chain(visited.iter().map(String::as_str))
            .collect();
        let eligible = |point: &Point| {
            point.is_located()
                && !excluded.contains(point.id.as_str())
                && !self.registry.is_claimed(&point.id)
        };

        let mut pool: BTreeMap<String, Point> = BTreeMap::new();

        let zones: Vec<String> = existing
            .iter()
            .filter_map(|point| point.zone.as_deref().map(str::trim))
            .filter(|zone| !zone.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if self.policy.zone_matching && !zones.is_empty() {
            for point in conn.prospects_in_zones(unit, &zones)? {
                if eligible(&point) {
                    pool.entry(point.id.clone()).or_insert(point);
                }
            }
            debug!(zones = zones.len(), found = pool.len(), "zone prospect search");
        }

        let center =
            Coordinate::centroid(existing.iter().filter_map(|point| point.coordinate.as_ref()));
        if pool.len() < deficit {
            match center {
                Some(center) => {
                    for radius in self.policy.radius.radii(self.policy.max_search_radius_km) {
                        for point in conn.prospects_near(unit, center, radius)? {
                            if eligible(&point) {
                                pool.entry(point.id.clone()).or_insert(point);
                            }
                        }
                        debug!(radius_km = radius, found = pool.len(), "radius prospect search");
                        if pool.len() >= deficit {
                            break;
                        }
                    }
                }
                None => debug!("no located stops, skipping radius search"),
            }
        }

        if pool.is_empty() {
            info!(deficit, "no prospects available for this unit");
            return Ok(Vec::new());
        }

        let candidates: Vec<Point> = pool
            .into_values()
            .map(|mut point| {
                point.kind = StopKind::Prospect;
                point
            })
            .collect();
        let ranked = self.rank(&candidates, center);
        let admitted = self.registry.claim(ranked, deficit);

        if admitted.len() < deficit {
            warn!(deficit, admitted = admitted.len(), "partial fill");
        }
        Ok(admitted)
    }

    /// Orders candidates cluster by cluster, nearest cluster first.
    fn rank(&self, candidates: &[Point], center: Option<Coordinate>) -> Vec<Point> {
        let mut clusters =
            Clusterer::new(self.policy.cluster.clone(), self.distances).cluster(candidates);

        match center {
            Some(center) => {
                let distance = |c: &Coordinate| haversine_km(center, *c);
                clusters.sort_by(|a, b| {
                    distance(&a.centroid)
                        .partial_cmp(&distance(&b.centroid))
                        .unwrap_or(Ordering::Equal)
                        .then(a.id.cmp(&b.id))
                });
                clusters
                    .into_iter()
                    .flat_map(|cluster| {
                        let mut points = cluster.points;
                        points.sort_by(|a, b| {
                            let da = a.coordinate.as_ref().map_or(f64::MAX, distance);
                            let db = b.coordinate.as_ref().map_or(f64::MAX, distance);
                            da.partial_cmp(&db)
                                .unwrap_or(Ordering::Equal)
                                .then_with(|| a.id.cmp(&b.id))
                        });
                        points
                    })
                    .collect()
            }
            None => {
                clusters.sort_by(|a, b| b.size().cmp(&a.size()).then(a.id.cmp(&b.id)));
                clusters
                    .into_iter()
                    .flat_map(|cluster| {
                        let mut points = cluster.points;
                        points.sort_by(|a, b| a.id.cmp(&b.id));
                        points
                    })
                    .collect()
            }
        }
    }
}

/// A standalone route built from one prospect cluster.
#[derive(Debug, Clone)]
pub struct ProspectRoute {
    pub cluster: Cluster,
    pub tour: TourAssignment,
}

/// Prospect-only planning: clusters a pool and sequences each cluster.
pub fn plan_prospect_routes(
    pool: &[Point],
    cluster_options: &ClusterOptions,
    tour_options: &TourOptions,
    distances: &DistanceProvider,
    depot: Option<Coordinate>,
) -> Result<Vec<ProspectRoute>, ContractViolation> {
    let clusters = Clusterer::new(cluster_options.clone(), distances).cluster(pool);
    info!(prospects = pool.len(), clusters = clusters.len(), "planning prospect routes");

    clusters
        .into_iter()
        .map(|cluster| {
            let matrix = distances.get_matrix(&tour_locations(&cluster.points, depot));
            let start = depot.map(|_| TourStart::Depot);
            let tour = build_tour(&cluster.points, &matrix.matrix, start, tour_options)?;
            Ok(ProspectRoute { cluster, tour })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_radii_stop_at_maximum() {
        let radii = SearchRadius::Doubling { initial_km: 1.25 }.radii(5.0);
        assert_eq!(radii, vec![1.25, 2.5, 5.0]);
    }

    #[test]
    fn fixed_radii_are_sorted_and_capped() {
        let radii = SearchRadius::Fixed { steps_km: vec![10.0, 2.0, 5.0, 2.0] }.radii(5.0);
        assert_eq!(radii, vec![2.0, 5.0]);
    }

    #[test]
    fn registry_never_admits_twice() {
        let registry = AdmissionRegistry::new();
        let p = |id: &str| Point::prospect(id, Some(Coordinate::new(14.6, 121.0)), None);

        let first = registry.claim(vec![p("a"), p("b")], 5);
        let second = registry.claim(vec![p("b"), p("c")], 5);

        assert_eq!(first.len(), 2);
        assert_eq!(second.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["c"]);

        registry.release(["a"]);
        assert!(!registry.is_claimed("a"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn claim_respects_limit() {
        let registry = AdmissionRegistry::new();
        let points: Vec<Point> =
            (0..5).map(|i| Point::prospect(format!("p{i}"), None, None)).collect();
        assert_eq!(registry.claim(points, 3).len(), 3);
    }
}
