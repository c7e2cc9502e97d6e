//! Prospect clustering: density grouping, size-bounded split, undersized merge.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dbscan::create_clusters;
use crate::distance::DistanceProvider;
use crate::model::{Cluster, Coordinate, Point};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Upper bound on cluster size after the split pass.
    pub max_size: usize,
    /// Clusters below this size are merged into a neighbour when possible.
    pub min_size: usize,
    /// Neighbourhood radius for density grouping.
    pub neighbor_radius_km: f64,
    /// Neighbourhood size (point included) needed to seed a group.
    pub min_neighbors: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            max_size: 60,
            min_size: 20,
            neighbor_radius_km: 0.5,
            min_neighbors: 3,
        }
    }
}

/// Partitions prospect pools into balanced, size-bounded groups.
pub struct Clusterer<'a> {
    options: ClusterOptions,
    distances: &'a DistanceProvider,
}

impl<'a> Clusterer<'a> {
    pub fn new(options: ClusterOptions, distances: &'a DistanceProvider) -> Self {
        Self { options, distances }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Clusters `points` zone by zone.
    ///
    /// Points without a coordinate are ignored. Every returned cluster has at
    /// most `max_size` points; clusters below `min_size` remain only when
    /// their zone offered no merge target, and carry `undersized`.
    pub fn cluster(&self, points: &[Point]) -> Vec<Cluster> {
        let mut zones: BTreeMap<Option<&str>, Vec<&Point>> = BTreeMap::new();
        for point in points.iter().filter(|point| point.is_located()) {
            zones.entry(point.zone.as_deref()).or_default().push(point);
        }

        let mut clusters = Vec::new();
        for (zone, mut pool) in zones {
            pool.sort_by(|a, b| a.id.cmp(&b.id));
            let split = self.split_zone(zone, &pool);
            let merged = self.merge_zone(split);
            debug!(
                zone = zone.unwrap_or("-"),
                points = pool.len(),
                clusters = merged.len(),
                "zone clustered"
            );
            clusters.extend(merged);
        }

        for (id, cluster) in clusters.iter_mut().enumerate() {
            cluster.id = id;
        }
        clusters
    }

    /// Pass 1: density groups, noise as singletons, oversized groups bisected.
    fn split_zone(&self, zone: Option<&str>, pool: &[&Point]) -> Vec<Cluster> {
        let coords: Vec<Coordinate> = pool.iter().filter_map(|point| point.coordinate).collect();
        let matrix = self.distances.get_matrix(&coords);
        let radius = self.options.neighbor_radius_km;
        let indices: Vec<usize> = (0..pool.len()).collect();

        let groups = create_clusters(indices.iter(), self.options.min_neighbors, |&i| {
            let row = matrix.matrix.row(i);
            indices.iter().filter(move |&&j| row[j] <= radius)
        });

        let mut assigned = vec![false; pool.len()];
        let mut members: Vec<Vec<usize>> = Vec::with_capacity(groups.len());
        for group in groups {
            let group: Vec<usize> = group.into_iter().copied().collect();
            group.iter().for_each(|&i| assigned[i] = true);
            members.push(group);
        }
        members.extend((0..pool.len()).filter(|&i| !assigned[i]).map(|i| vec![i]));

        let max_size = self.options.max_size.max(1);
        let mut clusters = Vec::new();
        for group in members {
            let mut parts = Vec::new();
            bisect(group, &coords, pool, max_size, &mut parts);
            for part in parts {
                let points = part.into_iter().map(|i| pool[i].clone()).collect();
                let zone = zone.map(str::to_string);
                if let Some(cluster) = Cluster::new(clusters.len(), zone, points) {
                    clusters.push(cluster);
                }
            }
        }
        clusters
    }

    /// Pass 2: undersized clusters join the nearest cluster that is at or above
    /// `min_size` and still has room. All decisions use the post-split state.
    fn merge_zone(&self, mut clusters: Vec<Cluster>) -> Vec<Cluster> {
        let (min_size, max_size) = (self.options.min_size, self.options.max_size);
        let sizes: Vec<usize> = clusters.iter().map(Cluster::size).collect();
        let small: Vec<usize> = (0..clusters.len()).filter(|&i| sizes[i] < min_size).collect();
        if small.is_empty() {
            return clusters;
        }

        let targets: Vec<usize> = (0..clusters.len())
            .filter(|&i| sizes[i] >= min_size && sizes[i] < max_size)
            .collect();
        let centroids: Vec<Coordinate> = clusters.iter().map(|cluster| cluster.centroid).collect();
        let matrix = self.distances.get_matrix(&centroids);

        let mut load = sizes.clone();
        let mut merge_into: Vec<Option<usize>> = vec![None; clusters.len()];
        for &source in &small {
            let mut candidates: Vec<usize> = targets.clone();
            candidates.sort_by(|&a, &b| {
                matrix.matrix.get(source, a)
                    .partial_cmp(&matrix.matrix.get(source, b))
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(&b))
            });

            match candidates.into_iter().find(|&target| load[target] + sizes[source] <= max_size) {
                Some(target) => {
                    load[target] += sizes[source];
                    merge_into[source] = Some(target);
                }
                None => {
                    warn!(
                        zone = clusters[source].zone.as_deref().unwrap_or("-"),
                        size = sizes[source],
                        min_size,
                        "no merge target for undersized cluster"
                    );
                    clusters[source].undersized = true;
                }
            }
        }

        let mut slots: Vec<Option<Cluster>> = clusters.into_iter().map(Some).collect();
        let mut merged = 0;
        for (source, target) in merge_into.iter().enumerate() {
            if let Some(target) = *target {
                if let Some(cluster) = slots[source].take() {
                    if let Some(into) = slots[target].as_mut() {
                        into.absorb(cluster);
                        merged += 1;
                    }
                }
            }
        }
        if merged > 0 {
            info!(merged, "merged undersized clusters");
        }

        slots.into_iter().flatten().collect()
    }
}

/// Splits `group` into contiguous parts of at most `max_size`, cutting along
/// the wider spatial axis so each part stays compact.
fn bisect(
    mut group: Vec<usize>,
    coords: &[Coordinate],
    pool: &[&Point],
    max_size: usize,
    out: &mut Vec<Vec<usize>>,
) {
    if group.len() <= max_size {
        out.push(group);
        return;
    }

    let spread = |key: &dyn Fn(&Coordinate) -> f64| {
        let (min, max) = group
            .iter()
            .map(|&i| key(&coords[i]))
            .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        max - min
    };
    let mid_lat = Coordinate::centroid(group.iter().map(|&i| &coords[i])).map_or(0.0, |c| c.lat);
    let lon_scale = mid_lat.to_radians().cos();
    let by_lat = spread(&|c: &Coordinate| c.lat) >= spread(&|c: &Coordinate| c.lon * lon_scale);

    group.sort_by(|&a, &b| {
        let (ka, kb) = if by_lat {
            (coords[a].lat, coords[b].lat)
        } else {
            (coords[a].lon, coords[b].lon)
        };
        ka.partial_cmp(&kb).unwrap_or(Ordering::Equal).then_with(|| pool[a].id.cmp(&pool[b].id))
    });

    let parts = group.len().div_ceil(max_size);
    let left_len = group.len() * (parts / 2) / parts;
    let right = group.split_off(left_len);
    bisect(group, coords, pool, max_size, out);
    bisect(right, coords, pool, max_size, out);
}
