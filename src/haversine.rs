//! Haversine distance matrix provider (fallback when the road network is unavailable).
//!
//! Uses great-circle distance. Less accurate than a routing engine (ignores
//! roads) but always available.

use rayon::prelude::*;
use tracing::warn;

use crate::error::DistanceError;
use crate::matrix::DistanceMatrix;
use crate::model::Coordinate;
use crate::traits::DistanceMatrixProvider;

/// Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Row count above which rows are computed in parallel.
const PARALLEL_ROWS: usize = 256;

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(from: Coordinate, to: Coordinate) -> f64 {
    if from == to {
        return 0.0;
    }

    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lng = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Haversine-based distance matrix provider.
#[derive(Debug, Clone, Default)]
pub struct HaversineMatrix;

impl HaversineMatrix {
    /// Infallible matrix computation, used directly by the fallback path.
    pub fn compute(locations: &[Coordinate]) -> DistanceMatrix {
        let n = locations.len();
        let row = |i: usize| -> Vec<f64> {
            let from = locations[i];
            locations.iter().map(|to| haversine_km(from, *to)).collect()
        };

        let rows: Vec<Vec<f64>> = if n >= PARALLEL_ROWS {
            (0..n).into_par_iter().map(row).collect()
        } else {
            (0..n).map(row).collect()
        };

        // Finite in-range coordinates always give finite non-negative values.
        DistanceMatrix::from_rows(rows).unwrap_or_else(|err| {
            warn!(
                locations = n,
                error = %err,
                "non-finite haversine distances, using a zero matrix"
            );
            DistanceMatrix::zeros(n)
        })
    }
}

impl DistanceMatrixProvider for HaversineMatrix {
    fn name(&self) -> &'static str {
        "haversine"
    }

    fn matrix_for(&self, locations: &[Coordinate]) -> Result<DistanceMatrix, DistanceError> {
        Ok(Self::compute(locations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon)
    }

    #[test]
    fn test_haversine_same_point() {
        let dist = haversine_km(c(36.1, -115.1), c(36.1, -115.1));
        assert_eq!(dist, 0.0, "Same point should have exactly 0 distance");
    }

    #[test]
    fn test_haversine_known_distance() {
        // Manila (14.5995, 120.9842) to Quezon City (14.6760, 121.0437)
        // Actual distance ~10.5 km
        let dist = haversine_km(c(14.5995, 120.9842), c(14.6760, 121.0437));
        assert!(dist > 10.0 && dist < 11.0, "Manila to QC should be ~10.5km, got {}", dist);
    }

    #[test]
    fn test_matrix_diagonal_is_zero() {
        let locations = vec![c(36.1, -115.1), c(36.2, -115.2), c(36.3, -115.3)];
        let matrix = HaversineMatrix.matrix_for(&locations).unwrap();

        for i in 0..locations.len() {
            assert_eq!(matrix.get(i, i), 0.0, "Diagonal should be zero");
        }
    }

    #[test]
    fn test_matrix_symmetric() {
        let locations = vec![c(36.1, -115.1), c(36.2, -115.2)];
        let matrix = HaversineMatrix.matrix_for(&locations).unwrap();

        assert_eq!(matrix.get(0, 1), matrix.get(1, 0), "Matrix should be symmetric");
    }

    #[test]
    fn test_large_matrix_uses_same_values() {
        let locations: Vec<_> = (0..300).map(|i| c(14.0 + i as f64 * 0.001, 121.0)).collect();
        let matrix = HaversineMatrix::compute(&locations);

        assert_eq!(matrix.size(), 300);
        assert_eq!(matrix.get(3, 250), haversine_km(locations[3], locations[250]));
        assert!(matrix.is_symmetric(1e-9));
    }

    #[test]
    fn test_non_finite_input_gives_zero_matrix() {
        let locations = vec![c(f64::NAN, 121.0), c(14.5, 121.0)];
        let matrix = HaversineMatrix::compute(&locations);

        assert_eq!(matrix.size(), 2);
        assert_eq!(matrix.get(0, 1), 0.0);
    }
}
