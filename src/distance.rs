//! Distance matrix provider with a primary/fallback strategy and a
//! process-lifetime cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::haversine::HaversineMatrix;
use crate::matrix::DistanceMatrix;
use crate::model::Coordinate;
use crate::traits::DistanceMatrixProvider;

/// Which strategy produced a matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatrixSource {
    Primary,
    Fallback,
}

/// A matrix plus a record of how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMatrix {
    pub matrix: DistanceMatrix,
    pub source: MatrixSource,
    pub provider: &'static str,
}

/// Deterministic identity of an ordered coordinate sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(locations: &[Coordinate]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((locations.len() as u64).to_le_bytes());
        for location in locations {
            hasher.update(location.lat.to_bits().to_le_bytes());
            hasher.update(location.lon.to_bits().to_le_bytes());
        }
        Self(hasher.finalize().into())
    }
}

#[derive(Debug, Default)]
struct Counters {
    primary: AtomicUsize,
    fallback: AtomicUsize,
    cache_hits: AtomicUsize,
}

/// Point-in-time copy of the provider counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DistanceStats {
    pub primary: usize,
    pub fallback: usize,
    pub cache_hits: usize,
}

type Slot = Arc<OnceLock<Arc<CachedMatrix>>>;

/// Computes distance matrices for point sequences.
///
/// A primary provider (road network) is tried first when configured; any
/// error or timeout falls back to haversine, which cannot fail. Results of
/// either kind are cached by [`Fingerprint`] and never invalidated. The cache
/// is safe to share across worker threads: concurrent requests for the same
/// sequence block on one computation instead of issuing duplicate calls.
pub struct DistanceProvider {
    primary: Option<Box<dyn DistanceMatrixProvider>>,
    cache_enabled: bool,
    cache: Mutex<HashMap<Fingerprint, Slot>>,
    counters: Counters,
}

impl Default for DistanceProvider {
    fn default() -> Self {
        Self::haversine_only()
    }
}

impl DistanceProvider {
    /// A provider that always uses the geometric approximation.
    pub fn haversine_only() -> Self {
        Self {
            primary: None,
            cache_enabled: true,
            cache: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_primary(primary: Box<dyn DistanceMatrixProvider>) -> Self {
        Self {
            primary: Some(primary),
            ..Self::haversine_only()
        }
    }

    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Returns a matrix for `locations`, indexed in the given order.
    pub fn get_matrix(&self, locations: &[Coordinate]) -> Arc<CachedMatrix> {
        if !self.cache_enabled {
            return Arc::new(self.compute(locations));
        }

        let key = Fingerprint::of(locations);
        let slot = {
            let mut cache = lock(&self.cache);
            Arc::clone(cache.entry(key).or_default())
        };

        let mut computed = false;
        let entry = slot.get_or_init(|| {
            computed = true;
            Arc::new(self.compute(locations))
        });

        if !computed {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(points = locations.len(), "distance matrix cache hit");
        }

        Arc::clone(entry)
    }

    pub fn stats(&self) -> DistanceStats {
        DistanceStats {
            primary: self.counters.primary.load(Ordering::Relaxed),
            fallback: self.counters.fallback.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
        }
    }

    pub fn cached_entries(&self) -> usize {
        lock(&self.cache).len()
    }

    fn compute(&self, locations: &[Coordinate]) -> CachedMatrix {
        // Nothing to ask a routing engine about.
        if locations.len() <= 1 {
            return self.fallback(locations);
        }

        let Some(primary) = &self.primary else {
            return self.fallback(locations);
        };

        match primary.matrix_for(locations) {
            Ok(matrix) if matrix.size() == locations.len() => {
                self.counters.primary.fetch_add(1, Ordering::Relaxed);
                debug!(
                    points = locations.len(),
                    provider = primary.name(),
                    "primary distance matrix"
                );
                CachedMatrix {
                    matrix,
                    source: MatrixSource::Primary,
                    provider: primary.name(),
                }
            }
            Ok(matrix) => {
                warn!(
                    provider = primary.name(),
                    expected = locations.len(),
                    got = matrix.size(),
                    "primary distance matrix has the wrong size, using haversine"
                );
                self.fallback(locations)
            }
            Err(err) => {
                warn!(
                    provider = primary.name(),
                    error = %err,
                    "primary distance provider failed, using haversine"
                );
                self.fallback(locations)
            }
        }
    }

    fn fallback(&self, locations: &[Coordinate]) -> CachedMatrix {
        self.counters.fallback.fetch_add(1, Ordering::Relaxed);
        CachedMatrix {
            matrix: HaversineMatrix::compute(locations),
            source: MatrixSource::Fallback,
            provider: "haversine",
        }
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
