//! Seams between the planning core and its collaborators.
//!
//! The core never talks to a database or an HTTP service directly. Concrete
//! deployments implement these traits for their own storage and routing
//! backends.

use std::collections::{HashMap, HashSet};

use crate::error::{DistanceError, StoreError};
use crate::matrix::DistanceMatrix;
use crate::model::{Coordinate, PlanStop, Point, StopLocation, StopRow, UnitFilter, UnitKey};

/// Provides a distance matrix (km) for a set of locations.
///
/// The matrix is indexed by the provided location order. Implementations may
/// fail; [`crate::distance::DistanceProvider`] turns failures into a fallback.
pub trait DistanceMatrixProvider: Send + Sync {
    /// Short label used in logs and run statistics.
    fn name(&self) -> &'static str;

    fn matrix_for(&self, locations: &[Coordinate]) -> Result<DistanceMatrix, DistanceError>;
}

/// Factory for per-worker store connections.
///
/// Connections are never shared between workers: each unit acquires one and
/// drops it when the unit ends, whatever the outcome.
pub trait RouteStore: Send + Sync {
    type Connection: StoreConnection;

    fn connect(&self) -> Result<Self::Connection, StoreError>;
}

/// Typed access to route plans, customers and prospects.
///
/// Source-schema details (column names, null conventions) stay behind this
/// interface.
pub trait StoreConnection {
    /// Distinct unit keys, in any order.
    fn unit_keys(&mut self, filter: &UnitFilter) -> Result<Vec<UnitKey>, StoreError>;

    /// Stops currently planned for a unit.
    fn plan_stops(&mut self, unit: &UnitKey) -> Result<Vec<PlanStop>, StoreError>;

    /// Coordinates and zone tags for known customers. Unknown ids are omitted.
    fn stop_locations(
        &mut self,
        ids: &[String],
    ) -> Result<HashMap<String, StopLocation>, StoreError>;

    /// Home location of a distributor, if recorded.
    fn depot_location(&mut self, distributor_id: &str) -> Result<Option<Coordinate>, StoreError>;

    /// Prospects tagged with one of `zones` that have a usable coordinate.
    ///
    /// Prospects already planned or written on a unit other than `unit` are
    /// never returned.
    fn prospects_in_zones(
        &mut self,
        unit: &UnitKey,
        zones: &[String],
    ) -> Result<Vec<Point>, StoreError>;

    /// Prospects with a usable coordinate within `radius_km` of `center`, with
    /// the same exclusions as [`StoreConnection::prospects_in_zones`].
    fn prospects_near(
        &mut self,
        unit: &UnitKey,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<Point>, StoreError>;

    /// Identifiers of prospects that were visited before.
    fn visited_prospects(&mut self) -> Result<HashSet<String>, StoreError>;

    /// Replaces a unit's stop list, all-or-nothing.
    ///
    /// Rows from an earlier write of the same unit that are not in `rows` are
    /// removed. Repeating the call with the same rows leaves the store
    /// unchanged.
    fn write_unit(&mut self, unit: &UnitKey, rows: &[StopRow]) -> Result<(), StoreError>;
}

/// Produces the sequence of search radii tried when zone matching does not
/// fill a route.
pub trait RadiusPolicy {
    /// Increasing radii in km, none above `max_km`.
    fn radii(&self, max_km: f64) -> Vec<f64>;
}
