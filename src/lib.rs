//! route-filler core
//!
//! Tops up under-sized daily sales routes with nearby prospects and
//! re-sequences every route into a short visiting order.

pub mod traits;
pub mod model;
pub mod matrix;
pub mod haversine;
pub mod osrm;
pub mod ors;
pub mod distance;
pub mod tour;
pub mod dbscan;
pub mod cluster;
pub mod prospect;
pub mod processor;
pub mod orchestrator;
pub mod memory_store;
pub mod config;
pub mod error;

pub use cluster::{ClusterOptions, Clusterer};
pub use config::PlannerConfig;
pub use distance::{DistanceProvider, MatrixSource};
pub use error::{ContractViolation, StoreError, UnitError};
pub use model::{Cluster, Coordinate, Point, StopKind, StopRow, TourAssignment, UnitKey};
pub use orchestrator::{Orchestrator, RunSummary};
pub use processor::{UnitProcessor, UnitReport, UnitScenario};
pub use prospect::{AdmissionRegistry, plan_prospect_routes};
pub use tour::{TourOptions, TourStart, build_tour};
