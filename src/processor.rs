//! Per-unit pipeline: LOADED → ENRICHED → SIZED → SEQUENCED → PERSISTED.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::config::PlannerConfig;
use crate::distance::{DistanceProvider, MatrixSource, lock};
use crate::error::{StoreError, UnitError, UnitStage};
use crate::model::{Coordinate, Point, StopKind, StopRow, TourAssignment, UnitKey};
use crate::prospect::{AdmissionRegistry, ProspectSelector, SelectionPolicy};
use crate::tour::{TourOptions, TourStart, build_tour, tour_locations};
use crate::traits::{RouteStore, StoreConnection};

/// How a unit's route was filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitScenario {
    /// Prospects admitted next to customers that have coordinates.
    LocatedProspects,
    /// Prospects admitted through the zone tag alone; no customer had a
    /// usable coordinate.
    ZoneProspects,
    /// No prospect admitted.
    CustomersOnly,
}

impl UnitScenario {
    pub fn classify(located_customers: usize, admitted: usize) -> Self {
        match (admitted, located_customers) {
            (0, _) => UnitScenario::CustomersOnly,
            (_, 0) => UnitScenario::ZoneProspects,
            _ => UnitScenario::LocatedProspects,
        }
    }
}

/// What happened to a unit that reached `PERSISTED`.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: UnitKey,
    pub scenario: UnitScenario,
    pub existing: usize,
    pub deficit: usize,
    pub admitted: usize,
    pub located: usize,
    pub unlocated: usize,
    pub length_km: f64,
    pub matrix_source: MatrixSource,
    /// False in dry-run mode.
    pub written: bool,
    #[serde(skip)]
    pub rows: Vec<StopRow>,
}

/// Releases admitted prospects unless the unit commits.
struct Claims<'a> {
    registry: &'a AdmissionRegistry,
    ids: Vec<String>,
}

impl Claims<'_> {
    fn commit(mut self) {
        self.ids.clear();
    }
}

impl Drop for Claims<'_> {
    fn drop(&mut self) {
        if !self.ids.is_empty() {
            debug!(released = self.ids.len(), "releasing prospect claims");
            self.registry.release(self.ids.iter().map(String::as_str));
        }
    }
}

/// Runs one unit at a time; shared by all workers of a run.
pub struct UnitProcessor<S: RouteStore> {
    store: S,
    distances: Arc<DistanceProvider>,
    registry: Arc<AdmissionRegistry>,
    visited: Arc<HashSet<String>>,
    target_route_size: usize,
    enrich_below: usize,
    start: Option<Coordinate>,
    use_depot_location: bool,
    persist_retries: u32,
    retry_backoff: Duration,
    dry_run: bool,
    tour: TourOptions,
    selection: SelectionPolicy,
    depots: Mutex<HashMap<String, Option<Coordinate>>>,
}

impl<S: RouteStore> UnitProcessor<S> {
    pub fn new(
        store: S,
        config: &PlannerConfig,
        distances: Arc<DistanceProvider>,
        registry: Arc<AdmissionRegistry>,
        visited: Arc<HashSet<String>>,
    ) -> Self {
        Self {
            store,
            distances,
            registry,
            visited,
            target_route_size: config.target_route_size,
            enrich_below: config.enrich_below,
            start: config.start,
            use_depot_location: config.use_depot_location,
            persist_retries: config.persist_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            dry_run: config.dry_run,
            tour: config.tour_options(),
            selection: config.selection_policy(),
            depots: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &AdmissionRegistry {
        &self.registry
    }

    /// Takes a unit to `PERSISTED`, or to `FAILED` with the stage it was
    /// entering. The store connection lives only for this call.
    pub fn process(&self, unit: &UnitKey) -> Result<UnitReport, UnitError> {
        let span = info_span!(
            "unit",
            distributor = %unit.distributor_id,
            agent = %unit.agent_id,
            date = %unit.date
        );
        let _enter = span.enter();

        let result = self.run(unit);
        match &result {
            Ok(report) => info!(
                scenario = ?report.scenario,
                stops = report.rows.len(),
                admitted = report.admitted,
                unlocated = report.unlocated,
                source = ?report.matrix_source,
                "unit persisted"
            ),
            Err(err) => error!(stage = %err.stage, error = %err.cause, "unit failed"),
        }
        result
    }

    fn run(&self, unit: &UnitKey) -> Result<UnitReport, UnitError> {
        let fail =
            |stage: UnitStage| move |cause: StoreError| UnitError::new(unit.clone(), stage, cause);

        // LOADED
        let mut conn = self
            .with_retry("connect", || self.store.connect())
            .map_err(fail(UnitStage::Loaded))?;
        let plan = self
            .with_retry("plan_stops", || conn.plan_stops(unit))
            .map_err(fail(UnitStage::Loaded))?;
        debug!(stops = plan.len(), "plan loaded");

        // ENRICHED
        let ids: Vec<String> = plan.iter().map(|stop| stop.id.clone()).collect();
        let mut locations = self
            .with_retry("stop_locations", || conn.stop_locations(&ids))
            .map_err(fail(UnitStage::Enriched))?;
        let names: HashMap<&str, Option<String>> =
            plan.iter().map(|stop| (stop.id.as_str(), stop.name.clone())).collect();
        let existing: Vec<Point> = plan
            .iter()
            .map(|stop| {
                let location = locations.remove(&stop.id).unwrap_or_default();
                Point::customer(stop.id.clone(), location.coordinate, location.zone)
            })
            .collect();
        let located_customers = existing.iter().filter(|p| p.is_located()).count();
        debug!(located = located_customers, total = existing.len(), "stops enriched");

        // SIZED
        let deficit = if existing.len() < self.enrich_below {
            self.target_route_size.saturating_sub(existing.len())
        } else {
            0
        };
        let admitted = if deficit > 0 {
            let selector = ProspectSelector::new(&self.selection, &self.distances, &self.registry);
            self.with_retry("select_prospects", || {
                selector.select(&mut conn, unit, &existing, &self.visited, deficit)
            })
            .map_err(fail(UnitStage::Sized))?
        } else {
            Vec::new()
        };
        let claims = Claims {
            registry: &self.registry,
            ids: admitted.iter().map(|point| point.id.clone()).collect(),
        };
        debug!(existing = existing.len(), deficit, admitted = admitted.len(), "unit sized");

        // SEQUENCED
        let depot = self.origin(&mut conn, unit).map_err(fail(UnitStage::Sequenced))?;
        let admitted_count = admitted.len();
        let points: Vec<Point> = existing.into_iter().chain(admitted).collect();
        let matrix = self.distances.get_matrix(&tour_locations(&points, depot));
        let start = depot.map(|_| TourStart::Depot);
        let tour = build_tour(&points, &matrix.matrix, start, &self.tour)
            .map_err(|violation| UnitError::new(unit.clone(), UnitStage::Sequenced, violation))?;

        // PERSISTED
        let rows = stop_rows(unit, &tour, &names);
        if self.dry_run {
            debug!(rows = rows.len(), "dry run, skipping write");
        } else {
            self.with_retry("write_unit", || conn.write_unit(unit, &rows))
                .map_err(fail(UnitStage::Persisted))?;
        }
        claims.commit();

        let located = tour.located().count();
        Ok(UnitReport {
            unit: unit.clone(),
            scenario: UnitScenario::classify(located_customers, admitted_count),
            existing: plan.len(),
            deficit,
            admitted: admitted_count,
            located,
            unlocated: tour.len() - located,
            length_km: tour.length_km,
            matrix_source: matrix.source,
            written: !self.dry_run,
            rows,
        })
    }

    /// Fixed start, then the distributor depot, then nothing.
    fn origin(
        &self,
        conn: &mut S::Connection,
        unit: &UnitKey,
    ) -> Result<Option<Coordinate>, StoreError> {
        if self.start.is_some() || !self.use_depot_location {
            return Ok(self.start);
        }

        if let Some(cached) = lock(&self.depots).get(&unit.distributor_id) {
            return Ok(*cached);
        }

        let depot = self
            .with_retry("depot_location", || conn.depot_location(&unit.distributor_id))?
            .filter(Coordinate::is_usable);
        lock(&self.depots).insert(unit.distributor_id.clone(), depot);
        Ok(depot)
    }

    /// Retries transient and conflict errors with exponential backoff.
    fn with_retry<T>(
        &self,
        op: &str,
        mut f: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.persist_retries => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt);
                    warn!(
                        op,
                        attempt = attempt + 1,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retrying store call"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn stop_rows(
    unit: &UnitKey,
    tour: &TourAssignment,
    names: &HashMap<&str, Option<String>>,
) -> Vec<StopRow> {
    tour.entries
        .iter()
        .map(|entry| StopRow {
            unit: unit.clone(),
            stop_id: entry.point.id.clone(),
            position: entry.position,
            kind: entry.point.kind,
            name: match entry.point.kind {
                StopKind::Customer => names.get(entry.point.id.as_str()).cloned().flatten(),
                StopKind::Prospect => None,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_follows_admission_and_customer_locations() {
        assert_eq!(UnitScenario::classify(5, 10), UnitScenario::LocatedProspects);
        assert_eq!(UnitScenario::classify(0, 10), UnitScenario::ZoneProspects);
        assert_eq!(UnitScenario::classify(5, 0), UnitScenario::CustomersOnly);
        assert_eq!(UnitScenario::classify(0, 0), UnitScenario::CustomersOnly);
    }
}
