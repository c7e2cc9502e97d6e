//! In-process [`RouteStore`] backed by a JSON dataset.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::distance::lock;
use crate::error::{StoreError, StoreErrorKind};
use crate::haversine::haversine_km;
use crate::model::{Coordinate, PlanStop, Point, StopLocation, StopRow, UnitFilter, UnitKey};
use crate::traits::{RouteStore, StoreConnection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRecord {
    pub distributor_id: String,
    pub agent_id: String,
    pub date: NaiveDate,
    pub stop_id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Customer or prospect master row. Coordinates are nullable as in the source
/// tables; zero or out-of-range values count as missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub id: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub zone: Option<String>,
}

impl SiteRecord {
    fn coordinate(&self) -> Option<Coordinate> {
        Coordinate::from_parts(self.latitude, self.longitude)
    }

    fn zone(&self) -> Option<String> {
        self.zone.as_deref().map(str::trim).filter(|z| !z.is_empty()).map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepotRecord {
    pub distributor_id: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub plan: Vec<PlanRecord>,
    pub customers: Vec<SiteRecord>,
    pub prospects: Vec<SiteRecord>,
    pub visited: Vec<String>,
    pub depots: Vec<DepotRecord>,
}

/// Call counters, for tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub connects: usize,
    pub prospect_queries: usize,
    pub writes: usize,
}

#[derive(Debug, Default)]
struct State {
    dataset: Dataset,
    written: BTreeMap<(UnitKey, String), StopRow>,
    write_faults: Vec<(Option<UnitKey>, StoreErrorKind)>,
    calls: StoreCalls,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                dataset,
                ..State::default()
            })),
        }
    }

    pub fn load_json(path: &Path) -> io::Result<Self> {
        let text = fs::read_to_string(path)?;
        let dataset: Dataset = serde_json::from_str(&text)?;
        info!(
            path = %path.display(),
            plan_rows = dataset.plan.len(),
            customers = dataset.customers.len(),
            prospects = dataset.prospects.len(),
            "dataset loaded"
        );
        Ok(Self::new(dataset))
    }

    /// Writes all persisted stop rows as a JSON array.
    pub fn export_json(&self, path: &Path) -> io::Result<()> {
        let rows = self.written_rows();
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &rows)?;
        info!(path = %path.display(), rows = rows.len(), "stop rows exported");
        Ok(())
    }

    /// Persisted rows ordered by unit, then position, then stop id.
    pub fn written_rows(&self) -> Vec<StopRow> {
        let mut rows: Vec<StopRow> = lock(&self.state).written.values().cloned().collect();
        rows.sort_by(|a, b| {
            a.unit
                .cmp(&b.unit)
                .then(a.position.cmp(&b.position))
                .then_with(|| a.stop_id.cmp(&b.stop_id))
        });
        rows
    }

    pub fn rows_for(&self, unit: &UnitKey) -> Vec<StopRow> {
        self.written_rows().into_iter().filter(|row| &row.unit == unit).collect()
    }

    /// Edits the source tables in place; written rows are kept.
    pub fn update_dataset(&self, edit: impl FnOnce(&mut Dataset)) {
        edit(&mut lock(&self.state).dataset);
    }

    pub fn calls(&self) -> StoreCalls {
        lock(&self.state).calls
    }

    /// Makes the next write fail with `kind`. `unit` restricts the fault to
    /// one unit.
    pub fn fail_next_write(&self, unit: Option<UnitKey>, kind: StoreErrorKind) {
        lock(&self.state).write_faults.push((unit, kind));
    }

    /// All prospects with a usable coordinate, optionally restricted to a zone.
    pub fn prospect_pool(&self, zone: Option<&str>) -> Vec<Point> {
        let state = lock(&self.state);
        state
            .dataset
            .prospects
            .iter()
            .filter(|record| zone.is_none_or(|z| record.zone().as_deref() == Some(z)))
            .filter_map(|record| {
                let coordinate = record.coordinate()?;
                Some(Point::prospect(record.id.clone(), Some(coordinate), record.zone()))
            })
            .collect()
    }

    pub fn depot(&self, distributor_id: &str) -> Option<Coordinate> {
        depot_of(&lock(&self.state).dataset, distributor_id)
    }
}

fn depot_of(dataset: &Dataset, distributor_id: &str) -> Option<Coordinate> {
    dataset
        .depots
        .iter()
        .find(|depot| depot.distributor_id == distributor_id)
        .and_then(|depot| Coordinate::from_parts(depot.latitude, depot.longitude))
}

impl RouteStore for MemoryStore {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection, StoreError> {
        lock(&self.state).calls.connects += 1;
        Ok(MemoryConnection {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MemoryConnection {
    state: Arc<Mutex<State>>,
}

impl MemoryConnection {
    /// Prospects matching `keep`, excluding any planned on a route or written
    /// to a unit other than `unit`.
    fn prospects_where(
        &mut self,
        unit: &UnitKey,
        keep: impl Fn(&SiteRecord, Coordinate) -> bool,
    ) -> Vec<Point> {
        let mut state = lock(&self.state);
        state.calls.prospect_queries += 1;
        let taken: HashSet<&str> = state
            .dataset
            .plan
            .iter()
            .map(|row| row.stop_id.as_str())
            .chain(
                state
                    .written
                    .values()
                    .filter(|row| &row.unit != unit)
                    .map(|row| row.stop_id.as_str()),
            )
            .collect();
        state
            .dataset
            .prospects
            .iter()
            .filter(|record| !taken.contains(record.id.as_str()))
            .filter_map(|record| {
                let coordinate = record.coordinate()?;
                keep(record, coordinate)
                    .then(|| Point::prospect(record.id.clone(), Some(coordinate), record.zone()))
            })
            .collect()
    }
}

impl StoreConnection for MemoryConnection {
    fn unit_keys(&mut self, filter: &UnitFilter) -> Result<Vec<UnitKey>, StoreError> {
        let state = lock(&self.state);
        let keys: HashSet<UnitKey> = state
            .dataset
            .plan
            .iter()
            .map(|row| UnitKey::new(row.distributor_id.clone(), row.agent_id.clone(), row.date))
            .filter(|key| filter.matches(key))
            .collect();
        Ok(keys.into_iter().collect())
    }

    fn plan_stops(&mut self, unit: &UnitKey) -> Result<Vec<PlanStop>, StoreError> {
        let state = lock(&self.state);
        Ok(state
            .dataset
            .plan
            .iter()
            .filter(|row| {
                row.distributor_id == unit.distributor_id
                    && row.agent_id == unit.agent_id
                    && row.date == unit.date
            })
            .map(|row| PlanStop {
                id: row.stop_id.clone(),
                name: row.name.clone(),
            })
            .collect())
    }

    fn stop_locations(
        &mut self,
        ids: &[String],
    ) -> Result<HashMap<String, StopLocation>, StoreError> {
        let state = lock(&self.state);
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(state
            .dataset
            .customers
            .iter()
            .filter(|record| wanted.contains(record.id.as_str()))
            .map(|record| {
                (
                    record.id.clone(),
                    StopLocation {
                        coordinate: record.coordinate(),
                        zone: record.zone(),
                    },
                )
            })
            .collect())
    }

    fn depot_location(&mut self, distributor_id: &str) -> Result<Option<Coordinate>, StoreError> {
        Ok(depot_of(&lock(&self.state).dataset, distributor_id))
    }

    fn prospects_in_zones(
        &mut self,
        unit: &UnitKey,
        zones: &[String],
    ) -> Result<Vec<Point>, StoreError> {
        let zones: HashSet<&str> = zones.iter().map(String::as_str).collect();
        Ok(self.prospects_where(unit, |record, _| {
            record.zone().is_some_and(|zone| zones.contains(zone.as_str()))
        }))
    }

    fn prospects_near(
        &mut self,
        unit: &UnitKey,
        center: Coordinate,
        radius_km: f64,
    ) -> Result<Vec<Point>, StoreError> {
        Ok(self.prospects_where(unit, |_, coordinate| {
            haversine_km(center, coordinate) <= radius_km
        }))
    }

    fn visited_prospects(&mut self) -> Result<HashSet<String>, StoreError> {
        Ok(lock(&self.state).dataset.visited.iter().cloned().collect())
    }

    fn write_unit(&mut self, unit: &UnitKey, rows: &[StopRow]) -> Result<(), StoreError> {
        let mut state = lock(&self.state);
        state.calls.writes += 1;

        let fault = state
            .write_faults
            .iter()
            .position(|(target, _)| target.as_ref().is_none_or(|target| target == unit));
        if let Some(index) = fault {
            let (_, kind) = state.write_faults.remove(index);
            return Err(StoreError::new(kind, format!("injected write failure for {unit}")));
        }

        if let Some(row) = rows.iter().find(|row| &row.unit != unit) {
            return Err(StoreError::fatal(format!(
                "row for {} passed to write of {unit}",
                row.unit
            )));
        }

        state.written.retain(|(owner, _), _| owner != unit);
        for row in rows {
            state.written.insert((unit.clone(), row.stop_id.clone()), row.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StopKind;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    fn site(id: &str, latitude: Option<f64>, longitude: Option<f64>) -> SiteRecord {
        SiteRecord {
            id: id.into(),
            latitude,
            longitude,
            zone: Some("Z1".into()),
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            plan: vec![PlanRecord {
                distributor_id: "D1".into(),
                agent_id: "A1".into(),
                date: date(),
                stop_id: "C1".into(),
                name: Some("Store One".into()),
            }],
            customers: vec![SiteRecord {
                id: "C1".into(),
                latitude: Some(0.0),
                longitude: Some(121.0),
                zone: Some(" Z1 ".into()),
            }],
            prospects: vec![
                site("P1", Some(14.6), Some(121.0)),
                site("P2", None, Some(121.0)),
                site("C1", Some(14.6), Some(121.0)),
            ],
            ..Dataset::default()
        }
    }

    #[test]
    fn zero_coordinates_count_as_missing() {
        let store = MemoryStore::new(dataset());
        let mut conn = store.connect().unwrap();
        let locations = conn.stop_locations(&["C1".to_string()]).unwrap();
        assert_eq!(locations["C1"].coordinate, None);
        assert_eq!(locations["C1"].zone.as_deref(), Some("Z1"));
    }

    #[test]
    fn zone_query_skips_unlocated_and_planned_prospects() {
        let store = MemoryStore::new(dataset());
        let mut conn = store.connect().unwrap();
        let unit = UnitKey::new("D1", "A1", date());
        let found = conn.prospects_in_zones(&unit, &["Z1".to_string()]).unwrap();
        assert_eq!(found.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(), vec!["P1"]);
        assert_eq!(store.calls().prospect_queries, 1);
    }

    #[test]
    fn prospects_written_to_another_unit_are_excluded() {
        let store = MemoryStore::new(dataset());
        let owner = UnitKey::new("D1", "A2", date());
        let row = StopRow {
            unit: owner.clone(),
            stop_id: "P1".into(),
            position: 1,
            kind: StopKind::Prospect,
            name: None,
        };
        let mut conn = store.connect().unwrap();
        conn.write_unit(&owner, &[row]).unwrap();

        let zones = ["Z1".to_string()];
        let other = UnitKey::new("D1", "A1", date());
        assert!(conn.prospects_in_zones(&other, &zones).unwrap().is_empty());
        assert_eq!(conn.prospects_in_zones(&owner, &zones).unwrap().len(), 1);
    }

    #[test]
    fn rewrite_replaces_the_unit_rows() {
        let store = MemoryStore::new(dataset());
        let unit = UnitKey::new("D1", "A1", date());
        let row = |id: &str, position| StopRow {
            unit: unit.clone(),
            stop_id: id.into(),
            position,
            kind: StopKind::Prospect,
            name: None,
        };
        let mut conn = store.connect().unwrap();
        conn.write_unit(&unit, &[row("P1", 1), row("P2", 2)]).unwrap();
        conn.write_unit(&unit, &[row("P3", 1)]).unwrap();

        assert_eq!(store.rows_for(&unit), vec![row("P3", 1)]);
    }

    #[test]
    fn repeated_writes_are_idempotent() {
        let store = MemoryStore::new(dataset());
        let unit = UnitKey::new("D1", "A1", date());
        let rows = vec![StopRow {
            unit: unit.clone(),
            stop_id: "C1".into(),
            position: 100,
            kind: StopKind::Customer,
            name: None,
        }];
        let mut conn = store.connect().unwrap();
        conn.write_unit(&unit, &rows).unwrap();
        conn.write_unit(&unit, &rows).unwrap();
        assert_eq!(store.rows_for(&unit), rows);
    }

    #[test]
    fn injected_fault_fails_once() {
        let store = MemoryStore::new(dataset());
        let unit = UnitKey::new("D1", "A1", date());
        store.fail_next_write(None, StoreErrorKind::Fatal);
        let mut conn = store.connect().unwrap();
        assert_eq!(conn.write_unit(&unit, &[]).unwrap_err().kind(), StoreErrorKind::Fatal);
        assert!(conn.write_unit(&unit, &[]).is_ok());
    }
}
