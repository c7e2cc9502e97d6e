//! Test fixtures for route-filler.
//!
//! Provides:
//! - Reference coordinates around Makati / BGC (Metro Manila)
//! - Grid generators for dense prospect pools
//! - A dataset builder that produces a ready `MemoryStore`

#![allow(dead_code)]

use std::net::TcpListener;
use std::thread;

use chrono::NaiveDate;

use route_filler::memory_store::{Dataset, DepotRecord, MemoryStore, PlanRecord, SiteRecord};
use route_filler::model::{Coordinate, Point, UnitKey};
use route_filler::osrm::{OsrmClient, OsrmConfig};

// ============================================================================
// Reference locations
// ============================================================================

/// Ayala Avenue, Makati.
pub const MAKATI: (f64, f64) = (14.5547, 121.0244);

/// Bonifacio High Street, Taguig. About 3 km from `MAKATI`.
pub const BGC: (f64, f64) = (14.5509, 121.0509);

/// Roughly 110 m in latitude.
pub const STEP_DEG: f64 = 0.001;

pub fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
}

pub fn unit(distributor: &str, agent: &str) -> UnitKey {
    UnitKey::new(distributor, agent, date())
}

/// `count` coordinates on a 10-column grid starting at `origin`.
pub fn grid(origin: (f64, f64), count: usize) -> Vec<(f64, f64)> {
    (0..count)
        .map(|i| {
            let (row, col) = ((i / 10) as f64, (i % 10) as f64);
            (origin.0 + row * STEP_DEG, origin.1 + col * STEP_DEG)
        })
        .collect()
}

pub fn prospects_on_grid(prefix: &str, origin: (f64, f64), count: usize, zone: &str) -> Vec<Point> {
    grid(origin, count)
        .into_iter()
        .enumerate()
        .map(|(i, (lat, lon))| {
            let coordinate = Some(Coordinate::new(lat, lon));
            Point::prospect(format!("{prefix}{i:03}"), coordinate, Some(zone.to_string()))
        })
        .collect()
}

pub fn customer_at(id: &str, lat: f64, lon: f64) -> Point {
    Point::customer(id, Some(Coordinate::new(lat, lon)), None)
}

pub fn unlocated(id: &str) -> Point {
    Point::customer(id, None, None)
}

// ============================================================================
// Routing endpoints
// ============================================================================

/// Accepts connections and never answers them.
pub fn silent_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });
    format!("http://{addr}")
}

/// OSRM client with a one second timeout.
pub fn osrm_at(base_url: String) -> Box<OsrmClient> {
    let config = OsrmConfig {
        base_url,
        timeout_secs: 1,
        ..OsrmConfig::default()
    };
    Box::new(OsrmClient::new(config).unwrap())
}

// ============================================================================
// Dataset builder
// ============================================================================

#[derive(Default)]
pub struct DatasetBuilder {
    dataset: Dataset,
}

impl DatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a customer master row.
    pub fn customer(mut self, id: &str, location: Option<(f64, f64)>, zone: Option<&str>) -> Self {
        self.dataset.customers.push(SiteRecord {
            id: id.to_string(),
            latitude: location.map(|l| l.0),
            longitude: location.map(|l| l.1),
            zone: zone.map(str::to_string),
        });
        self
    }

    /// Located customers on a grid, all planned on `unit`.
    pub fn route_on_grid(
        mut self,
        unit: &UnitKey,
        prefix: &str,
        origin: (f64, f64),
        count: usize,
        zone: &str,
    ) -> Self {
        for (i, location) in grid(origin, count).into_iter().enumerate() {
            let id = format!("{prefix}{i:03}");
            self = self.customer(&id, Some(location), Some(zone)).plan(unit, &[id.as_str()]);
        }
        self
    }

    pub fn plan(mut self, unit: &UnitKey, stop_ids: &[&str]) -> Self {
        for id in stop_ids {
            self.dataset.plan.push(PlanRecord {
                distributor_id: unit.distributor_id.clone(),
                agent_id: unit.agent_id.clone(),
                date: unit.date,
                stop_id: id.to_string(),
                name: Some(format!("Store {id}")),
            });
        }
        self
    }

    pub fn prospect(mut self, id: &str, location: (f64, f64), zone: &str) -> Self {
        self.dataset.prospects.push(SiteRecord {
            id: id.to_string(),
            latitude: Some(location.0),
            longitude: Some(location.1),
            zone: Some(zone.to_string()),
        });
        self
    }

    pub fn prospect_grid(
        mut self,
        prefix: &str,
        origin: (f64, f64),
        count: usize,
        zone: &str,
    ) -> Self {
        for (i, location) in grid(origin, count).into_iter().enumerate() {
            self = self.prospect(&format!("{prefix}{i:03}"), location, zone);
        }
        self
    }

    pub fn visited(mut self, id: &str) -> Self {
        self.dataset.visited.push(id.to_string());
        self
    }

    pub fn depot(mut self, distributor: &str, location: (f64, f64)) -> Self {
        self.dataset.depots.push(DepotRecord {
            distributor_id: distributor.to_string(),
            latitude: Some(location.0),
            longitude: Some(location.1),
        });
        self
    }

    pub fn build(self) -> Dataset {
        self.dataset
    }

    pub fn store(self) -> MemoryStore {
        MemoryStore::new(self.dataset)
    }
}
