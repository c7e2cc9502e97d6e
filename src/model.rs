//! Domain records flowing through the planner.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Builds a coordinate from nullable source columns.
    ///
    /// Returns `None` unless both values are present and usable: finite, in
    /// range, and not exactly zero (the source systems write 0 for "unknown").
    pub fn from_parts(lat: Option<f64>, lon: Option<f64>) -> Option<Self> {
        let coordinate = Self::new(lat?, lon?);
        coordinate.is_usable().then_some(coordinate)
    }

    pub fn is_usable(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && self.lat != 0.0
            && self.lon != 0.0
    }

    /// Arithmetic mean of a set of coordinates.
    pub fn centroid<'a>(coordinates: impl IntoIterator<Item = &'a Coordinate>) -> Option<Self> {
        let (mut lat, mut lon, mut count) = (0.0, 0.0, 0usize);
        for coordinate in coordinates {
            lat += coordinate.lat;
            lon += coordinate.lon;
            count += 1;
        }
        (count > 0).then(|| Self::new(lat / count as f64, lon / count as f64))
    }
}

/// Whether a stop was already on the route or admitted by this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopKind {
    Customer,
    Prospect,
}

/// A stop candidate: identifier, optional coordinate, optional zone tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub coordinate: Option<Coordinate>,
    pub zone: Option<String>,
    pub kind: StopKind,
}

impl Point {
    pub fn customer(
        id: impl Into<String>,
        coordinate: Option<Coordinate>,
        zone: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            coordinate,
            zone,
            kind: StopKind::Customer,
        }
    }

    pub fn prospect(
        id: impl Into<String>,
        coordinate: Option<Coordinate>,
        zone: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            coordinate,
            zone,
            kind: StopKind::Prospect,
        }
    }

    pub fn is_located(&self) -> bool {
        self.coordinate.is_some()
    }
}

/// One batch of route-planning work: (distributor, agent, date).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub distributor_id: String,
    pub agent_id: String,
    pub date: NaiveDate,
}

impl UnitKey {
    pub fn new(
        distributor_id: impl Into<String>,
        agent_id: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            distributor_id: distributor_id.into(),
            agent_id: agent_id.into(),
            date,
        }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.distributor_id, self.agent_id, self.date)
    }
}

/// Optional restriction of a run to part of the hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFilter {
    #[serde(default)]
    pub distributor: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

impl UnitFilter {
    pub fn matches(&self, key: &UnitKey) -> bool {
        self.distributor.as_ref().is_none_or(|d| *d == key.distributor_id)
            && self.agent.as_ref().is_none_or(|a| *a == key.agent_id)
            && self.date.is_none_or(|date| date == key.date)
    }
}

/// A stop as listed in the route plan, before enrichment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStop {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Location attributes of a known customer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StopLocation {
    pub coordinate: Option<Coordinate>,
    pub zone: Option<String>,
}

/// Final persisted row, keyed by (unit, stop id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRow {
    pub unit: UnitKey,
    pub stop_id: String,
    pub position: u32,
    pub kind: StopKind,
    #[serde(default)]
    pub name: Option<String>,
}

/// A point together with its assigned sequence position.
#[derive(Debug, Clone, PartialEq)]
pub struct TourEntry {
    pub point: Point,
    pub position: u32,
}

/// Visiting order for a point set.
///
/// Located points occupy positions `1..=K` in visiting order; unlocated points
/// all carry `sentinel` and follow them.
#[derive(Debug, Clone, PartialEq)]
pub struct TourAssignment {
    pub entries: Vec<TourEntry>,
    pub sentinel: u32,
    /// Travel cost of the ordered part, including the leg from a depot start.
    pub length_km: f64,
}

impl TourAssignment {
    pub fn located(&self) -> impl Iterator<Item = &TourEntry> {
        self.entries.iter().filter(|entry| entry.point.is_located())
    }

    pub fn unlocated(&self) -> impl Iterator<Item = &TourEntry> {
        self.entries.iter().filter(|entry| !entry.point.is_located())
    }

    /// Identifiers of located points in visiting order.
    pub fn order(&self) -> Vec<&str> {
        self.located().map(|entry| entry.point.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A size-bounded spatial group of prospects within one zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub id: usize,
    pub zone: Option<String>,
    pub points: Vec<Point>,
    pub centroid: Coordinate,
    /// Set when the cluster stayed below the minimum size for lack of a merge target.
    pub undersized: bool,
}

impl Cluster {
    /// Builds a cluster from located points. Returns `None` for an empty set.
    pub fn new(id: usize, zone: Option<String>, points: Vec<Point>) -> Option<Self> {
        let centroid =
            Coordinate::centroid(points.iter().filter_map(|point| point.coordinate.as_ref()))?;
        Some(Self {
            id,
            zone,
            points,
            centroid,
            undersized: false,
        })
    }

    pub fn size(&self) -> usize {
        self.points.len()
    }

    pub(crate) fn absorb(&mut self, other: Cluster) {
        self.points.extend(other.points);
        let located = self.points.iter().filter_map(|point| point.coordinate.as_ref());
        if let Some(centroid) = Coordinate::centroid(located) {
            self.centroid = centroid;
        }
    }
}
