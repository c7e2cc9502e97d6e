//! Planner configuration: JSON file, `.env`/environment overlay, validation.

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::ClusterOptions;
use crate::distance::DistanceProvider;
use crate::error::ConfigError;
use crate::model::{Coordinate, UnitFilter};
use crate::ors::{OrsClient, OrsConfig};
use crate::osrm::{OsrmClient, OsrmConfig};
use crate::prospect::{SearchRadius, SelectionPolicy};
use crate::tour::{DEFAULT_SENTINEL, TourOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Haversine,
    Osrm,
    Ors,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "haversine" => Ok(ProviderKind::Haversine),
            "osrm" => Ok(ProviderKind::Osrm),
            "ors" | "openrouteservice" => Ok(ProviderKind::Ors),
            other => Err(format!("unknown distance provider `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistanceConfig {
    pub provider: ProviderKind,
    /// OSRM base url or ORS matrix endpoint. Adapter defaults apply when unset.
    pub base_url: Option<String>,
    pub profile: String,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
    pub cache: bool,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Haversine,
            base_url: None,
            profile: "car".to_string(),
            timeout_secs: 10,
            api_key: None,
            cache: true,
        }
    }
}

impl DistanceConfig {
    pub fn build_provider(&self) -> Result<DistanceProvider, ConfigError> {
        let provider = match self.provider {
            ProviderKind::Haversine => DistanceProvider::haversine_only(),
            ProviderKind::Osrm => {
                let mut config = OsrmConfig {
                    profile: self.profile.clone(),
                    timeout_secs: self.timeout_secs,
                    ..OsrmConfig::default()
                };
                if let Some(url) = &self.base_url {
                    config.base_url = url.clone();
                }
                let client =
                    OsrmClient::new(config).map_err(|e| ConfigError::Invalid(e.to_string()))?;
                DistanceProvider::with_primary(Box::new(client))
            }
            ProviderKind::Ors => {
                let mut config = OrsConfig {
                    api_key: self.api_key.clone(),
                    timeout_secs: self.timeout_secs,
                    ..OrsConfig::default()
                };
                if let Some(url) = &self.base_url {
                    config.endpoint = url.clone();
                }
                let client =
                    OrsClient::new(config).map_err(|e| ConfigError::Invalid(e.to_string()))?;
                DistanceProvider::with_primary(Box::new(client))
            }
        };
        Ok(provider.with_cache(self.cache))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Desired stop count per route.
    pub target_route_size: usize,
    /// Enrichment runs only for routes with fewer stops than this.
    pub enrich_below: usize,
    pub max_search_radius_km: f64,
    pub radius_policy: SearchRadius,
    pub zone_matching: bool,
    pub exclude_visited: bool,
    pub cluster: ClusterOptions,
    pub workers: usize,
    /// Fixed tour origin. Takes priority over the distributor depot.
    pub start: Option<Coordinate>,
    pub use_depot_location: bool,
    pub no_coordinate_position: u32,
    pub tour: TourOptions,
    pub distance: DistanceConfig,
    pub persist_retries: u32,
    pub retry_backoff_ms: u64,
    pub filter: UnitFilter,
    pub dry_run: bool,
    pub progress_interval: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            target_route_size: 60,
            enrich_below: 60,
            max_search_radius_km: 5.0,
            radius_policy: SearchRadius::default(),
            zone_matching: true,
            exclude_visited: true,
            cluster: ClusterOptions::default(),
            workers: 4,
            start: None,
            use_depot_location: true,
            no_coordinate_position: DEFAULT_SENTINEL,
            tour: TourOptions::default(),
            distance: DistanceConfig::default(),
            persist_retries: 3,
            retry_backoff_ms: 200,
            filter: UnitFilter::default(),
            dry_run: false,
            progress_interval: 10,
        }
    }
}

impl PlannerConfig {
    /// Defaults, then the optional JSON file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Ok(dotenv) = dotenvy::dotenv() {
            debug!(path = %dotenv.display(), "loaded .env");
        }

        let mut config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Applies `ROUTE_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("ROUTE_TARGET_SIZE") {
            self.target_route_size = parse_value("ROUTE_TARGET_SIZE", &v)?;
        }
        if let Some(v) = get("ROUTE_ENRICH_BELOW") {
            self.enrich_below = parse_value("ROUTE_ENRICH_BELOW", &v)?;
        }
        if let Some(v) = get("ROUTE_MAX_RADIUS_KM") {
            self.max_search_radius_km = parse_value("ROUTE_MAX_RADIUS_KM", &v)?;
        }
        if let Some(v) = get("ROUTE_WORKERS") {
            self.workers = parse_value("ROUTE_WORKERS", &v)?;
        }
        match (get("ROUTE_START_LAT"), get("ROUTE_START_LON")) {
            (Some(lat), Some(lon)) => {
                self.start = Some(Coordinate::new(
                    parse_value("ROUTE_START_LAT", &lat)?,
                    parse_value("ROUTE_START_LON", &lon)?,
                ));
            }
            (None, None) => {}
            (Some(value), None) | (None, Some(value)) => {
                return Err(ConfigError::Env {
                    key: "ROUTE_START_LAT/ROUTE_START_LON".to_string(),
                    value,
                });
            }
        }
        if let Some(v) = get("ROUTE_DISTANCE_PROVIDER") {
            self.distance.provider = parse_value("ROUTE_DISTANCE_PROVIDER", &v)?;
        }
        if let Some(v) = get("ROUTE_DISTANCE_URL") {
            self.distance.base_url = Some(v);
        }
        if let Some(v) = get("ROUTE_DISTANCE_TIMEOUT_SECS") {
            self.distance.timeout_secs = parse_value("ROUTE_DISTANCE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("ROUTE_DISTANCE_API_KEY") {
            self.distance.api_key = Some(v);
        }
        if let Some(v) = get("ROUTE_DRY_RUN") {
            self.dry_run = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(ConfigError::Env { key: "ROUTE_DRY_RUN".to_string(), value: v }),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.target_route_size == 0 {
            return invalid("target_route_size must be positive".to_string());
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1".to_string());
        }
        if !(self.max_search_radius_km > 0.0) {
            return invalid(format!(
                "max_search_radius_km must be positive, got {}",
                self.max_search_radius_km
            ));
        }
        if self.cluster.max_size == 0 {
            return invalid("cluster.max_size must be positive".to_string());
        }
        if self.cluster.min_size > self.cluster.max_size {
            return invalid(format!(
                "cluster.min_size {} exceeds cluster.max_size {}",
                self.cluster.min_size, self.cluster.max_size
            ));
        }
        if self.no_coordinate_position as usize <= self.target_route_size {
            return invalid(format!(
                "no_coordinate_position {} must be above target_route_size {}",
                self.no_coordinate_position, self.target_route_size
            ));
        }
        if let Some(start) = self.start {
            if !start.is_usable() {
                return invalid(format!(
                    "start ({}, {}) is not a usable coordinate",
                    start.lat, start.lon
                ));
            }
        }
        Ok(())
    }

    /// Tour options with the configured sentinel applied.
    pub fn tour_options(&self) -> TourOptions {
        TourOptions {
            sentinel: self.no_coordinate_position,
            ..self.tour.clone()
        }
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            zone_matching: self.zone_matching,
            max_search_radius_km: self.max_search_radius_km,
            radius: self.radius_policy.clone(),
            cluster: self.cluster.clone(),
        }
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::Env {
        key: key.to_string(),
        value: value.to_string(),
    })
}
