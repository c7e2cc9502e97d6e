//! OpenRouteService matrix adapter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DistanceError;
use crate::matrix::DistanceMatrix;
use crate::model::Coordinate;
use crate::traits::DistanceMatrixProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrsConfig {
    /// Full matrix endpoint, e.g. `http://localhost:8080/ors/v2/matrix/driving-car`.
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OrsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/ors/v2/matrix/driving-car".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrsClient {
    config: OrsConfig,
    client: reqwest::blocking::Client,
}

impl OrsClient {
    pub fn new(config: OrsConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }
}

#[derive(Debug, Serialize)]
struct OrsMatrixRequest<'a> {
    /// `[lon, lat]` pairs.
    locations: Vec<[f64; 2]>,
    metrics: [&'a str; 1],
    units: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrsMatrixResponse {
    distances: Option<Vec<Vec<Option<f64>>>>,
}

impl DistanceMatrixProvider for OrsClient {
    fn name(&self) -> &'static str {
        "ors"
    }

    fn matrix_for(&self, locations: &[Coordinate]) -> Result<DistanceMatrix, DistanceError> {
        if locations.is_empty() {
            return Ok(DistanceMatrix::zeros(0));
        }

        let request = OrsMatrixRequest {
            locations: locations.iter().map(|c| [c.lon, c.lat]).collect(),
            metrics: ["distance"],
            units: "km",
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.header(reqwest::header::AUTHORIZATION, key);
        }

        let body = builder.send()?.error_for_status()?.json::<OrsMatrixResponse>()?;
        let rows = body
            .distances
            .ok_or_else(|| DistanceError::EmptyResponse("missing `distances`".to_string()))?;

        // Values are already km; reuse the meter converter on scaled rows.
        let scaled = rows
            .into_iter()
            .map(|row| row.into_iter().map(|value| value.map(|km| km * 1000.0)).collect())
            .collect();
        crate::osrm::meters_to_matrix(scaled, locations.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_lon_lat_pairs() {
        let request = OrsMatrixRequest {
            locations: vec![[121.0, 14.5]],
            metrics: ["distance"],
            units: "km",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "locations": [[121.0, 14.5]],
                "metrics": ["distance"],
                "units": "km"
            })
        );
    }
}
