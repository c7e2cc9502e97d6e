//! OSRM HTTP adapter for distance matrices.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DistanceError;
use crate::matrix::DistanceMatrix;
use crate::model::Coordinate;
use crate::traits::DistanceMatrixProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn table_url(&self, locations: &[Coordinate]) -> String {
        let coords = locations
            .iter()
            .map(|c| format!("{:.6},{:.6}", c.lon, c.lat))
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/table/v1/{}/{}?annotations=distance",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            coords
        )
    }
}

impl DistanceMatrixProvider for OsrmClient {
    fn name(&self) -> &'static str {
        "osrm"
    }

    fn matrix_for(&self, locations: &[Coordinate]) -> Result<DistanceMatrix, DistanceError> {
        if locations.is_empty() {
            return Ok(DistanceMatrix::zeros(0));
        }

        let body = self
            .client
            .get(self.table_url(locations))
            .send()?
            .error_for_status()?
            .json::<OsrmTableResponse>()?;

        if body.code != "Ok" {
            return Err(DistanceError::EmptyResponse(body.message.unwrap_or(body.code)));
        }

        let rows = body
            .distances
            .ok_or_else(|| DistanceError::EmptyResponse("missing `distances`".to_string()))?;

        meters_to_matrix(rows, locations.len())
    }
}

/// Converts a meter-valued table (nulls for unroutable pairs) to a symmetric km matrix.
pub(crate) fn meters_to_matrix(
    rows: Vec<Vec<Option<f64>>>,
    expected: usize,
) -> Result<DistanceMatrix, DistanceError> {
    if rows.len() != expected || rows.iter().any(|row| row.len() != expected) {
        return Err(DistanceError::Dimension {
            expected,
            got: rows.len(),
        });
    }

    let mut data = Vec::with_capacity(expected * expected);
    for (row_idx, row) in rows.into_iter().enumerate() {
        for (col_idx, value) in row.into_iter().enumerate() {
            match value {
                Some(meters) if meters.is_finite() && meters >= 0.0 => data.push(meters / 1000.0),
                _ if row_idx == col_idx => data.push(0.0),
                _ => {
                    return Err(DistanceError::InvalidValue {
                        row: row_idx,
                        col: col_idx,
                    });
                }
            }
        }
    }

    DistanceMatrix::from_data(expected, data)
        .map(DistanceMatrix::symmetrized)
        .map_err(|_| DistanceError::Dimension { expected, got: expected })
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    message: Option<String>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_url_uses_lon_lat_order() {
        let client = OsrmClient::new(OsrmConfig::default()).unwrap();
        let url = client.table_url(&[Coordinate::new(14.5, 121.0), Coordinate::new(14.6, 121.1)]);
        assert_eq!(
            url,
            "http://localhost:5000/table/v1/car/\
             121.000000,14.500000;121.100000,14.600000?annotations=distance"
        );
    }

    #[test]
    fn meters_are_converted_and_symmetrized() {
        let rows = vec![vec![Some(0.0), Some(1000.0)], vec![Some(3000.0), Some(0.0)]];
        let matrix = meters_to_matrix(rows, 2).unwrap();
        assert_eq!(matrix.get(0, 1), 2.0);
        assert_eq!(matrix.get(1, 0), 2.0);
    }

    #[test]
    fn unroutable_pairs_are_rejected() {
        let rows = vec![vec![Some(0.0), None], vec![Some(10.0), Some(0.0)]];
        assert!(matches!(
            meters_to_matrix(rows, 2),
            Err(DistanceError::InvalidValue { row: 0, col: 1 })
        ));
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let rows = vec![vec![Some(0.0)]];
        assert!(matches!(
            meters_to_matrix(rows, 2),
            Err(DistanceError::Dimension { expected: 2, got: 1 })
        ));
    }
}
