//! Square distance matrix in kilometers.

use crate::error::ContractViolation;

/// A dense n×n matrix of travel costs (km), row-major, indexed by the
/// ordinal positions of the point sequence it was built for.
///
/// Immutable once built; shared across workers behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    data: Vec<f64>,
    size: usize,
}

impl DistanceMatrix {
    /// An all-zero matrix of the given size.
    pub fn zeros(size: usize) -> Self {
        Self {
            data: vec![0.0; size * size],
            size,
        }
    }

    /// Builds a matrix from a flat row-major buffer.
    ///
    /// The diagonal is forced to zero; every other entry must be finite and
    /// non-negative.
    pub fn from_data(size: usize, mut data: Vec<f64>) -> Result<Self, ContractViolation> {
        if data.len() != size * size {
            return Err(ContractViolation::MatrixShape { size, len: data.len() });
        }
        for row in 0..size {
            data[row * size + row] = 0.0;
        }
        if let Some(index) = data.iter().position(|value| !value.is_finite() || *value < 0.0) {
            return Err(ContractViolation::MatrixValue {
                row: index / size,
                col: index % size,
            });
        }
        Ok(Self { data, size })
    }

    /// Builds a matrix from nested rows.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, ContractViolation> {
        let size = rows.len();
        if let Some(row) = rows.iter().find(|row| row.len() != size) {
            return Err(ContractViolation::MatrixShape {
                size,
                len: row.len() * size,
            });
        }
        Self::from_data(size, rows.into_iter().flatten().collect())
    }

    /// Averages `m[i][j]` and `m[j][i]` so the result is symmetric.
    ///
    /// Road networks are not symmetric (one-way streets); the planner only
    /// needs a consistent undirected cost.
    pub fn symmetrized(mut self) -> Self {
        let n = self.size;
        for i in 0..n {
            for j in (i + 1)..n {
                let mean = (self.data[i * n + j] + self.data[j * n + i]) / 2.0;
                self.data[i * n + j] = mean;
                self.data[j * n + i] = mean;
            }
        }
        self
    }

    #[inline]
    pub fn get(&self, from: usize, to: usize) -> f64 {
        self.data[from * self.size + to]
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.data[index * self.size..(index + 1) * self.size]
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        (0..self.size).all(|i| (0..i).all(|j| (self.get(i, j) - self.get(j, i)).abs() <= tolerance))
    }

    /// Fails unless the matrix matches a sequence of `expected` points.
    pub fn ensure_size(&self, expected: usize) -> Result<(), ContractViolation> {
        if self.size == expected {
            Ok(())
        } else {
            Err(ContractViolation::MatrixDimension {
                expected,
                actual: self.size,
            })
        }
    }
}
