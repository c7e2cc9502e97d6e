//! Error types shared across the planner.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::model::UnitKey;

/// Failure of a primary distance source. Consumed by the fallback logic in
/// [`crate::distance::DistanceProvider`] and never surfaced to callers.
#[derive(Debug, Error)]
pub enum DistanceError {
    #[error("distance service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("distance service returned no matrix: {0}")]
    EmptyResponse(String),
    #[error("distance service returned {got} rows for {expected} locations")]
    Dimension { expected: usize, got: usize },
    #[error("distance service returned an unusable value at ({row}, {col})")]
    InvalidValue { row: usize, col: usize },
    #[error("distance provider disabled")]
    Disabled,
}

/// Broad classification of store failures; drives the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// Connection loss, timeouts.
    Transient,
    /// Write conflict (lock, duplicate key race).
    Conflict,
    /// Anything a retry cannot fix.
    Fatal,
}

#[derive(Debug, Error, Clone)]
#[error("{kind:?} store error: {message}")]
pub struct StoreError {
    kind: StoreErrorKind,
    message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Transient, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Conflict, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Fatal, message)
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, StoreErrorKind::Transient | StoreErrorKind::Conflict)
    }
}

/// Programmer or contract violations: fatal for the unit that hits them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContractViolation {
    #[error("distance matrix is {actual}x{actual}, expected {expected}x{expected}")]
    MatrixDimension { expected: usize, actual: usize },
    #[error("distance matrix data has {len} entries, not a square of {size}")]
    MatrixShape { size: usize, len: usize },
    #[error("distance matrix has a negative or non-finite entry at ({row}, {col})")]
    MatrixValue { row: usize, col: usize },
    #[error("duplicate point identifier `{0}`")]
    DuplicateId(String),
    #[error("start point `{0}` is not part of the point set or has no coordinate")]
    UnknownStart(String),
    #[error("{located} located points would reach the reserved position {sentinel}")]
    SentinelCollision { located: usize, sentinel: u32 },
}

/// Stage of the unit pipeline a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStage {
    Loaded,
    Enriched,
    Sized,
    Sequenced,
    Persisted,
}

impl fmt::Display for UnitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitStage::Loaded => "LOADED",
            UnitStage::Enriched => "ENRICHED",
            UnitStage::Sized => "SIZED",
            UnitStage::Sequenced => "SEQUENCED",
            UnitStage::Persisted => "PERSISTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone)]
pub enum UnitFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("contract violation: {0}")]
    Contract(#[from] ContractViolation),
    /// A worker panicked while processing the unit.
    #[error("worker panicked: {0}")]
    Panic(String),
}

/// Failure category reported in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Persistence,
    Contract,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Persistence => f.write_str("persistence"),
            FailureKind::Contract => f.write_str("contract violation"),
        }
    }
}

/// A unit that landed in `FAILED`.
#[derive(Debug, Error, Clone)]
#[error("unit {unit} failed while entering {stage}: {cause}")]
pub struct UnitError {
    pub unit: UnitKey,
    pub stage: UnitStage,
    pub cause: UnitFailure,
}

impl UnitError {
    pub fn new(unit: UnitKey, stage: UnitStage, cause: impl Into<UnitFailure>) -> Self {
        Self {
            unit,
            stage,
            cause: cause.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self.cause {
            UnitFailure::Store(_) => FailureKind::Persistence,
            UnitFailure::Contract(_) | UnitFailure::Panic(_) => FailureKind::Contract,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value `{value}` for {key}")]
    Env { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
