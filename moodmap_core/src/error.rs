//! Error taxonomy for the sync layer.
//!
//! None of these are fatal: validation failures are dropped per event,
//! stream disruptions trigger resubscription, and resource exhaustion
//! evicts the oldest remote records.

use moodmap_env::EnvError;
use thiserror::Error;

/// A malformed event or sample, rejected locally without touching any other
/// record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Missing record id")]
    MissingRecordId,

    #[error("Record id {0:?} is reserved for the device's own position")]
    ReservedRecordId(String),

    #[error("Non-finite coordinate: lat={lat}, lon={lon}")]
    NonFiniteCoordinate { lat: f64, lon: f64 },

    #[error("Coordinate out of bounds: lat={lat}, lon={lon}")]
    OutOfBounds { lat: f64, lon: f64 },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Document has no location")]
    Unpositioned,

    #[error("Sample accuracy {accuracy_meters}m exceeds limit {limit_meters}m")]
    InaccurateSample { accuracy_meters: f64, limit_meters: f64 },

    #[error("Sample at {incoming_ms} is older than stored {stored_ms}")]
    OutOfOrder { incoming_ms: i64, stored_ms: i64 },
}

impl ValidationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level error for the sync runtime.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Stream disrupted: {0}")]
    StreamDisruption(String),

    #[error("Index capacity {capacity} exhausted, evicted {evicted} records")]
    ResourceExhaustion { capacity: usize, evicted: usize },

    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
