//! Error types for Mosaic
//!
//! Provides a unified error type for the topology and placement layer.

use thiserror::Error;

/// Result type alias for Mosaic core operations
pub type Result<T> = std::result::Result<T, MosaicError>;

/// Unified error type for Mosaic core
#[derive(Error, Debug)]
pub enum MosaicError {
    // ===== Topology Errors =====
    #[error("Malformed topology: {0}")]
    MalformedTopology(String),

    #[error("Processor record {record} is missing field '{field}'")]
    MissingField { record: usize, field: &'static str },

    #[error("Processor record {record} has invalid value for '{field}': {value}")]
    InvalidField {
        record: usize,
        field: &'static str,
        value: String,
    },

    // ===== Category Errors =====
    #[error("Unknown shard category: {0}")]
    UnknownCategory(String),

    // ===== Placement Errors =====
    #[error("Unknown rounding policy: {0}")]
    UnknownRounding(String),

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MosaicError {
    /// Whether this error means the CPU descriptor input could not be turned
    /// into a usable topology.
    pub fn is_malformed_topology(&self) -> bool {
        matches!(
            self,
            MosaicError::MalformedTopology(_)
                | MosaicError::MissingField { .. }
                | MosaicError::InvalidField { .. }
        )
    }
}

impl From<serde_json::Error> for MosaicError {
    fn from(err: serde_json::Error) -> Self {
        MosaicError::Serialization(err.to_string())
    }
}
