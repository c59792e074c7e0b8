//! Error types for the tracking core

use thiserror::Error;

/// Result type alias for the tracking core
pub type Result<T> = std::result::Result<T, TrackError>;

/// Errors that can occur in the estimation and association core
///
/// Shape problems, numerical singularity and unsupported options are kept
/// as distinct variants so callers can tell upstream state corruption
/// (`NotPositiveDefinite`) apart from plain usage errors. Empty track or
/// detection lists are never errors; they produce empty matrices.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("non-finite measurement component at index {index}: {value}")]
    NonFiniteMeasurement { index: usize, value: f64 },

    #[error("measurement size component at index {index} must be positive, got {value}")]
    NonPositiveSize { index: usize, value: f64 },

    #[error("dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{context} is not positive definite; Cholesky factorization failed")]
    NotPositiveDefinite { context: &'static str },

    #[error("unknown distance metric: {name:?}")]
    UnknownMetric { name: String },

    #[error("missing embedding on {side} at index {index}")]
    MissingEmbedding { side: &'static str, index: usize },

    #[error("configuration error: {0}")]
    Config(String),
}
