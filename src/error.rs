//! Error types for the farecast pipeline

use thiserror::Error;

/// Result type alias for farecast operations
pub type Result<T> = std::result::Result<T, FarecastError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum FarecastError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Preprocessing error: {0}")]
    PreprocessingError(String),

    #[error("Schema drift: missing columns {missing:?}, unexpected columns {unexpected:?}")]
    SchemaDrift {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Clustering failed: {0}")]
    ClusteringFailed(String),

    #[error("No elbow found: {0}")]
    NoElbowFound(String),

    #[error("Invalid search space for '{candidate}': {reason}")]
    InvalidSearchSpace { candidate: String, reason: String },

    #[error("Tuning failed for '{candidate}': {reason}")]
    TuningFailed { candidate: String, reason: String },

    #[error("Insufficient samples for adjusted score: n = {n}, m = {m}")]
    InsufficientSamplesForAdjustedScore { n: usize, m: usize },

    #[error("No viable candidate: {0}")]
    NoViableCandidate(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Corrupt artifact '{key}': {reason}")]
    CorruptArtifact { key: String, reason: String },

    #[error("Unknown partition: {0}")]
    UnknownPartition(usize),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Computation error: {0}")]
    ComputationError(String),
}

impl FarecastError {
    /// Whether the error is local to a single candidate evaluation.
    ///
    /// Candidate-local errors exclude that candidate from champion selection
    /// without failing the partition.
    pub fn is_candidate_local(&self) -> bool {
        matches!(
            self,
            FarecastError::InvalidSearchSpace { .. }
                | FarecastError::TuningFailed { .. }
                | FarecastError::InsufficientSamplesForAdjustedScore { .. }
                | FarecastError::TrainingError(_)
                | FarecastError::ComputationError(_)
                | FarecastError::InvalidParameter { .. }
                | FarecastError::ShapeError { .. }
                | FarecastError::ValidationError(_)
        )
    }
}

impl From<polars::error::PolarsError> for FarecastError {
    fn from(err: polars::error::PolarsError) -> Self {
        FarecastError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for FarecastError {
    fn from(err: serde_json::Error) -> Self {
        FarecastError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for FarecastError {
    fn from(err: ndarray::ShapeError) -> Self {
        FarecastError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FarecastError::UnknownPartition(7);
        assert_eq!(err.to_string(), "Unknown partition: 7");

        let err = FarecastError::InsufficientSamplesForAdjustedScore { n: 5, m: 4 };
        assert_eq!(err.to_string(), "Insufficient samples for adjusted score: n = 5, m = 4");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: FarecastError = io_err.into();
        assert!(matches!(err, FarecastError::IoError(_)));
    }

    #[test]
    fn test_candidate_local_classification() {
        assert!(FarecastError::InvalidSearchSpace {
            candidate: "ridge".into(),
            reason: "empty".into()
        }
        .is_candidate_local());
        assert!(!FarecastError::ClusteringFailed("x".into()).is_candidate_local());
        assert!(!FarecastError::ModelNotFound("predictor:0".into()).is_candidate_local());
    }
}
