//! End-to-end training and inference

pub mod inference;
pub mod training;

pub use inference::{InferenceOrchestrator, PredictionSet, RoutingFailure, RowOutcome, RowPrediction};
pub use training::{PartitionOutcome, PartitionSummary, TrainingOrchestrator, TrainingReport, TrainingState};
