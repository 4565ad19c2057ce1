//! Farecast - per-segment model selection for fare regression
//!
//! Training clusters the preprocessed feature space, then tunes and scores a
//! roster of candidate regressors inside every cluster and registers the
//! winner. Inference routes each new row to its cluster's champion.
//!
//! # Modules
//!
//! ## Pipeline
//! - [`pipeline`] - Training and inference orchestration
//! - [`partition`] - Partition count selection and k-means assignment
//! - [`selection`] - Candidate roster and champion selection
//! - [`registry`] - Artifact persistence keyed by role and partition
//!
//! ## Core ML Modules
//! - [`data`] - Tabular input and CSV loading
//! - [`preprocessing`] - Cleaning, encoding and scaling
//! - [`training`] - Regressors, k-means, cross-validation, metrics
//! - [`optimizer`] - Search spaces and cross-validated tuning
//! - [`ensemble`] - Out-of-fold stacking
//!
//! ## Services
//! - [`config`] - Pipeline configuration
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core ML modules
pub mod data;
pub mod preprocessing;
pub mod training;
pub mod optimizer;
pub mod ensemble;

// Pipeline
pub mod partition;
pub mod selection;
pub mod registry;
pub mod pipeline;

// Services
pub mod config;
pub mod cli;

pub use error::{FarecastError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{FarecastError, Result};

    // Data
    pub use crate::data::{Dataset, FeatureMatrix, FeatureValue};

    // Preprocessing
    pub use crate::preprocessing::{FeaturePreprocessor, PreprocessingConfig};

    // Training
    pub use crate::training::{MeanRegressor, RegressionMetrics, Regressor};

    // Optimization
    pub use crate::optimizer::{ParamSet, SearchSpace, SearchStrategy, TunerConfig};

    // Partitioning
    pub use crate::partition::{ElbowDetector, FixedElbow, PartitionModel, Partitioner, PartitionerConfig};

    // Selection
    pub use crate::selection::{Candidate, ChampionSelector, Roster, ScoreKind, SelectionConfig};

    // Registry
    pub use crate::registry::{FittedModel, ModelRegistry, RegistryKey};

    // Pipeline
    pub use crate::config::{PipelineConfig, UnknownPartitionPolicy};
    pub use crate::pipeline::{InferenceOrchestrator, PredictionSet, TrainingOrchestrator, TrainingReport, TrainingState};
}
