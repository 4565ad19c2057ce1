//! Feature preprocessing
//!
//! Turns a [`FeatureMatrix`](crate::data::FeatureMatrix) into a dense numeric
//! matrix. Fitted once on training data; the fitted state is persisted and
//! reused for every later transform.
//! - Outlier masking (IQR bounds)
//! - Missing value imputation (mean / most frequent)
//! - Categorical encoding (one-hot, ordinal for high cardinality)
//! - Standard scaling
//! - Zero-variance column removal

mod config;
mod pipeline;

pub use config::PreprocessingConfig;
pub use pipeline::FeaturePreprocessor;

use serde::{Deserialize, Serialize};

/// Column data type inferred at fit time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Numeric,
    Categorical,
}
