//! Preprocessing configuration

use serde::{Deserialize, Serialize};

/// Configuration for the feature preprocessor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Standardize encoded features to zero mean and unit variance
    pub scale: bool,

    /// Treat numeric values outside `[q1 - f*iqr, q3 + f*iqr]` as missing.
    /// `None` disables outlier masking.
    pub outlier_iqr_factor: Option<f64>,

    /// Drop encoded columns whose training variance is zero
    pub drop_zero_variance: bool,

    /// Remove exact duplicate rows before fitting
    pub drop_duplicates: bool,

    /// Maximum number of categories for one-hot encoding.
    /// Columns with more categories are ordinal encoded.
    pub max_onehot_categories: usize,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            scale: true,
            outlier_iqr_factor: Some(1.5),
            drop_zero_variance: true,
            drop_duplicates: true,
            max_onehot_categories: 32,
        }
    }
}

impl PreprocessingConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scale(mut self, scale: bool) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_outlier_iqr_factor(mut self, factor: Option<f64>) -> Self {
        self.outlier_iqr_factor = factor;
        self
    }

    pub fn with_drop_zero_variance(mut self, drop: bool) -> Self {
        self.drop_zero_variance = drop;
        self
    }

    pub fn with_drop_duplicates(mut self, drop: bool) -> Self {
        self.drop_duplicates = drop;
        self
    }

    pub fn with_max_onehot_categories(mut self, max: usize) -> Self {
        self.max_onehot_categories = max;
        self
    }
}
