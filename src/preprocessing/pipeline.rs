//! Feature preprocessing pipeline

use super::{config::PreprocessingConfig, ColumnType};
use crate::data::{FeatureMatrix, FeatureValue};
use crate::error::{FarecastError, Result};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info};

/// Below this standard deviation an encoded column counts as constant
const ZERO_VARIANCE_EPS: f64 = 1e-12;

/// How one input column is turned into encoded columns
#[derive(Debug, Clone, Serialize, Deserialize)]
enum Encoding {
    /// Single numeric output column
    Numeric {
        fill: f64,
        bounds: Option<(f64, f64)>,
    },
    /// One output column per category seen at fit time
    OneHot { categories: Vec<String>, fill: String },
    /// Single output column holding the category index
    Ordinal { categories: Vec<String>, fill: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ColumnPlan {
    name: String,
    encoding: Encoding,
}

impl ColumnPlan {
    fn column_type(&self) -> ColumnType {
        match self.encoding {
            Encoding::Numeric { .. } => ColumnType::Numeric,
            _ => ColumnType::Categorical,
        }
    }

    fn width(&self) -> usize {
        match &self.encoding {
            Encoding::OneHot { categories, .. } => categories.len(),
            _ => 1,
        }
    }

    fn output_names(&self) -> Vec<String> {
        match &self.encoding {
            Encoding::OneHot { categories, .. } => categories
                .iter()
                .map(|c| format!("{}={}", self.name, c))
                .collect(),
            _ => vec![self.name.clone()],
        }
    }

    fn encode(&self, value: &FeatureValue, out: &mut Vec<f64>) -> Result<()> {
        match &self.encoding {
            Encoding::Numeric { fill, bounds } => {
                let v = match value {
                    FeatureValue::Numeric(v) if !v.is_nan() => {
                        match bounds {
                            Some((lo, hi)) if *v < *lo || *v > *hi => *fill,
                            _ => *v,
                        }
                    }
                    FeatureValue::Numeric(_) | FeatureValue::Missing => *fill,
                    FeatureValue::Categorical(s) => {
                        return Err(FarecastError::PreprocessingError(format!(
                            "column '{}' is numeric but received '{}'",
                            self.name, s
                        )))
                    }
                };
                out.push(v);
            }
            Encoding::OneHot { categories, fill } => {
                let cat = self.category_of(value, fill)?;
                out.extend(categories.iter().map(|c| if c == cat { 1.0 } else { 0.0 }));
            }
            Encoding::Ordinal { categories, fill } => {
                let cat = self.category_of(value, fill)?;
                let idx = categories
                    .binary_search_by(|c| c.as_str().cmp(cat))
                    .or_else(|_| categories.binary_search(fill))
                    .unwrap_or(0);
                out.push(idx as f64);
            }
        }
        Ok(())
    }

    fn category_of<'a>(&self, value: &'a FeatureValue, fill: &'a str) -> Result<&'a str> {
        match value {
            FeatureValue::Categorical(s) => Ok(s.as_str()),
            FeatureValue::Missing => Ok(fill),
            FeatureValue::Numeric(v) if v.is_nan() => Ok(fill),
            FeatureValue::Numeric(v) => Err(FarecastError::PreprocessingError(format!(
                "column '{}' is categorical but received {}",
                self.name, v
            ))),
        }
    }
}

/// Fit-once, transform-many preprocessor for tabular features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePreprocessor {
    config: PreprocessingConfig,
    plans: Vec<ColumnPlan>,
    /// Indices of encoded columns kept after zero-variance removal
    keep: Vec<usize>,
    output_names: Vec<String>,
    means: Vec<f64>,
    stds: Vec<f64>,
    is_fitted: bool,
    n_samples_seen: usize,
}

impl FeaturePreprocessor {
    /// Create a new preprocessor with default configuration
    pub fn new() -> Self {
        Self::with_config(PreprocessingConfig::default())
    }

    /// Create a new preprocessor with custom configuration
    pub fn with_config(config: PreprocessingConfig) -> Self {
        Self {
            config,
            plans: Vec::new(),
            keep: Vec::new(),
            output_names: Vec::new(),
            means: Vec::new(),
            stds: Vec::new(),
            is_fitted: false,
            n_samples_seen: 0,
        }
    }

    pub fn config(&self) -> &PreprocessingConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Input columns seen at fit time, in fit order
    pub fn input_columns(&self) -> Vec<&str> {
        self.plans.iter().map(|p| p.name.as_str()).collect()
    }

    /// Names of the produced feature columns
    pub fn output_columns(&self) -> &[String] {
        &self.output_names
    }

    pub fn n_output_features(&self) -> usize {
        self.output_names.len()
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.plans.iter().find(|p| p.name == name).map(|p| p.column_type())
    }

    /// Learn imputation values, encodings and scaling from training data
    pub fn fit(&mut self, data: &FeatureMatrix) -> Result<&mut Self> {
        let start = Instant::now();
        if data.is_empty() {
            return Err(FarecastError::PreprocessingError(
                "cannot fit on an empty feature matrix".to_string(),
            ));
        }
        if data.n_cols() == 0 {
            return Err(FarecastError::PreprocessingError(
                "feature matrix has no columns".to_string(),
            ));
        }

        let plans = data
            .columns()
            .iter()
            .map(|name| self.plan_column(name, data))
            .collect::<Result<Vec<_>>>()?;
        self.plans = plans;

        let index: Vec<usize> = (0..self.plans.len()).collect();
        let encoded = self.encode_rows(data, &index)?;
        let n_encoded: usize = self.plans.iter().map(|p| p.width()).sum();
        let all_names: Vec<String> = self.plans.iter().flat_map(|p| p.output_names()).collect();

        let n = encoded.nrows() as f64;
        let mut means = Vec::with_capacity(n_encoded);
        let mut stds = Vec::with_capacity(n_encoded);
        for col in encoded.columns() {
            let mean = col.sum() / n;
            let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            means.push(mean);
            stds.push(var.sqrt());
        }

        let keep: Vec<usize> = (0..n_encoded)
            .filter(|&j| !self.config.drop_zero_variance || stds[j] > ZERO_VARIANCE_EPS)
            .collect();
        if keep.is_empty() {
            return Err(FarecastError::PreprocessingError(
                "every feature column is constant".to_string(),
            ));
        }
        if keep.len() < n_encoded {
            debug!(
                dropped = n_encoded - keep.len(),
                "Dropping zero-variance columns"
            );
        }

        self.output_names = keep.iter().map(|&j| all_names[j].clone()).collect();
        self.means = keep.iter().map(|&j| means[j]).collect();
        self.stds = keep.iter().map(|&j| stds[j]).collect();
        self.keep = keep;
        self.is_fitted = true;
        self.n_samples_seen = data.n_rows();

        info!(
            rows = data.n_rows(),
            inputs = self.plans.len(),
            outputs = self.output_names.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Preprocessor fitted"
        );
        Ok(self)
    }

    /// Apply the fitted state. Never refits.
    pub fn transform(&self, data: &FeatureMatrix) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(FarecastError::ModelNotFitted);
        }
        let index = self.check_schema(data)?;
        let encoded = self.encode_rows(data, &index)?;

        let mut out = Array2::zeros((encoded.nrows(), self.keep.len()));
        for (k, &j) in self.keep.iter().enumerate() {
            let src = encoded.column(j);
            let mut dst = out.column_mut(k);
            if self.config.scale {
                let std = if self.stds[k] > ZERO_VARIANCE_EPS { self.stds[k] } else { 1.0 };
                dst.assign(&src.mapv(|v| (v - self.means[k]) / std));
            } else {
                dst.assign(&src);
            }
        }
        Ok(out)
    }

    /// Fit then transform the same data
    pub fn fit_transform(&mut self, data: &FeatureMatrix) -> Result<Array2<f64>> {
        self.fit(data)?;
        self.transform(data)
    }

    /// Map fitted columns to positions in `data`, rejecting any drift
    fn check_schema(&self, data: &FeatureMatrix) -> Result<Vec<usize>> {
        let fitted: BTreeSet<&str> = self.plans.iter().map(|p| p.name.as_str()).collect();
        let incoming: BTreeSet<&str> = data.columns().iter().map(|c| c.as_str()).collect();
        if fitted != incoming {
            return Err(FarecastError::SchemaDrift {
                missing: fitted.difference(&incoming).map(|s| s.to_string()).collect(),
                unexpected: incoming.difference(&fitted).map(|s| s.to_string()).collect(),
            });
        }
        Ok(self
            .plans
            .iter()
            .filter_map(|p| data.column_index(&p.name))
            .collect())
    }

    fn encode_rows(&self, data: &FeatureMatrix, index: &[usize]) -> Result<Array2<f64>> {
        let width: usize = self.plans.iter().map(|p| p.width()).sum();
        let rows: Vec<Vec<f64>> = (0..data.n_rows())
            .into_par_iter()
            .map(|i| -> Result<Vec<f64>> {
                let row = data.row(i).unwrap_or(&[]);
                let mut out = Vec::with_capacity(width);
                for (plan, &col) in self.plans.iter().zip(index) {
                    plan.encode(&row[col], &mut out)?;
                }
                Ok(out)
            })
            .collect::<Result<Vec<_>>>()?;

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((data.n_rows(), width), flat)?)
    }

    fn plan_column(&self, name: &str, data: &FeatureMatrix) -> Result<ColumnPlan> {
        let values = data.column_values(name)?;
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();
        for v in values {
            match v {
                FeatureValue::Numeric(x) if !x.is_nan() => numeric.push(*x),
                FeatureValue::Categorical(s) => categorical.push(s.as_str()),
                _ => {}
            }
        }

        if !numeric.is_empty() && !categorical.is_empty() {
            return Err(FarecastError::PreprocessingError(format!(
                "column '{}' mixes numeric and categorical values",
                name
            )));
        }

        let encoding = if categorical.is_empty() {
            let bounds = match self.config.outlier_iqr_factor {
                Some(factor) if numeric.len() >= 4 => iqr_bounds(&numeric, factor),
                _ => None,
            };
            let inliers: Vec<f64> = numeric
                .iter()
                .copied()
                .filter(|v| bounds.map(|(lo, hi)| *v >= lo && *v <= hi).unwrap_or(true))
                .collect();
            let fill = if inliers.is_empty() {
                0.0
            } else {
                inliers.iter().sum::<f64>() / inliers.len() as f64
            };
            Encoding::Numeric { fill, bounds }
        } else {
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
            for c in &categorical {
                *counts.entry(c).or_insert(0) += 1;
            }
            let mut fill = "";
            let mut best = 0;
            for (c, &n) in &counts {
                if n > best {
                    best = n;
                    fill = c;
                }
            }
            let categories: Vec<String> = counts.keys().map(|c| c.to_string()).collect();
            let fill = fill.to_string();
            if categories.len() <= self.config.max_onehot_categories {
                Encoding::OneHot { categories, fill }
            } else {
                Encoding::Ordinal { categories, fill }
            }
        };

        Ok(ColumnPlan { name: name.to_string(), encoding })
    }
}

impl Default for FeaturePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Linear-interpolated quantile of sorted data
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn iqr_bounds(values: &[f64], factor: f64) -> Option<(f64, f64)> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    if iqr <= 0.0 {
        return None;
    }
    Some((q1 - factor * iqr, q3 + factor * iqr))
}
