//! Stacking ensemble method

use crate::error::{FarecastError, Result};
use crate::training::cross_validation::{CVStrategy, CrossValidator};
use crate::training::Regressor;
use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for the stacking ensemble
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackingConfig {
    /// Whether the selector evaluates a stacking candidate at all
    pub enabled: bool,
    /// Candidate names used as base learners
    pub base: Vec<String>,
    /// Candidate name used as the meta-learner
    pub meta: String,
    /// Number of out-of-fold splits
    pub n_folds: usize,
    /// Whether to include original features in meta-learner input
    pub passthrough: bool,
    pub seed: u64,
}

impl Default for StackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base: vec!["svr".to_string(), "ridge".to_string(), "random_forest".to_string()],
            meta: "xgboost".to_string(),
            n_folds: 5,
            passthrough: false,
            seed: 42,
        }
    }
}

/// Fits a regressor with fixed hyperparameters
pub type FitFn<'a> = &'a (dyn Fn(&Array2<f64>, &Array1<f64>) -> Result<Regressor> + Sync);

/// Stacked regressor: base learners refit on all rows, meta-learner fit on
/// their out-of-fold predictions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackingRegressor {
    base_names: Vec<String>,
    base_models: Vec<Regressor>,
    meta_name: String,
    meta_model: Regressor,
    passthrough: bool,
    n_features: usize,
}

impl StackingRegressor {
    /// Fit the ensemble on `x`/`y`; no other rows are seen
    pub fn fit(
        config: &StackingConfig,
        base: &[(String, FitFn<'_>)],
        meta: (String, FitFn<'_>),
        x: &Array2<f64>,
        y: &Array1<f64>,
    ) -> Result<Self> {
        if base.is_empty() {
            return Err(FarecastError::ValidationError("No base models provided".to_string()));
        }
        let n_samples = x.nrows();
        if n_samples != y.len() {
            return Err(FarecastError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples < 2 {
            return Err(FarecastError::TrainingError(format!(
                "stacking needs at least 2 rows, got {}",
                n_samples
            )));
        }

        let splits = CrossValidator::new(CVStrategy::KFold {
            n_splits: config.n_folds.clamp(2, n_samples),
            shuffle: true,
        })
        .with_random_state(config.seed)
        .split(n_samples)?;

        // Out-of-fold predictions, one column per base learner
        let columns: Vec<Array1<f64>> = base
            .par_iter()
            .map(|(name, fit)| {
                let mut oof = Array1::zeros(n_samples);
                for split in &splits {
                    let x_tr = x.select(Axis(0), &split.train_indices);
                    let y_tr = y.select(Axis(0), &split.train_indices);
                    let model = fit(&x_tr, &y_tr)?;
                    let preds = model.predict(&x.select(Axis(0), &split.test_indices))?;
                    for (local, &global) in split.test_indices.iter().enumerate() {
                        oof[global] = preds[local];
                    }
                }
                tracing::debug!(base = %name, "out-of-fold predictions ready");
                Ok(oof)
            })
            .collect::<Result<Vec<_>>>()?;

        let meta_features = Self::assemble(&columns, x, config.passthrough);
        let (meta_name, meta_fit) = meta;
        let meta_model = meta_fit(&meta_features, y)?;

        let base_models = base
            .par_iter()
            .map(|(_, fit)| fit(x, y))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base_names: base.iter().map(|(n, _)| n.clone()).collect(),
            base_models,
            meta_name,
            meta_model,
            passthrough: config.passthrough,
            n_features: x.ncols(),
        })
    }

    fn assemble(columns: &[Array1<f64>], x: &Array2<f64>, passthrough: bool) -> Array2<f64> {
        let n_base = columns.len();
        let width = if passthrough { n_base + x.ncols() } else { n_base };
        let mut meta = Array2::zeros((x.nrows(), width));
        for (j, col) in columns.iter().enumerate() {
            meta.column_mut(j).assign(col);
        }
        if passthrough {
            for j in 0..x.ncols() {
                meta.column_mut(n_base + j).assign(&x.column(j));
            }
        }
        meta
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(FarecastError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let columns = self
            .base_models
            .iter()
            .map(|m| m.predict(x))
            .collect::<Result<Vec<_>>>()?;
        self.meta_model.predict(&Self::assemble(&columns, x, self.passthrough))
    }

    pub fn base_names(&self) -> &[String] {
        &self.base_names
    }

    pub fn meta_name(&self) -> &str {
        &self.meta_name
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::{r2_score, MeanRegressor, RidgeRegression};

    fn ridge(x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
        let mut m = RidgeRegression::new().with_alpha(0.1);
        m.fit(x, y)?;
        Ok(Regressor::Ridge(m))
    }

    fn mean(x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
        let mut m = MeanRegressor::new();
        m.fit(x, y)?;
        Ok(Regressor::Baseline(m))
    }

    #[test]
    fn test_stacking_fits_linear_signal() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| ((i * (j + 1)) % 13) as f64);
        let y = x.column(0).mapv(|v| 2.0 * v) + x.column(1).mapv(|v| v) + 1.0;
        let base: Vec<(String, FitFn<'_>)> = vec![
            ("ridge".to_string(), &ridge as FitFn<'_>),
            ("baseline".to_string(), &mean as FitFn<'_>),
        ];
        let model = StackingRegressor::fit(&StackingConfig::default(), &base, ("ridge".to_string(), &ridge as FitFn<'_>), &x, &y).unwrap();

        assert_eq!(model.base_names(), &["ridge".to_string(), "baseline".to_string()]);
        assert_eq!(model.meta_name(), "ridge");
        let pred = model.predict(&x).unwrap();
        assert!(r2_score(&y, &pred).unwrap() > 0.95);
        assert!(model.predict(&Array2::zeros((2, 3))).is_err());
    }

    #[test]
    fn test_passthrough_and_errors() {
        let x = Array2::from_shape_fn((12, 1), |(i, _)| i as f64);
        let y = x.column(0).to_owned();
        let config = StackingConfig { passthrough: true, ..Default::default() };
        let base: Vec<(String, FitFn<'_>)> = vec![("baseline".to_string(), &mean as FitFn<'_>)];
        let model = StackingRegressor::fit(&config, &base, ("ridge".to_string(), &ridge as FitFn<'_>), &x, &y).unwrap();
        assert_eq!(model.predict(&x).unwrap().len(), 12);

        let none: Vec<(String, FitFn<'_>)> = Vec::new();
        assert!(StackingRegressor::fit(&config, &none, ("ridge".to_string(), &ridge as FitFn<'_>), &x, &y).is_err());
    }
}
