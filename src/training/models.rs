//! Fitted regressor family

use super::linear_models::{MeanRegressor, RidgeRegression};
use super::random_forest::RandomForestRegressor;
use super::svm::SVMRegressor;
use super::xgboost::XGBoostRegressor;
use crate::ensemble::StackingRegressor;
use crate::error::{FarecastError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Any fitted model a partition can be served by.
///
/// Serializable so the registry can persist it as a single artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Regressor {
    Ridge(RidgeRegression),
    RandomForest(RandomForestRegressor),
    Svr(SVMRegressor),
    XGBoost(XGBoostRegressor),
    Baseline(MeanRegressor),
    Stacking(Box<StackingRegressor>),
}

impl Regressor {
    /// Short model family name
    pub fn kind(&self) -> &'static str {
        match self {
            Regressor::Ridge(_) => "ridge",
            Regressor::RandomForest(_) => "random_forest",
            Regressor::Svr(_) => "svr",
            Regressor::XGBoost(_) => "xgboost",
            Regressor::Baseline(_) => "baseline",
            Regressor::Stacking(_) => "stacking",
        }
    }

    /// Predict, rejecting non-finite outputs
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let preds = match self {
            Regressor::Ridge(m) => m.predict(x)?,
            Regressor::RandomForest(m) => m.predict(x)?,
            Regressor::Svr(m) => m.predict(x)?,
            Regressor::XGBoost(m) => m.predict(x)?,
            Regressor::Baseline(m) => m.predict(x)?,
            Regressor::Stacking(m) => m.predict(x)?,
        };
        if preds.iter().any(|p| !p.is_finite()) {
            return Err(FarecastError::ComputationError(format!(
                "{} produced non-finite predictions",
                self.kind()
            )));
        }
        Ok(preds)
    }

    /// Width of the matrix the model was fitted on
    pub fn n_features(&self) -> usize {
        match self {
            Regressor::Ridge(m) => m.coefficients.as_ref().map_or(0, |c| c.len()),
            Regressor::RandomForest(m) => m.n_features(),
            Regressor::Svr(m) => m.n_features(),
            Regressor::XGBoost(m) => m.n_features(),
            Regressor::Baseline(m) => m.n_features,
            Regressor::Stacking(m) => m.n_features(),
        }
    }
}

impl From<MeanRegressor> for Regressor {
    fn from(m: MeanRegressor) -> Self {
        Regressor::Baseline(m)
    }
}

impl From<RidgeRegression> for Regressor {
    fn from(m: RidgeRegression) -> Self {
        Regressor::Ridge(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_dispatch() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let mut ridge = RidgeRegression::new().with_alpha(0.0);
        ridge.fit(&x, &y).unwrap();
        let model = Regressor::from(ridge);

        assert_eq!(model.kind(), "ridge");
        assert_eq!(model.n_features(), 2);

        let pred = model.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-6);
        }
    }

    #[test]
    fn test_baseline_constant() {
        let model = Regressor::from(MeanRegressor::constant(7.5, 3));
        let pred = model.predict(&Array2::zeros((2, 3))).unwrap();
        assert_eq!(pred, array![7.5, 7.5]);
        assert!(model.predict(&Array2::zeros((2, 4))).is_err());
    }
}
