//! Epsilon-insensitive support vector regression
//!
//! The dual is solved by exact coordinate descent over `beta = alpha - alpha*`
//! with the bias folded into the kernel (`K + 1`), so no equality constraint
//! is needed. Targets are standardized internally.

use crate::error::{FarecastError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum number of samples for eager kernel matrix computation.
/// Beyond this, training returns an error to prevent OOM.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Kernel function type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KernelType {
    /// Linear kernel: K(x, y) = x · y
    Linear,
    /// Polynomial kernel: K(x, y) = (γ * x · y + r)^d
    Polynomial { degree: usize, gamma: f64, coef0: f64 },
    /// Radial Basis Function (Gaussian): K(x, y) = exp(-γ * ||x - y||²)
    RBF { gamma: f64 },
    /// Sigmoid kernel: K(x, y) = tanh(γ * x · y + r)
    Sigmoid { gamma: f64, coef0: f64 },
}

impl Default for KernelType {
    fn default() -> Self {
        KernelType::RBF { gamma: 1.0 }
    }
}

impl KernelType {
    /// Build a kernel by name with the given gamma
    pub fn from_name(name: &str, gamma: f64) -> Result<Self> {
        match name {
            "linear" => Ok(KernelType::Linear),
            "poly" => Ok(KernelType::Polynomial { degree: 3, gamma, coef0: 0.0 }),
            "rbf" => Ok(KernelType::RBF { gamma }),
            "sigmoid" => Ok(KernelType::Sigmoid { gamma, coef0: 0.0 }),
            other => Err(FarecastError::InvalidParameter {
                name: "kernel".to_string(),
                value: other.to_string(),
                reason: "expected 'linear', 'poly', 'rbf' or 'sigmoid'".to_string(),
            }),
        }
    }

    fn eval(&self, a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
        match self {
            KernelType::Linear => a.dot(b),
            KernelType::Polynomial { degree, gamma, coef0 } => {
                (gamma * a.dot(b) + coef0).powi((*degree).min(i32::MAX as usize) as i32)
            }
            KernelType::RBF { gamma } => {
                let norm_sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
                (-gamma * norm_sq).exp()
            }
            KernelType::Sigmoid { gamma, coef0 } => (gamma * a.dot(b) + coef0).tanh(),
        }
    }
}

/// `1 / (n_features * var(X))`, the usual data-scaled RBF width
pub fn scale_gamma(x: &Array2<f64>) -> f64 {
    let n = x.len() as f64;
    if n == 0.0 {
        return 1.0;
    }
    let mean = x.sum() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    if var > 0.0 {
        1.0 / (x.ncols() as f64 * var)
    } else {
        1.0
    }
}

/// SVM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMConfig {
    /// Regularization parameter (C)
    pub c: f64,
    /// Kernel function
    pub kernel: KernelType,
    /// Tolerance for stopping criterion
    pub tol: f64,
    /// Maximum number of coordinate sweeps
    pub max_iter: usize,
    /// Random seed for the sweep order
    pub random_state: Option<u64>,
    /// Tube half-width, in standardized target units
    pub epsilon: f64,
}

impl Default for SVMConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: KernelType::RBF { gamma: 1.0 },
            tol: 1e-4,
            max_iter: 1000,
            random_state: Some(42),
            epsilon: 0.1,
        }
    }
}

/// Support Vector Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMRegressor {
    config: SVMConfig,
    support_vectors: Option<Array2<f64>>,
    /// Dual coefficients of the support vectors (alpha - alpha*)
    coefficients: Option<Array1<f64>>,
    y_mean: f64,
    y_scale: f64,
    n_features: usize,
    pub n_iter: usize,
}

impl SVMRegressor {
    /// Create a new SVM regressor
    pub fn new(config: SVMConfig) -> Self {
        Self {
            config,
            support_vectors: None,
            coefficients: None,
            y_mean: 0.0,
            y_scale: 1.0,
            n_features: 0,
            n_iter: 0,
        }
    }

    pub fn config(&self) -> &SVMConfig {
        &self.config
    }

    fn compute_kernel_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (0..n)
                    .map(|j| self.config.kernel.eval(&x.row(i), &x.row(j)) + 1.0)
                    .collect()
            })
            .collect();
        Array2::from_shape_fn((n, n), |(i, j)| rows[i][j])
    }

    /// Fit the regressor
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n = x.nrows();
        if n != y.len() {
            return Err(FarecastError::ShapeError {
                expected: format!("y length = {}", n),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n == 0 {
            return Err(FarecastError::TrainingError("no training samples".to_string()));
        }
        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(FarecastError::TrainingError(format!(
                "{} samples exceed the SVR kernel matrix limit of {}",
                n, MAX_KERNEL_MATRIX_SAMPLES
            )));
        }
        if !(self.config.c > 0.0) {
            return Err(FarecastError::InvalidParameter {
                name: "C".to_string(),
                value: self.config.c.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let y_mean = y.mean().unwrap_or(0.0);
        let y_std = y.std(0.0);
        let y_scale = if y_std > 0.0 { y_std } else { 1.0 };
        let ys = y.mapv(|v| (v - y_mean) / y_scale);

        let k = self.compute_kernel_matrix(x);
        let c = self.config.c;
        let eps = self.config.epsilon;

        let mut beta: Array1<f64> = Array1::zeros(n);
        // gradient of the smooth part: K beta
        let mut kb: Array1<f64> = Array1::zeros(n);
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.random_state.unwrap_or(42));

        self.n_iter = 0;
        for _ in 0..self.config.max_iter {
            self.n_iter += 1;
            order.shuffle(&mut rng);
            let mut max_change: f64 = 0.0;

            for &i in &order {
                let kii = k[[i, i]];
                if kii <= 1e-12 {
                    continue;
                }
                // residual without the i-th term
                let r = kb[i] - kii * beta[i] - ys[i];
                let shrunk = if r > eps {
                    r - eps
                } else if r < -eps {
                    r + eps
                } else {
                    0.0
                };
                let new_beta = (-shrunk / kii).clamp(-c, c);
                let delta = new_beta - beta[i];
                if delta != 0.0 {
                    kb.scaled_add(delta, &k.column(i));
                    beta[i] = new_beta;
                    max_change = max_change.max(delta.abs());
                }
            }

            if !max_change.is_finite() || !kb.iter().all(|v| v.is_finite()) {
                return Err(FarecastError::ComputationError(
                    "SVR coordinate descent diverged".to_string(),
                ));
            }
            if max_change < self.config.tol {
                break;
            }
        }

        let support: Vec<usize> = (0..n).filter(|&i| beta[i].abs() > 1e-10).collect();
        self.support_vectors = Some(x.select(ndarray::Axis(0), &support));
        self.coefficients = Some(support.iter().map(|&i| beta[i]).collect());
        self.y_mean = y_mean;
        self.y_scale = y_scale;
        self.n_features = x.ncols();
        Ok(self)
    }

    /// Predict target values
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (sv, coef) = match (&self.support_vectors, &self.coefficients) {
            (Some(sv), Some(coef)) => (sv, coef),
            _ => return Err(FarecastError::ModelNotFitted),
        };
        if x.ncols() != self.n_features {
            return Err(FarecastError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }

        let predictions: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|i| {
                let row = x.row(i);
                let f: f64 = sv
                    .rows()
                    .into_iter()
                    .zip(coef.iter())
                    .map(|(s, b)| b * (self.config.kernel.eval(&row, &s) + 1.0))
                    .sum();
                f * self.y_scale + self.y_mean
            })
            .collect();
        Ok(Array1::from_vec(predictions))
    }

    /// Feature count seen at fit time
    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::r2_score;

    #[test]
    fn test_svm_regressor_linear() {
        let x = Array2::from_shape_vec((10, 1), vec![
            1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0
        ]).unwrap();
        let y = x.column(0).mapv(|v| 2.0 * v);

        let config = SVMConfig {
            c: 10.0,
            kernel: KernelType::Linear,
            epsilon: 0.05,
            ..Default::default()
        };
        let mut svr = SVMRegressor::new(config);
        svr.fit(&x, &y).unwrap();

        let predictions = svr.predict(&x).unwrap();
        for (pred, actual) in predictions.iter().zip(y.iter()) {
            let error = (pred - actual).abs() / actual;
            assert!(error < 0.3, "Error {} too large for pred={}, actual={}", error, pred, actual);
        }
    }

    #[test]
    fn test_svm_regressor_rbf_nonlinear() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64 / 4.0);
        let y = x.column(0).mapv(|v| v.sin() * 100.0 + 500.0);
        let gamma = scale_gamma(&x);
        let mut svr = SVMRegressor::new(SVMConfig {
            c: 10.0,
            kernel: KernelType::RBF { gamma: gamma * 10.0 },
            ..Default::default()
        });
        svr.fit(&x, &y).unwrap();
        let pred = svr.predict(&x).unwrap();
        assert!(r2_score(&y, &pred).unwrap() > 0.8);
    }

    #[test]
    fn test_kernel_from_name() {
        assert_eq!(KernelType::from_name("rbf", 0.5).unwrap(), KernelType::RBF { gamma: 0.5 });
        assert!(KernelType::from_name("laplace", 0.5).is_err());
    }

    #[test]
    fn test_invalid_c() {
        let x = Array2::zeros((3, 1));
        let y = Array1::zeros(3);
        let mut svr = SVMRegressor::new(SVMConfig { c: 0.0, ..Default::default() });
        assert!(svr.fit(&x, &y).is_err());
        assert!(matches!(
            SVMRegressor::new(SVMConfig::default()).predict(&x),
            Err(FarecastError::ModelNotFitted)
        ));
    }
}
