//! Linear model implementations

use crate::error::{FarecastError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Solve symmetric positive-definite system Ax = b using Cholesky decomposition.
/// Retries once with a small diagonal ridge if the matrix is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }
    if let Some(x) = cholesky_solve_inner(a, b) {
        return Some(x);
    }

    let mut a_reg = a.clone();
    let ridge = (1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64).max(1e-12);
    for k in 0..n {
        a_reg[[k, k]] += ridge;
    }
    cholesky_solve_inner(&a_reg, b)
}

fn cholesky_solve_inner(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Matrix inversion by Gauss-Jordan elimination with partial pivoting
fn matrix_inverse(m: &Array2<f64>) -> Option<Array2<f64>> {
    let n = m.nrows();
    if n != m.ncols() {
        return None;
    }

    // Augmented matrix [M | I]
    let mut aug = Array2::zeros((n, 2 * n));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = m[[i, j]];
        }
        aug[[i, n + i]] = 1.0;
    }

    for col in 0..n {
        let mut max_row = col;
        for row in col + 1..n {
            if aug[[row, col]].abs() > aug[[max_row, col]].abs() {
                max_row = row;
            }
        }
        if max_row != col {
            for j in 0..2 * n {
                aug.swap([col, j], [max_row, j]);
            }
        }
        if aug[[col, col]].abs() < 1e-10 {
            return None;
        }

        let pivot = aug[[col, col]];
        for j in 0..2 * n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row != col {
                let factor = aug[[row, col]];
                for j in 0..2 * n {
                    aug[[row, j]] -= factor * aug[[col, j]];
                }
            }
        }
    }

    Some(aug.slice(ndarray::s![.., n..]).to_owned())
}

/// Linear system solver used for the normal equations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RidgeSolver {
    /// Cholesky factorization, Gauss-Jordan fallback
    Cholesky,
    /// Explicit Gauss-Jordan inverse
    GaussJordan,
}

impl RidgeSolver {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "cholesky" | "auto" => Ok(RidgeSolver::Cholesky),
            "gauss_jordan" => Ok(RidgeSolver::GaussJordan),
            other => Err(FarecastError::InvalidParameter {
                name: "solver".to_string(),
                value: other.to_string(),
                reason: "expected 'auto', 'cholesky' or 'gauss_jordan'".to_string(),
            }),
        }
    }
}

/// Ridge (L2-regularized) least squares; `alpha = 0` gives ordinary least squares
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    /// Fitted coefficients (weights)
    pub coefficients: Option<Array1<f64>>,
    /// Fitted intercept (bias)
    pub intercept: Option<f64>,
    pub fit_intercept: bool,
    /// Regularization strength (L2)
    pub alpha: f64,
    pub solver: RidgeSolver,
    pub is_fitted: bool,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl RidgeRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            fit_intercept: true,
            alpha: 1.0,
            solver: RidgeSolver::Cholesky,
            is_fitted: false,
        }
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_solver(mut self, solver: RidgeSolver) -> Self {
        self.solver = solver;
        self
    }

    /// Fit the model to training data
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples != y.len() {
            return Err(FarecastError::ShapeError {
                expected: format!("y length = {}", n_samples),
                actual: format!("y length = {}", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(FarecastError::TrainingError("no training samples".to_string()));
        }
        if self.alpha < 0.0 {
            return Err(FarecastError::InvalidParameter {
                name: "alpha".to_string(),
                value: self.alpha.to_string(),
                reason: "must be non-negative".to_string(),
            });
        }

        // Center data if fitting intercept
        let (x_work, y_work, x_mean, y_mean) = if self.fit_intercept {
            let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_features));
            let y_mean = y.mean().unwrap_or(0.0);
            let x_centered = x - &x_mean.clone().insert_axis(Axis(0));
            let y_centered = y - y_mean;
            (x_centered, y_centered, x_mean, y_mean)
        } else {
            (x.clone(), y.clone(), Array1::zeros(n_features), 0.0)
        };

        // (X^T X + alpha*I) w = X^T y
        let mut xtx = x_work.t().dot(&x_work);
        for i in 0..n_features {
            xtx[[i, i]] += self.alpha;
        }
        let xty = x_work.t().dot(&y_work);

        let solved = match self.solver {
            RidgeSolver::Cholesky => cholesky_solve(&xtx, &xty)
                .or_else(|| matrix_inverse(&xtx).map(|inv| inv.dot(&xty))),
            RidgeSolver::GaussJordan => matrix_inverse(&xtx).map(|inv| inv.dot(&xty)),
        };
        let coefficients = solved.ok_or_else(|| {
            FarecastError::ComputationError("Matrix is singular, cannot solve normal equations".to_string())
        })?;
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(FarecastError::ComputationError(
                "non-finite coefficients".to_string(),
            ));
        }

        self.intercept = Some(if self.fit_intercept {
            y_mean - coefficients.dot(&x_mean)
        } else {
            0.0
        });
        self.coefficients = Some(coefficients);
        self.is_fitted = true;
        Ok(self)
    }

    /// Make predictions
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(FarecastError::ModelNotFitted)?;
        if x.ncols() != coefficients.len() {
            return Err(FarecastError::ShapeError {
                expected: format!("{} features", coefficients.len()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(x.dot(coefficients) + self.intercept.unwrap_or(0.0))
    }
}

/// Predicts a single constant: the training mean, or a fixed value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanRegressor {
    pub value: Option<f64>,
    pub n_features: usize,
}

impl MeanRegressor {
    pub fn new() -> Self {
        Self { value: None, n_features: 0 }
    }

    /// An already-fitted regressor returning `value` for every row
    pub fn constant(value: f64, n_features: usize) -> Self {
        Self { value: Some(value), n_features }
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        if x.nrows() != y.len() {
            return Err(FarecastError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        let mean = y.mean().ok_or_else(|| FarecastError::TrainingError("no training samples".to_string()))?;
        self.value = Some(mean);
        self.n_features = x.ncols();
        Ok(self)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let value = self.value.ok_or(FarecastError::ModelNotFitted)?;
        if x.ncols() != self.n_features {
            return Err(FarecastError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(Array1::from_elem(x.nrows(), value))
    }
}

impl Default for MeanRegressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ols_recovers_line() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![3.0, 5.0, 7.0, 9.0, 11.0];
        let mut model = RidgeRegression::new().with_alpha(0.0);
        model.fit(&x, &y).unwrap();

        let coef = model.coefficients.as_ref().unwrap();
        assert!((coef[0] - 2.0).abs() < 1e-8);
        assert!((model.intercept.unwrap() - 1.0).abs() < 1e-8);

        let pred = model.predict(&array![[6.0]]).unwrap();
        assert!((pred[0] - 13.0).abs() < 1e-8);
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let x = array![[1.0, 0.5], [2.0, 1.0], [3.0, 1.4], [4.0, 2.1], [5.0, 2.4]];
        let y = array![2.0, 4.1, 6.0, 8.2, 9.9];
        let mut ols = RidgeRegression::new().with_alpha(0.0);
        let mut ridge = RidgeRegression::new().with_alpha(10.0);
        ols.fit(&x, &y).unwrap();
        ridge.fit(&x, &y).unwrap();

        let norm = |m: &RidgeRegression| m.coefficients.as_ref().unwrap().mapv(|c| c * c).sum();
        assert!(norm(&ridge) < norm(&ols));
    }

    #[test]
    fn test_solvers_agree() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 4.0], [4.0, 3.0]];
        let y = array![5.0, 4.0, 11.0, 10.0];
        let mut a = RidgeRegression::new().with_solver(RidgeSolver::Cholesky);
        let mut b = RidgeRegression::new().with_solver(RidgeSolver::GaussJordan);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        let diff = a.coefficients.unwrap() - b.coefficients.unwrap();
        assert!(diff.iter().all(|d| d.abs() < 1e-8));
    }

    #[test]
    fn test_predict_requires_fit() {
        let model = RidgeRegression::new();
        assert!(matches!(model.predict(&array![[1.0]]), Err(FarecastError::ModelNotFitted)));
        assert!(RidgeSolver::from_name("lbfgs").is_err());
    }

    #[test]
    fn test_mean_regressor() {
        let x = array![[0.0], [1.0], [2.0]];
        let mut model = MeanRegressor::new();
        model.fit(&x, &array![1.0, 2.0, 6.0]).unwrap();
        assert_eq!(model.predict(&x).unwrap(), array![3.0, 3.0, 3.0]);
        assert!(model.predict(&array![[0.0, 1.0]]).is_err());
    }
}
