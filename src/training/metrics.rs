//! Regression metrics

use crate::error::{FarecastError, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Held-out regression metrics for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Squared Error
    pub rmse: f64,
    /// Mean Absolute Error
    pub mae: f64,
    /// R-squared
    pub r2: f64,
    /// Number of evaluated samples
    pub n_samples: usize,
}

impl RegressionMetrics {
    /// Compute regression metrics
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<Self> {
        check_lengths(y_true, y_pred)?;
        let n = y_true.len() as f64;
        let errors: Vec<f64> = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(t, p)| t - p)
            .collect();

        let mse: f64 = errors.iter().map(|e| e * e).sum::<f64>() / n;
        let mae: f64 = errors.iter().map(|e| e.abs()).sum::<f64>() / n;

        Ok(Self {
            mse,
            rmse: mse.sqrt(),
            mae,
            r2: r2_score(y_true, y_pred)?,
            n_samples: y_true.len(),
        })
    }
}

fn check_lengths(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(FarecastError::ShapeError {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", y_pred.len()),
        });
    }
    if y_true.is_empty() {
        return Err(FarecastError::ValidationError(
            "cannot score an empty prediction set".to_string(),
        ));
    }
    Ok(())
}

/// Coefficient of determination.
///
/// A constant target scores 1.0 when predicted exactly and 0.0 otherwise.
pub fn r2_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let mean = y_true.mean().unwrap_or(0.0);
    let ss_res: f64 = y_true.iter().zip(y_pred.iter()).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

/// Adjusted R²: `1 - (1 - r2) * (n - 1) / (n - m - 1)`.
///
/// `n` is the number of scored samples and `m` the feature count. Fails with
/// `InsufficientSamplesForAdjustedScore` when `n - m - 1` is not positive.
pub fn adjusted_r2(r2: f64, n: usize, m: usize) -> Result<f64> {
    if n <= m + 1 {
        return Err(FarecastError::InsufficientSamplesForAdjustedScore { n, m });
    }
    let n = n as f64;
    let m = m as f64;
    Ok(1.0 - (1.0 - r2) * (n - 1.0) / (n - m - 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_prediction() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let m = RegressionMetrics::compute(&y, &y).unwrap();
        assert_eq!(m.mse, 0.0);
        assert_eq!(m.r2, 1.0);
    }

    #[test]
    fn test_mean_prediction_scores_zero() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let pred = array![2.5, 2.5, 2.5, 2.5];
        assert!(r2_score(&y, &pred).unwrap().abs() < 1e-12);
        let m = RegressionMetrics::compute(&y, &pred).unwrap();
        assert!((m.mae - 1.0).abs() < 1e-12);
        assert!((m.mse - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_constant_target() {
        let y = array![3.0, 3.0];
        assert_eq!(r2_score(&y, &array![3.0, 3.0]).unwrap(), 1.0);
        assert_eq!(r2_score(&y, &array![2.0, 3.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(r2_score(&array![1.0, 2.0], &array![1.0]).is_err());
    }

    #[test]
    fn test_adjusted_r2() {
        // n = 10, m = 3: 1 - 0.2 * 9 / 6
        let adj = adjusted_r2(0.8, 10, 3).unwrap();
        assert!((adj - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_adjusted_r2_guard() {
        // n - m - 1 == 0
        let err = adjusted_r2(0.9, 5, 4).unwrap_err();
        assert!(matches!(
            err,
            FarecastError::InsufficientSamplesForAdjustedScore { n: 5, m: 4 }
        ));
        assert!(adjusted_r2(0.9, 3, 4).is_err());
    }
}
