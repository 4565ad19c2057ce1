//! Elbow detection on a dispersion curve

use crate::error::{FarecastError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Picks a partition count from `(k, inertia)` points sorted by `k`
pub trait ElbowDetector: Send + Sync + Debug {
    fn detect(&self, curve: &[(usize, f64)]) -> Result<usize>;

    /// A detector that ignores the curve returns its answer here so the
    /// curve is never computed
    fn fixed(&self) -> Option<usize> {
        None
    }
}

/// Point of the curve farthest below the chord joining its endpoints,
/// with both axes scaled to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaxDistanceElbow {
    /// Normalised distances below this are not an elbow
    pub min_relative_distance: f64,
}

impl Default for MaxDistanceElbow {
    fn default() -> Self {
        Self { min_relative_distance: 0.05 }
    }
}

impl ElbowDetector for MaxDistanceElbow {
    fn detect(&self, curve: &[(usize, f64)]) -> Result<usize> {
        if curve.len() < 3 {
            return Err(FarecastError::NoElbowFound(format!(
                "need at least 3 points on the dispersion curve, got {}",
                curve.len()
            )));
        }
        let (k_first, i_first) = curve[0];
        let (k_last, i_last) = curve[curve.len() - 1];
        if !(i_first > i_last) || k_last <= k_first {
            return Err(FarecastError::NoElbowFound(
                "dispersion does not decrease with k".to_string(),
            ));
        }

        let k_span = (k_last - k_first) as f64;
        let i_span = i_first - i_last;
        let mut best: Option<(usize, f64)> = None;
        for &(k, inertia) in &curve[1..curve.len() - 1] {
            let x = (k - k_first) as f64 / k_span;
            let y = (inertia - i_last) / i_span;
            // signed distance below the chord x + y = 1
            let d = (1.0 - x - y) / std::f64::consts::SQRT_2;
            if best.map_or(true, |(_, bd)| d > bd) {
                best = Some((k, d));
            }
        }

        match best {
            Some((k, d)) if d >= self.min_relative_distance => Ok(k),
            Some((_, d)) => Err(FarecastError::NoElbowFound(format!(
                "largest normalised distance {:.4} is below {}",
                d, self.min_relative_distance
            ))),
            None => Err(FarecastError::NoElbowFound("empty curve interior".to_string())),
        }
    }
}

/// Always answers `k`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedElbow(pub usize);

impl ElbowDetector for FixedElbow {
    fn detect(&self, _curve: &[(usize, f64)]) -> Result<usize> {
        Ok(self.0)
    }

    fn fixed(&self) -> Option<usize> {
        Some(self.0)
    }
}
