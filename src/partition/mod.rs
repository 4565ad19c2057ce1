//! Unsupervised partitioning of the feature space
//!
//! The [`Partitioner`] chooses a partition count from the k-means
//! dispersion curve, assigns dense canonical labels, and produces a
//! [`PartitionModel`] that routes new rows to their nearest centroid without
//! ever refitting.

mod elbow;

pub use elbow::{ElbowDetector, FixedElbow, MaxDistanceElbow};

use crate::error::{FarecastError, Result};
use crate::training::KMeans;
use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionerConfig {
    pub min_k: usize,
    /// Capped at the row count
    pub max_k: usize,
    pub seed: u64,
    pub max_iter: usize,
    /// Minimum normalised elbow distance
    pub elbow_threshold: f64,
    /// Used when no elbow is found; `None` makes that fatal
    pub fallback_k: Option<usize>,
    /// Skip elbow detection entirely
    pub forced_k: Option<usize>,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            min_k: 2,
            max_k: 10,
            seed: 42,
            max_iter: 300,
            elbow_threshold: 0.05,
            fallback_k: None,
            forced_k: None,
        }
    }
}

impl PartitionerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_k_range(mut self, min_k: usize, max_k: usize) -> Self {
        self.min_k = min_k;
        self.max_k = max_k;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fallback_k(mut self, k: Option<usize>) -> Self {
        self.fallback_k = k;
        self
    }

    pub fn with_forced_k(mut self, k: Option<usize>) -> Self {
        self.forced_k = k;
        self
    }

    pub fn with_elbow_threshold(mut self, threshold: f64) -> Self {
        self.elbow_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_k == 0 || self.min_k > self.max_k {
            return Err(FarecastError::ConfigError(format!(
                "invalid k range [{}, {}]",
                self.min_k, self.max_k
            )));
        }
        if matches!(self.forced_k, Some(0)) || matches!(self.fallback_k, Some(0)) {
            return Err(FarecastError::ConfigError("k must be at least 1".to_string()));
        }
        if self.max_iter == 0 {
            return Err(FarecastError::ConfigError("max_iter must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Persisted partitioner artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionModel {
    kmeans: KMeans,
    n_features: usize,
    /// Training rows per partition label
    partition_sizes: Vec<usize>,
    fitted_at: DateTime<Utc>,
}

impl PartitionModel {
    pub fn k(&self) -> usize {
        self.partition_sizes.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn partition_sizes(&self) -> &[usize] {
        &self.partition_sizes
    }

    pub fn fitted_at(&self) -> DateTime<Utc> {
        self.fitted_at
    }

    pub fn centroids(&self) -> Option<&Array2<f64>> {
        self.kmeans.centroids()
    }

    /// Label with the most training rows; lowest label on ties
    pub fn largest_partition(&self) -> Option<usize> {
        self.partition_sizes
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, usize)>, (label, &size)| match best {
                Some((_, s)) if s >= size => best,
                _ => Some((label, size)),
            })
            .map(|(label, _)| label)
    }

    /// Nearest stored centroid
    pub fn predict_partition(&self, row: &ArrayView1<f64>) -> Result<usize> {
        if row.len() != self.n_features {
            return Err(FarecastError::ClusteringFailed(format!(
                "row has {} features, partitioner was fitted on {}",
                row.len(),
                self.n_features
            )));
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(FarecastError::ClusteringFailed("row contains non-finite values".to_string()));
        }
        self.kmeans
            .predict_row(row)
            .map_err(|e| FarecastError::ClusteringFailed(e.to_string()))
    }

    /// Labels for every row of `x`
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        x.rows().into_iter().map(|row| self.predict_partition(&row)).collect()
    }
}

/// Free-function form of [`PartitionModel::predict_partition`]
pub fn predict_partition(model: &PartitionModel, row: &ArrayView1<f64>) -> Result<usize> {
    model.predict_partition(row)
}

/// Chooses `k` and fits the partition model
#[derive(Debug, Clone)]
pub struct Partitioner {
    config: PartitionerConfig,
    detector: Arc<dyn ElbowDetector>,
}

impl Default for Partitioner {
    fn default() -> Self {
        Self::new(PartitionerConfig::default())
    }
}

impl Partitioner {
    pub fn new(config: PartitionerConfig) -> Self {
        let detector: Arc<dyn ElbowDetector> = match config.forced_k {
            Some(k) => Arc::new(FixedElbow(k)),
            None => Arc::new(MaxDistanceElbow {
                min_relative_distance: config.elbow_threshold,
            }),
        };
        Self { config, detector }
    }

    pub fn with_detector(mut self, detector: Arc<dyn ElbowDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &PartitionerConfig {
        &self.config
    }

    fn check_input(x: &Array2<f64>) -> Result<()> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(FarecastError::ClusteringFailed(format!(
                "cannot partition a {}x{} matrix",
                x.nrows(),
                x.ncols()
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(FarecastError::ClusteringFailed("input contains non-finite values".to_string()));
        }
        Ok(())
    }

    fn kmeans(&self, k: usize) -> KMeans {
        KMeans::new(k)
            .with_max_iter(self.config.max_iter)
            .with_random_state(self.config.seed)
    }

    /// `(k, inertia)` for every k in the configured range
    pub fn dispersion_curve(&self, x: &Array2<f64>) -> Result<Vec<(usize, f64)>> {
        Self::check_input(x)?;
        let max_k = self.config.max_k.min(x.nrows());
        if max_k < self.config.min_k {
            return Ok(Vec::new());
        }
        (self.config.min_k..=max_k)
            .into_par_iter()
            .map(|k| {
                let mut km = self.kmeans(k);
                km.fit(x).map_err(|e| FarecastError::ClusteringFailed(e.to_string()))?;
                let inertia = km.inertia.unwrap_or(0.0);
                debug!(k, inertia, "dispersion point");
                Ok((k, inertia))
            })
            .collect()
    }

    /// Partition count from the elbow of the dispersion curve
    pub fn choose_k(&self, x: &Array2<f64>) -> Result<usize> {
        if let Some(k) = self.detector.fixed() {
            return Ok(k);
        }
        let curve = self.dispersion_curve(x)?;
        self.detector.detect(&curve)
    }

    /// `choose_k`, falling back to the configured `fallback_k`
    pub fn resolve_k(&self, x: &Array2<f64>) -> Result<usize> {
        match (self.choose_k(x), self.config.fallback_k) {
            (Err(FarecastError::NoElbowFound(reason)), Some(k)) => {
                warn!(%reason, fallback_k = k, "no elbow found, using fallback");
                Ok(k)
            }
            (Err(FarecastError::NoElbowFound(reason)), None) => Err(FarecastError::NoElbowFound(format!(
                "{}; set a fallback or force k",
                reason
            ))),
            (other, _) => other,
        }
    }

    /// Fit `k` clusters; labels are dense and in canonical order
    pub fn assign(&self, x: &Array2<f64>, k: usize) -> Result<(PartitionModel, Vec<usize>)> {
        Self::check_input(x)?;
        if k == 0 || x.nrows() < k {
            return Err(FarecastError::ClusteringFailed(format!(
                "cannot form {} partitions from {} rows",
                k,
                x.nrows()
            )));
        }

        let mut km = self.kmeans(k);
        km.fit(x).map_err(|e| FarecastError::ClusteringFailed(e.to_string()))?;
        let labels = km
            .labels
            .clone()
            .ok_or_else(|| FarecastError::ClusteringFailed("k-means produced no labels".to_string()))?;

        let mut sizes = vec![0usize; k];
        for &l in &labels {
            sizes[l] += 1;
        }
        info!(k, sizes = ?sizes, inertia = km.inertia.unwrap_or(0.0), "partitions assigned");

        let model = PartitionModel {
            kmeans: km,
            n_features: x.ncols(),
            partition_sizes: sizes,
            fitted_at: Utc::now(),
        };
        Ok((model, labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Three tight blobs along the first axis
    fn blobs(per: usize) -> Array2<f64> {
        Array2::from_shape_fn((3 * per, 2), |(i, j)| {
            let blob = (i % 3) as f64;
            let jitter = ((i * 7 + j * 3) % 5) as f64 * 0.01;
            if j == 0 { blob * 10.0 + jitter } else { jitter }
        })
    }

    #[test]
    fn test_choose_k_finds_three_blobs() {
        let x = blobs(20);
        let p = Partitioner::new(PartitionerConfig::new().with_k_range(2, 8));
        assert_eq!(p.choose_k(&x).unwrap(), 3);
    }

    #[test]
    fn test_assign_dense_canonical_deterministic() {
        let x = blobs(10);
        let p = Partitioner::default();
        let (model, labels) = p.assign(&x, 3).unwrap();
        let (_, again) = p.assign(&x, 3).unwrap();
        assert_eq!(labels, again);
        assert_eq!(model.k(), 3);
        assert!(model.partition_sizes().iter().all(|&s| s > 0));
        // canonical order follows the first coordinate of the centroids
        assert_eq!(labels[0], 0);
        assert_eq!(labels[1], 1);
        assert_eq!(labels[2], 2);
    }

    #[test]
    fn test_predict_partition_never_refits() {
        let x = blobs(10);
        let (model, labels) = Partitioner::default().assign(&x, 3).unwrap();
        for (i, row) in x.rows().into_iter().enumerate() {
            assert_eq!(predict_partition(&model, &row).unwrap(), labels[i]);
        }
        let wide = ndarray::array![1.0, 2.0, 3.0];
        assert!(matches!(model.predict_partition(&wide.view()), Err(FarecastError::ClusteringFailed(_))));
        let nan = ndarray::array![f64::NAN, 0.0];
        assert!(model.predict_partition(&nan.view()).is_err());
    }

    #[test]
    fn test_assign_errors() {
        let x = blobs(1);
        let p = Partitioner::default();
        assert!(matches!(p.assign(&x, 4), Err(FarecastError::ClusteringFailed(_))));
        let mut bad = x.clone();
        bad[[0, 0]] = f64::INFINITY;
        assert!(matches!(p.assign(&bad, 2), Err(FarecastError::ClusteringFailed(_))));
    }

    #[test]
    fn test_fallback_and_forced() {
        // a single tight blob has no elbow
        let x = Array2::from_shape_fn((30, 2), |(i, j)| ((i + j) % 4) as f64 * 0.001);
        let strict = Partitioner::new(PartitionerConfig::new().with_k_range(2, 2));
        assert!(matches!(strict.resolve_k(&x), Err(FarecastError::NoElbowFound(_))));

        let lenient = Partitioner::new(PartitionerConfig::new().with_k_range(2, 2).with_fallback_k(Some(2)));
        assert_eq!(lenient.resolve_k(&x).unwrap(), 2);

        let forced = Partitioner::new(PartitionerConfig::new().with_forced_k(Some(5)));
        assert_eq!(forced.choose_k(&x).unwrap(), 5);
    }

    #[test]
    fn test_largest_partition() {
        let x = Array2::from_shape_fn((7, 1), |(i, _)| if i < 5 { 0.0 + i as f64 * 0.01 } else { 100.0 });
        let (model, _) = Partitioner::default().assign(&x, 2).unwrap();
        assert_eq!(model.largest_partition(), Some(0));
    }
}
