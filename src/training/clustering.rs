//! K-Means clustering
//!
//! Unsupervised: takes X only. `fit()` learns centroids, `predict()` assigns
//! new rows to the nearest one.

use crate::error::{FarecastError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

// ═══════════════════════════════════════════════════════════════════════════
//  K-Means Clustering
// ═══════════════════════════════════════════════════════════════════════════

/// K-Means clustering with k-means++ initialization
///
/// After fitting, every cluster owns at least one training row and clusters
/// are numbered in lexicographic order of their centroids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeans {
    pub n_clusters: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub random_state: Option<u64>,
    /// Fitted cluster centroids (n_clusters × n_features)
    centroids: Option<Array2<f64>>,
    /// Cluster labels assigned during fit
    pub labels: Option<Vec<usize>>,
    /// Sum of squared distances to the assigned centroid (inertia)
    pub inertia: Option<f64>,
    /// Lloyd iterations run by the last fit
    pub n_iter: usize,
    pub is_fitted: bool,
}

impl Default for KMeans {
    fn default() -> Self {
        Self::new(3)
    }
}

impl KMeans {
    pub fn new(n_clusters: usize) -> Self {
        Self {
            n_clusters,
            max_iter: 300,
            tol: 1e-4,
            random_state: Some(42),
            centroids: None,
            labels: None,
            inertia: None,
            n_iter: 0,
            is_fitted: false,
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// K-means++ initialization: pick centroids spread apart
    fn kmeans_pp_init(x: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
        let n_samples = x.nrows();
        let mut centroids = Array2::zeros((k, x.ncols()));

        let first = (rng.next_u64() as usize) % n_samples;
        centroids.row_mut(0).assign(&x.row(first));

        for c in 1..k {
            // Distance to nearest existing centroid
            let dists: Vec<f64> = (0..n_samples)
                .map(|i| {
                    (0..c)
                        .map(|j| euclidean_sq(&x.row(i), &centroids.row(j)))
                        .fold(f64::MAX, f64::min)
                })
                .collect();

            // Weighted random selection proportional to D²
            let total: f64 = dists.iter().sum();
            if total <= 0.0 {
                let idx = (rng.next_u64() as usize) % n_samples;
                centroids.row_mut(c).assign(&x.row(idx));
                continue;
            }

            let r = (rng.next_u64() as f64 / u64::MAX as f64) * total;
            let mut cumulative = 0.0;
            let mut chosen = n_samples - 1;
            for (i, &d) in dists.iter().enumerate() {
                cumulative += d;
                if cumulative >= r {
                    chosen = i;
                    break;
                }
            }
            centroids.row_mut(c).assign(&x.row(chosen));
        }

        centroids
    }

    fn nearest(row: &ArrayView1<f64>, centroids: &Array2<f64>) -> (usize, f64) {
        let mut best_c = 0;
        let mut best_dist = f64::MAX;
        for (c, centroid) in centroids.rows().into_iter().enumerate() {
            let d = euclidean_sq(row, &centroid);
            if d < best_dist {
                best_dist = d;
                best_c = c;
            }
        }
        (best_c, best_dist)
    }

    fn update_centroids(x: &Array2<f64>, labels: &[usize], k: usize) -> (Array2<f64>, Vec<usize>) {
        let mut centroids = Array2::zeros((k, x.ncols()));
        let mut counts = vec![0usize; k];
        for (i, &c) in labels.iter().enumerate() {
            counts[c] += 1;
            let mut row = centroids.row_mut(c);
            row += &x.row(i);
        }
        for c in 0..k {
            if counts[c] > 0 {
                let mut row = centroids.row_mut(c);
                row /= counts[c] as f64;
            }
        }
        (centroids, counts)
    }

    /// Give every empty cluster one member.
    ///
    /// The row farthest from its own centroid, taken from a cluster that keeps
    /// at least one member, moves into the empty cluster.
    fn fill_empty_clusters(x: &Array2<f64>, labels: &mut [usize], centroids: &mut Array2<f64>, k: usize) {
        loop {
            let (updated, counts) = Self::update_centroids(x, labels, k);
            let Some(empty) = counts.iter().position(|&n| n == 0) else {
                *centroids = updated;
                return;
            };

            let donor = (0..labels.len())
                .filter(|&i| counts[labels[i]] >= 2)
                .max_by(|&a, &b| {
                    let da = euclidean_sq(&x.row(a), &updated.row(labels[a]));
                    let db = euclidean_sq(&x.row(b), &updated.row(labels[b]));
                    da.partial_cmp(&db).unwrap_or(Ordering::Equal).then(b.cmp(&a))
                });
            match donor {
                Some(i) => labels[i] = empty,
                // fewer rows than clusters, rejected before fitting
                None => {
                    *centroids = updated;
                    return;
                }
            }
        }
    }

    /// Renumber clusters by lexicographic centroid order
    fn canonicalize(labels: &mut [usize], centroids: &Array2<f64>) -> Array2<f64> {
        let k = centroids.nrows();
        let mut order: Vec<usize> = (0..k).collect();
        order.sort_by(|&a, &b| {
            centroids
                .row(a)
                .iter()
                .zip(centroids.row(b).iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
                .then(a.cmp(&b))
        });
        let mut rank = vec![0usize; k];
        for (new, &old) in order.iter().enumerate() {
            rank[old] = new;
        }
        for l in labels.iter_mut() {
            *l = rank[*l];
        }
        centroids.select(ndarray::Axis(0), &order)
    }

    /// Fit the model (unsupervised — no y needed)
    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        let n_samples = x.nrows();
        if self.n_clusters == 0 {
            return Err(FarecastError::InvalidParameter {
                name: "n_clusters".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if n_samples < self.n_clusters {
            return Err(FarecastError::TrainingError(format!(
                "n_samples ({}) < n_clusters ({})", n_samples, self.n_clusters
            )));
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(FarecastError::TrainingError(
                "input contains non-finite values".to_string(),
            ));
        }

        let k = self.n_clusters;
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state.unwrap_or(42));
        let mut centroids = Self::kmeans_pp_init(x, k, &mut rng);
        let mut labels = vec![usize::MAX; n_samples];
        self.n_iter = 0;

        for _ in 0..self.max_iter {
            self.n_iter += 1;
            // Assignment step
            let new_labels: Vec<usize> = (0..n_samples)
                .into_par_iter()
                .map(|i| Self::nearest(&x.row(i), &centroids).0)
                .collect();

            let changed = new_labels.iter().zip(labels.iter()).filter(|(a, b)| a != b).count();
            labels = new_labels;

            // Update step
            let (mut new_centroids, counts) = Self::update_centroids(x, &labels, k);
            for c in 0..k {
                if counts[c] == 0 {
                    // Empty cluster, reseed from a random row
                    let idx = (rng.next_u64() as usize) % n_samples;
                    new_centroids.row_mut(c).assign(&x.row(idx));
                }
            }

            let shift: f64 = centroids.iter().zip(new_centroids.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            centroids = new_centroids;

            if changed == 0 || shift < self.tol {
                break;
            }
        }

        Self::fill_empty_clusters(x, &mut labels, &mut centroids, k);
        let centroids = Self::canonicalize(&mut labels, &centroids);

        let inertia: f64 = labels
            .iter()
            .enumerate()
            .map(|(i, &c)| euclidean_sq(&x.row(i), &centroids.row(c)))
            .sum();

        self.centroids = Some(centroids);
        self.labels = Some(labels);
        self.inertia = Some(inertia);
        self.is_fitted = true;
        Ok(self)
    }

    /// Predict cluster labels for new data
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<usize>> {
        let centroids = self.centroids.as_ref()
            .ok_or(FarecastError::ModelNotFitted)?;
        if x.ncols() != centroids.ncols() {
            return Err(FarecastError::ShapeError {
                expected: format!("{} features", centroids.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }

        let labels: Vec<usize> = (0..x.nrows())
            .into_par_iter()
            .map(|i| Self::nearest(&x.row(i), centroids).0)
            .collect();
        Ok(Array1::from_vec(labels))
    }

    /// Nearest centroid for a single row
    pub fn predict_row(&self, row: &ArrayView1<f64>) -> Result<usize> {
        let centroids = self.centroids.as_ref()
            .ok_or(FarecastError::ModelNotFitted)?;
        if row.len() != centroids.ncols() {
            return Err(FarecastError::ShapeError {
                expected: format!("{} features", centroids.ncols()),
                actual: format!("{} features", row.len()),
            });
        }
        Ok(Self::nearest(row, centroids).0)
    }

    /// Get cluster centroids
    pub fn centroids(&self) -> Option<&Array2<f64>> {
        self.centroids.as_ref()
    }
}

fn euclidean_sq(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
