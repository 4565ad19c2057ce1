//! Cross-validation and hold-out splitting

use crate::error::{FarecastError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Cross-validation strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CVStrategy {
    /// K-Fold cross-validation
    KFold { n_splits: usize, shuffle: bool },
    /// Single shuffled train/test split; the test share is rounded up
    HoldOut { test_ratio: f64 },
}

impl Default for CVStrategy {
    fn default() -> Self {
        CVStrategy::KFold { n_splits: 5, shuffle: true }
    }
}

/// A single train/test split
#[derive(Debug, Clone)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Cross-validation splitter
pub struct CrossValidator {
    strategy: CVStrategy,
    random_state: Option<u64>,
}

impl CrossValidator {
    /// Create a new cross-validator
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            strategy,
            random_state: None,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Generate train/test splits
    pub fn split(&self, n_samples: usize) -> Result<Vec<CVSplit>> {
        match &self.strategy {
            CVStrategy::KFold { n_splits, shuffle } => {
                self.k_fold_split(n_samples, *n_splits, *shuffle)
            }
            CVStrategy::HoldOut { test_ratio } => {
                Ok(vec![self.hold_out_split(n_samples, *test_ratio)?])
            }
        }
    }

    fn rng(&self) -> ChaCha8Rng {
        match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn k_fold_split(&self, n_samples: usize, n_splits: usize, shuffle: bool) -> Result<Vec<CVSplit>> {
        if n_splits < 2 {
            return Err(FarecastError::ValidationError(
                "n_splits must be at least 2".to_string()
            ));
        }
        if n_samples < n_splits {
            return Err(FarecastError::ValidationError(
                format!("n_samples ({}) must be >= n_splits ({})", n_samples, n_splits)
            ));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if shuffle {
            indices.shuffle(&mut self.rng());
        }

        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;
        let mut splits = Vec::with_capacity(n_splits);
        let mut current = 0;

        for fold_idx in 0..n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            let test_indices = indices[current..current + fold_size].to_vec();
            let train_indices = indices[..current]
                .iter()
                .chain(indices[current + fold_size..].iter())
                .copied()
                .collect();

            splits.push(CVSplit {
                train_indices,
                test_indices,
                fold_idx,
            });
            current += fold_size;
        }

        Ok(splits)
    }

    fn hold_out_split(&self, n_samples: usize, test_ratio: f64) -> Result<CVSplit> {
        if !(test_ratio > 0.0 && test_ratio < 1.0) {
            return Err(FarecastError::InvalidParameter {
                name: "test_ratio".to_string(),
                value: test_ratio.to_string(),
                reason: "must lie strictly between 0 and 1".to_string(),
            });
        }
        let n_test = (n_samples as f64 * test_ratio).ceil() as usize;
        if n_test == 0 || n_test >= n_samples {
            return Err(FarecastError::ValidationError(format!(
                "cannot hold out {} of {} samples", n_test, n_samples
            )));
        }

        let mut indices: Vec<usize> = (0..n_samples).collect();
        indices.shuffle(&mut self.rng());
        let test_indices = indices[..n_test].to_vec();
        let train_indices = indices[n_test..].to_vec();
        Ok(CVSplit {
            train_indices,
            test_indices,
            fold_idx: 0,
        })
    }
}

/// Seeded shuffled train/test split
pub fn train_test_split(n_samples: usize, test_ratio: f64, seed: u64) -> Result<CVSplit> {
    CrossValidator::new(CVStrategy::HoldOut { test_ratio })
        .with_random_state(seed)
        .hold_out_split(n_samples, test_ratio)
}
