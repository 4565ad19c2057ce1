//! Cross-validated hyperparameter tuning for one candidate

use super::search_space::ParamSet;
use crate::error::{FarecastError, Result};
use crate::selection::Candidate;
use crate::training::cross_validation::{CVSplit, CVStrategy, CrossValidator};
use crate::training::metrics::r2_score;
use crate::training::Regressor;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How combinations are drawn from the search space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchStrategy {
    /// Every combination of the grid
    Grid,
    /// `n_iter` distinct combinations sampled from the grid
    Random { n_iter: usize },
}

impl Default for SearchStrategy {
    fn default() -> Self {
        SearchStrategy::Random { n_iter: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    pub cv_folds: usize,
    pub strategy: SearchStrategy,
    pub seed: u64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            cv_folds: 5,
            strategy: SearchStrategy::default(),
            seed: 42,
        }
    }
}

impl TunerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Winning combination refit on the whole training split
#[derive(Debug, Clone)]
pub struct TunedModel {
    pub candidate: String,
    pub params: ParamSet,
    /// Mean cross-validated R² of the winning combination
    pub cv_score: f64,
    pub model: Regressor,
    pub n_evaluated: usize,
    pub n_excluded: usize,
}

/// Searches a candidate's space with K-fold CV and refits the winner
#[derive(Debug, Clone, Default)]
pub struct CandidateModelTuner {
    config: TunerConfig,
}

impl CandidateModelTuner {
    pub fn new(config: TunerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    /// Combinations in evaluation order
    pub fn combinations(&self, candidate: &dyn Candidate) -> Result<Vec<ParamSet>> {
        let space = candidate.search_space();
        space.validate(candidate.name())?;
        Ok(match self.config.strategy {
            SearchStrategy::Grid => space.grid(),
            SearchStrategy::Random { n_iter } => {
                let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
                space.sample(n_iter, &mut rng)
            }
        })
    }

    /// Tune `candidate` on the training split only
    pub fn tune(&self, candidate: &dyn Candidate, x: &Array2<f64>, y: &Array1<f64>) -> Result<TunedModel> {
        let name = candidate.name().to_string();
        let failed = |reason: String| FarecastError::TuningFailed {
            candidate: name.clone(),
            reason,
        };

        if x.nrows() != y.len() {
            return Err(FarecastError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        let combos = self.combinations(candidate)?;
        if combos.is_empty() {
            return Err(FarecastError::InvalidSearchSpace {
                candidate: name,
                reason: "strategy selected no combinations".to_string(),
            });
        }
        let n = x.nrows();
        if n < 2 {
            return Err(failed(format!("{} training rows, need at least 2", n)));
        }

        let folds = self.config.cv_folds.clamp(2, n);
        let splits = CrossValidator::new(CVStrategy::KFold { n_splits: folds, shuffle: true })
            .with_random_state(self.config.seed)
            .split(n)?;

        // collect preserves evaluation order for the tie-break
        let scored: Vec<std::result::Result<f64, String>> = combos
            .par_iter()
            .map(|params| cross_validate(candidate, params, x, y, &splits))
            .collect();

        let mut best: Option<(usize, f64)> = None;
        let mut n_excluded = 0;
        for (idx, outcome) in scored.iter().enumerate() {
            match outcome {
                Ok(score) => {
                    debug!(candidate = %name, params = %combos[idx], score, "combination scored");
                    if best.map_or(true, |(_, s)| *score > s) {
                        best = Some((idx, *score));
                    }
                }
                Err(reason) => {
                    n_excluded += 1;
                    debug!(candidate = %name, params = %combos[idx], %reason, "combination excluded");
                }
            }
        }

        let (best_idx, cv_score) = best.ok_or_else(|| {
            failed(format!("all {} combinations failed cross-validation", combos.len()))
        })?;
        if n_excluded > 0 {
            warn!(candidate = %name, excluded = n_excluded, total = combos.len(), "some combinations were excluded");
        }

        let params = combos[best_idx].clone();
        let model = candidate
            .fit(&params, x, y)
            .map_err(|e| failed(format!("refit with {} failed: {}", params, e)))?;

        Ok(TunedModel {
            candidate: name,
            params,
            cv_score,
            model,
            n_evaluated: combos.len(),
            n_excluded,
        })
    }
}

/// Mean R² over the folds; any fold failure excludes the combination
fn cross_validate(
    candidate: &dyn Candidate,
    params: &ParamSet,
    x: &Array2<f64>,
    y: &Array1<f64>,
    splits: &[CVSplit],
) -> std::result::Result<f64, String> {
    let mut total = 0.0;
    for split in splits {
        let x_tr = x.select(Axis(0), &split.train_indices);
        let y_tr = y.select(Axis(0), &split.train_indices);
        let x_val = x.select(Axis(0), &split.test_indices);
        let y_val = y.select(Axis(0), &split.test_indices);

        let score = candidate
            .fit(params, &x_tr, &y_tr)
            .and_then(|model| model.predict(&x_val))
            .and_then(|pred| r2_score(&y_val, &pred))
            .map_err(|e| format!("fold {}: {}", split.fold_idx, e))?;
        if !score.is_finite() {
            return Err(format!("fold {}: non-finite score", split.fold_idx));
        }
        total += score;
    }
    Ok(total / splits.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::SearchSpace;
    use crate::selection::RidgeCandidate;
    use crate::training::RidgeRegression;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * (j + 2)) % 11) as f64);
        let y = x.column(0).mapv(|v| 3.0 * v) - x.column(1).mapv(|v| 0.5 * v) + 4.0;
        (x, y)
    }

    /// Scores well only for one alpha, fails for another
    struct Picky {
        fits: AtomicUsize,
    }

    impl Candidate for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        fn search_space(&self) -> SearchSpace {
            SearchSpace::new().float("alpha", &[-1.0, 0.0, 0.0])
        }

        fn fit(&self, params: &ParamSet, x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
            self.fits.fetch_add(1, Ordering::SeqCst);
            let mut m = RidgeRegression::new().with_alpha(params.f64("alpha")?);
            m.fit(x, y)?;
            Ok(Regressor::Ridge(m))
        }
    }

    #[test]
    fn test_grid_picks_first_best_and_excludes_failures() {
        let (x, y) = linear_data(30);
        let tuner = CandidateModelTuner::new(TunerConfig::new().with_strategy(SearchStrategy::Grid));
        let cand = Picky { fits: AtomicUsize::new(0) };
        let tuned = tuner.tune(&cand, &x, &y).unwrap();

        assert_eq!(tuned.n_evaluated, 3);
        assert_eq!(tuned.n_excluded, 1);
        assert_eq!(tuned.params.f64("alpha").unwrap(), 0.0);
        assert!(tuned.cv_score > 0.99);
    }

    #[test]
    fn test_random_search_is_seeded() {
        let (x, y) = linear_data(40);
        let tuner = CandidateModelTuner::new(TunerConfig::new().with_strategy(SearchStrategy::Random { n_iter: 4 }));
        let a = tuner.tune(&RidgeCandidate, &x, &y).unwrap();
        let b = tuner.tune(&RidgeCandidate, &x, &y).unwrap();
        assert_eq!(a.params, b.params);
        assert_eq!(a.n_evaluated, 4);
    }

    #[test]
    fn test_every_combination_failing() {
        struct Broken;
        impl Candidate for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn search_space(&self) -> SearchSpace {
                SearchSpace::new().int("n", &[1, 2])
            }
            fn fit(&self, _: &ParamSet, _: &Array2<f64>, _: &Array1<f64>) -> Result<Regressor> {
                Err(FarecastError::ComputationError("no".into()))
            }
        }
        let (x, y) = linear_data(20);
        let err = CandidateModelTuner::default().tune(&Broken, &x, &y).unwrap_err();
        assert!(matches!(err, FarecastError::TuningFailed { .. }));
    }

    #[test]
    fn test_empty_space_and_tiny_input() {
        struct Empty;
        impl Candidate for Empty {
            fn name(&self) -> &str {
                "empty"
            }
            fn search_space(&self) -> SearchSpace {
                SearchSpace::new()
            }
            fn fit(&self, _: &ParamSet, _: &Array2<f64>, _: &Array1<f64>) -> Result<Regressor> {
                unreachable!()
            }
        }
        let (x, y) = linear_data(20);
        let tuner = CandidateModelTuner::default();
        assert!(matches!(tuner.tune(&Empty, &x, &y), Err(FarecastError::InvalidSearchSpace { .. })));

        let (x1, y1) = linear_data(1);
        assert!(matches!(tuner.tune(&RidgeCandidate, &x1, &y1), Err(FarecastError::TuningFailed { .. })));
    }

    #[test]
    fn test_folds_reduced_to_row_count() {
        let (x, y) = linear_data(3);
        let tuner = CandidateModelTuner::new(TunerConfig::new().with_cv_folds(5));
        assert!(tuner.tune(&RidgeCandidate, &x, &y).is_ok());
    }
}
