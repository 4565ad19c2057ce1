//! Champion selection across a candidate roster

use super::candidate::{Candidate, Roster};
use crate::ensemble::{FitFn, StackingConfig, StackingRegressor};
use crate::error::{FarecastError, Result};
use crate::optimizer::{CandidateModelTuner, ParamSet, ParameterValue, TunedModel, TunerConfig};
use crate::training::{adjusted_r2, RegressionMetrics, Regressor};
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name the stacking ensemble is reported under
pub const STACKING: &str = "stacking";

/// Held-out score used to rank candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreKind {
    R2,
    AdjustedR2,
}

impl Default for ScoreKind {
    fn default() -> Self {
        ScoreKind::AdjustedR2
    }
}

impl ScoreKind {
    /// Score from held-out metrics; `n_features` is the model input width
    pub fn score(&self, metrics: &RegressionMetrics, n_features: usize) -> Result<f64> {
        match self {
            ScoreKind::R2 => Ok(metrics.r2),
            ScoreKind::AdjustedR2 => adjusted_r2(metrics.r2, metrics.n_samples, n_features),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub score: ScoreKind,
    /// Tie-break order; names not listed rank after, in roster order
    pub priority: Vec<String>,
    pub stacking: StackingConfig,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            score: ScoreKind::default(),
            priority: ["stacking", "xgboost", "random_forest", "svr", "ridge", "baseline"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            stacking: StackingConfig::default(),
        }
    }
}

impl SelectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, score: ScoreKind) -> Self {
        self.score = score;
        self
    }

    pub fn with_stacking(mut self, stacking: StackingConfig) -> Self {
        self.stacking = stacking;
        self
    }

    pub fn without_stacking(mut self) -> Self {
        self.stacking.enabled = false;
        self
    }
}

/// Held-out evaluation of one candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub candidate: String,
    pub score: f64,
    pub metrics: RegressionMetrics,
    /// Mean CV R² of the tuned combination; absent for stacking
    pub cv_score: Option<f64>,
    pub params: ParamSet,
}

/// Every surviving candidate's score, in evaluation order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreTable(pub Vec<ScoreRecord>);

impl ScoreTable {
    pub fn records(&self) -> &[ScoreRecord] {
        &self.0
    }

    pub fn get(&self, candidate: &str) -> Option<&ScoreRecord> {
        self.0.iter().find(|r| r.candidate == candidate)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A candidate dropped from selection and why
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub candidate: String,
    pub reason: String,
}

/// Winning model of one selection round
#[derive(Debug, Clone)]
pub struct Champion {
    pub name: String,
    pub model: Regressor,
    pub params: ParamSet,
    pub cv_score: Option<f64>,
    pub score: f64,
    pub metrics: RegressionMetrics,
    pub scores: ScoreTable,
    pub failures: Vec<CandidateFailure>,
}

struct Evaluated {
    record: ScoreRecord,
    model: Regressor,
    rank: usize,
}

/// Tunes every candidate, scores on held-out rows, keeps the best
#[derive(Debug, Clone, Default)]
pub struct ChampionSelector {
    tuner: CandidateModelTuner,
    config: SelectionConfig,
}

impl ChampionSelector {
    pub fn new(tuner: TunerConfig, config: SelectionConfig) -> Self {
        Self {
            tuner: CandidateModelTuner::new(tuner),
            config,
        }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    fn rank(&self, name: &str, roster_pos: usize) -> usize {
        self.config
            .priority
            .iter()
            .position(|p| p == name)
            .unwrap_or(self.config.priority.len() + roster_pos)
    }

    fn evaluate(&self, name: &str, model: &Regressor, x_test: &Array2<f64>, y_test: &Array1<f64>) -> Result<(f64, RegressionMetrics)> {
        let pred = model.predict(x_test)?;
        let metrics = RegressionMetrics::compute(y_test, &pred)?;
        let score = self.config.score.score(&metrics, x_test.ncols())?;
        if !score.is_finite() {
            return Err(FarecastError::ComputationError(format!("{} scored a non-finite value", name)));
        }
        Ok((score, metrics))
    }

    /// Pick the best candidate; held-out rows are used for scoring only
    pub fn select_best(
        &self,
        roster: &Roster,
        x_train: &Array2<f64>,
        x_test: &Array2<f64>,
        y_train: &Array1<f64>,
        y_test: &Array1<f64>,
    ) -> Result<Champion> {
        if x_train.ncols() != x_test.ncols() {
            return Err(FarecastError::ShapeError {
                expected: format!("{} test features", x_train.ncols()),
                actual: format!("{} test features", x_test.ncols()),
            });
        }

        let candidates: Vec<Arc<dyn Candidate>> = roster.iter().cloned().collect();
        let tuned: Vec<Result<TunedModel>> = candidates
            .par_iter()
            .map(|c| self.tuner.tune(c.as_ref(), x_train, y_train))
            .collect();

        let mut evaluated: Vec<Evaluated> = Vec::new();
        let mut failures: Vec<CandidateFailure> = Vec::new();
        let mut survivors: Vec<(Arc<dyn Candidate>, TunedModel)> = Vec::new();

        for (pos, (candidate, outcome)) in candidates.iter().zip(tuned).enumerate() {
            let name = candidate.name().to_string();
            let result = outcome.and_then(|t| {
                let (score, metrics) = self.evaluate(&name, &t.model, x_test, y_test)?;
                Ok((t, score, metrics))
            });
            match result {
                Ok((t, score, metrics)) => {
                    debug!(candidate = %name, score, cv_score = t.cv_score, "candidate scored");
                    evaluated.push(Evaluated {
                        record: ScoreRecord {
                            candidate: name,
                            score,
                            metrics,
                            cv_score: Some(t.cv_score),
                            params: t.params.clone(),
                        },
                        model: t.model.clone(),
                        rank: self.rank(candidate.name(), pos),
                    });
                    survivors.push((candidate.clone(), t));
                }
                Err(e) => {
                    warn!(candidate = %name, error = %e, "candidate excluded");
                    failures.push(CandidateFailure { candidate: name, reason: e.to_string() });
                }
            }
        }

        if self.config.stacking.enabled {
            match self.fit_stacking(&survivors, x_train, y_train).and_then(|(model, params)| {
                let (score, metrics) = self.evaluate(STACKING, &model, x_test, y_test)?;
                Ok((model, params, score, metrics))
            }) {
                Ok((model, params, score, metrics)) => {
                    debug!(candidate = STACKING, score, "candidate scored");
                    evaluated.push(Evaluated {
                        record: ScoreRecord {
                            candidate: STACKING.to_string(),
                            score,
                            metrics,
                            cv_score: None,
                            params,
                        },
                        model,
                        rank: self.rank(STACKING, candidates.len()),
                    });
                }
                Err(e) => {
                    warn!(candidate = STACKING, error = %e, "candidate excluded");
                    failures.push(CandidateFailure {
                        candidate: STACKING.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let best_idx = evaluated
            .iter()
            .enumerate()
            .fold(None::<usize>, |best, (i, e)| match best {
                Some(b) => {
                    let cur = &evaluated[b];
                    let better = e.record.score > cur.record.score
                        || (e.record.score == cur.record.score && e.rank < cur.rank);
                    Some(if better { i } else { b })
                }
                None => Some(i),
            })
            .ok_or_else(|| {
                let reasons: Vec<String> = failures.iter().map(|f| format!("{}: {}", f.candidate, f.reason)).collect();
                FarecastError::NoViableCandidate(reasons.join("; "))
            })?;

        let scores = ScoreTable(evaluated.iter().map(|e| e.record.clone()).collect());
        let winner = evaluated.swap_remove(best_idx);
        info!(
            champion = %winner.record.candidate,
            score = winner.record.score,
            evaluated = scores.len(),
            excluded = failures.len(),
            "champion selected"
        );

        Ok(Champion {
            name: winner.record.candidate,
            model: winner.model,
            params: winner.record.params,
            cv_score: winner.record.cv_score,
            score: winner.record.score,
            metrics: winner.record.metrics,
            scores,
            failures,
        })
    }

    /// Stack the tuned base learners under the tuned meta-learner, training rows only
    fn fit_stacking(
        &self,
        survivors: &[(Arc<dyn Candidate>, TunedModel)],
        x_train: &Array2<f64>,
        y_train: &Array1<f64>,
    ) -> Result<(Regressor, ParamSet)> {
        let cfg = &self.config.stacking;
        let find = |name: &str| {
            survivors.iter().find(|(c, _)| c.name() == name).ok_or_else(|| {
                FarecastError::TrainingError(format!("stacking member '{}' was not tuned successfully", name))
            })
        };

        let members = cfg.base.iter().map(|n| find(n.as_str())).collect::<Result<Vec<_>>>()?;
        let (meta_cand, meta_tuned) = find(cfg.meta.as_str())?;

        let base_fits: Vec<Box<dyn Fn(&Array2<f64>, &Array1<f64>) -> Result<Regressor> + Sync>> = members
            .iter()
            .map(|(c, t)| {
                let (c, p) = (c.clone(), t.params.clone());
                Box::new(move |x: &Array2<f64>, y: &Array1<f64>| c.fit(&p, x, y))
                    as Box<dyn Fn(&Array2<f64>, &Array1<f64>) -> Result<Regressor> + Sync>
            })
            .collect();
        let base: Vec<(String, FitFn<'_>)> = members
            .iter()
            .zip(base_fits.iter())
            .map(|((c, _), f)| (c.name().to_string(), f.as_ref() as FitFn<'_>))
            .collect();

        let meta_params = meta_tuned.params.clone();
        let meta_fit = move |x: &Array2<f64>, y: &Array1<f64>| meta_cand.fit(&meta_params, x, y);
        let model = StackingRegressor::fit(cfg, &base, (cfg.meta.clone(), &meta_fit as FitFn<'_>), x_train, y_train)?;

        let mut params = ParamSet::new();
        for (c, t) in members.iter().map(|m| (&m.0, &m.1)).chain(std::iter::once((meta_cand, meta_tuned))) {
            for (k, v) in t.params.iter() {
                params = params.with(format!("{}.{}", c.name(), k), v.clone());
            }
        }
        params = params.with("meta", ParameterValue::String(cfg.meta.clone()));
        Ok((Regressor::Stacking(Box::new(model)), params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{SearchSpace, SearchStrategy};
    use crate::selection::{BaselineCandidate, RidgeCandidate};
    use crate::training::{train_test_split, MeanRegressor};
    use ndarray::Axis;
    use parking_lot::Mutex;

    fn data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * (j + 3)) % 17) as f64);
        let y = x.column(0).mapv(|v| 4.0 * v) + x.column(1).mapv(|v| 0.5 * v) + 10.0;
        (x, y)
    }

    fn split(n: usize) -> (Array2<f64>, Array2<f64>, Array1<f64>, Array1<f64>) {
        let (x, y) = data(n);
        let s = train_test_split(n, 0.2, 348724).unwrap();
        (
            x.select(Axis(0), &s.train_indices),
            x.select(Axis(0), &s.test_indices),
            y.select(Axis(0), &s.train_indices),
            y.select(Axis(0), &s.test_indices),
        )
    }

    fn fast_selector(config: SelectionConfig) -> ChampionSelector {
        ChampionSelector::new(TunerConfig::new().with_strategy(SearchStrategy::Random { n_iter: 3 }), config)
    }

    #[test]
    fn test_linear_signal_prefers_ridge_over_baseline() {
        let (xtr, xte, ytr, yte) = split(60);
        let roster = Roster::from_names(&["baseline", "ridge"]).unwrap();
        let champ = fast_selector(SelectionConfig::new().without_stacking())
            .select_best(&roster, &xtr, &xte, &ytr, &yte)
            .unwrap();
        assert_eq!(champ.name, "ridge");
        assert_eq!(champ.scores.len(), 2);
        assert!(champ.score > champ.scores.get("baseline").unwrap().score);
    }

    /// Constant predictor with a fixed value; ties with another copy
    struct Constant(&'static str, f64);

    impl Candidate for Constant {
        fn name(&self) -> &str {
            self.0
        }
        fn search_space(&self) -> SearchSpace {
            SearchSpace::new().categorical("kind", &["const"])
        }
        fn fit(&self, _: &ParamSet, x: &Array2<f64>, _: &Array1<f64>) -> Result<Regressor> {
            Ok(Regressor::Baseline(MeanRegressor::constant(self.1, x.ncols())))
        }
    }

    #[test]
    fn test_ties_follow_priority() {
        let (xtr, xte, ytr, yte) = split(60);
        let roster = Roster::empty()
            .with_candidate(Arc::new(Constant("ridge", 1.0)))
            .with_candidate(Arc::new(Constant("xgboost", 1.0)));
        let champ = fast_selector(SelectionConfig::new().without_stacking().with_score(ScoreKind::R2))
            .select_best(&roster, &xtr, &xte, &ytr, &yte)
            .unwrap();
        assert_eq!(champ.name, "xgboost");
    }

    #[test]
    fn test_adjusted_score_guard_excludes_everything() {
        // 5 held-out rows with 4 features: n - m - 1 = 0
        let x = Array2::from_shape_fn((25, 4), |(i, j)| ((i * (j + 2)) % 9) as f64);
        let y = x.column(0).mapv(|v| v * 2.0);
        let s = train_test_split(25, 0.2, 1).unwrap();
        let err = fast_selector(SelectionConfig::new().without_stacking())
            .select_best(
                &Roster::from_names(&["ridge"]).unwrap(),
                &x.select(Axis(0), &s.train_indices),
                &x.select(Axis(0), &s.test_indices),
                &y.select(Axis(0), &s.train_indices),
                &y.select(Axis(0), &s.test_indices),
            )
            .unwrap_err();
        match err {
            FarecastError::NoViableCandidate(msg) => assert!(msg.contains("n = 5, m = 4")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    /// Records every target value it is fit on
    struct Spy {
        seen: Mutex<Vec<f64>>,
    }

    impl Candidate for Spy {
        fn name(&self) -> &str {
            "spy"
        }
        fn search_space(&self) -> SearchSpace {
            SearchSpace::new().int("n", &[1])
        }
        fn fit(&self, _: &ParamSet, x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
            self.seen.lock().extend(y.iter().copied());
            let mut m = MeanRegressor::new();
            m.fit(x, y)?;
            Ok(Regressor::Baseline(m))
        }
    }

    #[test]
    fn test_held_out_rows_never_reach_a_fit() {
        let (xtr, xte, ytr, _) = split(50);
        // held-out targets are unique sentinels
        let yte = Array1::from_shape_fn(xte.nrows(), |i| 1.0e6 + i as f64);
        let spy = Arc::new(Spy { seen: Mutex::new(Vec::new()) });
        let mut stacking = StackingConfig::default();
        stacking.base = vec!["spy".to_string(), "ridge".to_string()];
        stacking.meta = "spy".to_string();
        let roster = Roster::empty()
            .with_candidate(spy.clone())
            .with_candidate(Arc::new(RidgeCandidate))
            .with_candidate(Arc::new(BaselineCandidate));

        let champ = fast_selector(SelectionConfig::new().with_stacking(stacking))
            .select_best(&roster, &xtr, &xte, &ytr, &yte)
            .unwrap();
        assert!(champ.scores.get(STACKING).is_some());
        assert!(spy.seen.lock().iter().all(|v| *v < 1.0e6));
    }

    #[test]
    fn test_stacking_skipped_when_member_missing() {
        let (xtr, xte, ytr, yte) = split(40);
        let champ = fast_selector(SelectionConfig::default())
            .select_best(&Roster::from_names(&["ridge"]).unwrap(), &xtr, &xte, &ytr, &yte)
            .unwrap();
        assert_eq!(champ.name, "ridge");
        assert!(champ.failures.iter().any(|f| f.candidate == STACKING));
    }
}
