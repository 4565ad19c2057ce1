//! Candidate regressors and the roster table

use crate::error::{FarecastError, Result};
use crate::optimizer::{ParamSet, SearchSpace};
use crate::training::{
    scale_gamma, KernelType, MaxFeatures, MeanRegressor, RandomForestRegressor, Regressor,
    RidgeRegression, RidgeSolver, SVMConfig, SVMRegressor, XGBoostConfig, XGBoostRegressor,
};
use ndarray::{Array1, Array2};
use std::fmt;
use std::sync::Arc;

/// A tunable model family: a finite search space plus a constructor
pub trait Candidate: Send + Sync {
    /// Unique roster name
    fn name(&self) -> &str;

    fn search_space(&self) -> SearchSpace;

    /// Fit a fresh model with the given hyperparameters
    fn fit(&self, params: &ParamSet, x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor>;
}

// ─── Ridge ──────────────────────────────────────────────────────────────────

pub struct RidgeCandidate;

impl Candidate for RidgeCandidate {
    fn name(&self) -> &str {
        "ridge"
    }

    fn search_space(&self) -> SearchSpace {
        SearchSpace::new()
            .float("alpha", &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0])
            .categorical("solver", &["auto", "cholesky", "gauss_jordan"])
    }

    fn fit(&self, params: &ParamSet, x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
        let mut model = RidgeRegression::new()
            .with_alpha(params.f64("alpha")?)
            .with_solver(RidgeSolver::from_name(params.str("solver")?)?);
        model.fit(x, y)?;
        Ok(Regressor::Ridge(model))
    }
}

// ─── Random forest ──────────────────────────────────────────────────────────

pub struct RandomForestCandidate;

impl Candidate for RandomForestCandidate {
    fn name(&self) -> &str {
        "random_forest"
    }

    fn search_space(&self) -> SearchSpace {
        SearchSpace::new()
            .int("n_estimators", &[100, 200, 300])
            .int("max_depth", &[2, 3])
            .categorical("max_features", &["all", "sqrt", "log2"])
            .boolean("bootstrap")
    }

    fn fit(&self, params: &ParamSet, x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
        let mut model = RandomForestRegressor::new(params.usize("n_estimators")?)
            .with_max_depth(params.usize("max_depth")?)
            .with_max_features(MaxFeatures::from_name(params.str("max_features")?)?)
            .with_bootstrap(params.bool("bootstrap")?)
            .with_random_state(2394);
        model.fit(x, y)?;
        Ok(Regressor::RandomForest(model))
    }
}

// ─── SVR ────────────────────────────────────────────────────────────────────

pub struct SvrCandidate;

impl Candidate for SvrCandidate {
    fn name(&self) -> &str {
        "svr"
    }

    fn search_space(&self) -> SearchSpace {
        SearchSpace::new()
            .categorical("kernel", &["linear", "rbf", "poly", "sigmoid"])
            .float("C", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0])
    }

    fn fit(&self, params: &ParamSet, x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
        let kernel = KernelType::from_name(params.str("kernel")?, scale_gamma(x))?;
        let mut model = SVMRegressor::new(SVMConfig {
            c: params.f64("C")?,
            kernel,
            ..Default::default()
        });
        model.fit(x, y)?;
        Ok(Regressor::Svr(model))
    }
}

// ─── XGBoost ────────────────────────────────────────────────────────────────

pub struct XGBoostCandidate;

impl Candidate for XGBoostCandidate {
    fn name(&self) -> &str {
        "xgboost"
    }

    fn search_space(&self) -> SearchSpace {
        SearchSpace::new()
            .float("learning_rate", &[0.05, 0.10, 0.15, 0.20, 0.25, 0.30])
            .int("max_depth", &[3, 4, 5, 6, 8, 10, 12, 15])
            .float("min_child_weight", &[1.0, 3.0, 5.0, 7.0])
            .float("gamma", &[0.0, 0.1, 0.2, 0.3, 0.4])
            .float("colsample_bytree", &[0.3, 0.4, 0.5, 0.7])
    }

    fn fit(&self, params: &ParamSet, x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
        let mut model = XGBoostRegressor::new(XGBoostConfig {
            learning_rate: params.f64("learning_rate")?,
            max_depth: params.usize("max_depth")?,
            min_child_weight: params.f64("min_child_weight")?,
            gamma: params.f64("gamma")?,
            colsample_bytree: params.f64("colsample_bytree")?,
            ..Default::default()
        });
        model.fit(x, y)?;
        Ok(Regressor::XGBoost(model))
    }
}

// ─── Baseline ───────────────────────────────────────────────────────────────

/// Training-mean predictor
pub struct BaselineCandidate;

impl Candidate for BaselineCandidate {
    fn name(&self) -> &str {
        "baseline"
    }

    fn search_space(&self) -> SearchSpace {
        SearchSpace::new().categorical("strategy", &["mean"])
    }

    fn fit(&self, _params: &ParamSet, x: &Array2<f64>, y: &Array1<f64>) -> Result<Regressor> {
        let mut model = MeanRegressor::new();
        model.fit(x, y)?;
        Ok(Regressor::Baseline(model))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Roster
// ═══════════════════════════════════════════════════════════════════════════

/// Ordered, name-unique set of candidates
#[derive(Clone, Default)]
pub struct Roster {
    candidates: Vec<Arc<dyn Candidate>>,
}

impl fmt::Debug for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl Roster {
    pub const STANDARD_NAMES: [&'static str; 5] = ["ridge", "svr", "random_forest", "xgboost", "baseline"];

    pub fn empty() -> Self {
        Self::default()
    }

    /// Every built-in candidate
    pub fn standard() -> Self {
        Self::empty()
            .with_candidate(Arc::new(RidgeCandidate))
            .with_candidate(Arc::new(SvrCandidate))
            .with_candidate(Arc::new(RandomForestCandidate))
            .with_candidate(Arc::new(XGBoostCandidate))
            .with_candidate(Arc::new(BaselineCandidate))
    }

    /// Built-in candidates by name, in the given order
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let standard = Self::standard();
        let mut roster = Self::empty();
        for name in names {
            let name = name.as_ref();
            let candidate = standard.get(name).ok_or_else(|| {
                FarecastError::ConfigError(format!(
                    "unknown candidate '{}', expected one of {:?}",
                    name,
                    Self::STANDARD_NAMES
                ))
            })?;
            if roster.get(name).is_some() {
                return Err(FarecastError::ConfigError(format!("candidate '{}' listed twice", name)));
            }
            roster.candidates.push(candidate);
        }
        Ok(roster)
    }

    /// Add or replace a candidate by name
    pub fn with_candidate(mut self, candidate: Arc<dyn Candidate>) -> Self {
        match self.candidates.iter().position(|c| c.name() == candidate.name()) {
            Some(pos) => self.candidates[pos] = candidate,
            None => self.candidates.push(candidate),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Candidate>> {
        self.candidates.iter().find(|c| c.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Candidate>> {
        self.candidates.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_roster_spaces_are_valid() {
        let roster = Roster::standard();
        assert_eq!(roster.names(), Roster::STANDARD_NAMES.to_vec());
        for c in roster.iter() {
            c.search_space().validate(c.name()).unwrap();
        }
    }

    #[test]
    fn test_from_names() {
        let roster = Roster::from_names(&["xgboost", "ridge"]).unwrap();
        assert_eq!(roster.names(), vec!["xgboost", "ridge"]);
        assert!(matches!(Roster::from_names(&["lasso"]), Err(FarecastError::ConfigError(_))));
        assert!(Roster::from_names(&["ridge", "ridge"]).is_err());
    }

    #[test]
    fn test_every_candidate_fits_first_combination() {
        let x = Array2::from_shape_fn((24, 2), |(i, j)| ((i * (j + 1)) % 7) as f64 - 3.0);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        for c in Roster::standard().iter() {
            let params = c.search_space().combination(0);
            let model = c.fit(&params, &x, &y).unwrap();
            assert_eq!(model.predict(&x).unwrap().len(), 24, "{}", c.name());
        }
    }
}
