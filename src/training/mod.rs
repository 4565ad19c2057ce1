//! Model training module
//!
//! Provides the regressors and utilities the selection layer tunes:
//! - Ridge / ordinary least squares and a mean baseline
//! - Regression trees and Random Forests
//! - XGBoost-style gradient boosting
//! - Epsilon-insensitive Support Vector Regression
//! - K-Means clustering for partitioning
//! - Cross-validation splitters and regression metrics

mod models;
pub mod clustering;
pub mod cross_validation;
pub mod decision_tree;
pub mod linear_models;
pub mod metrics;
pub mod random_forest;
pub mod svm;
pub mod xgboost;

pub use clustering::KMeans;
pub use cross_validation::{train_test_split, CVSplit, CVStrategy, CrossValidator};
pub use decision_tree::{RegressionTree, TreeNode};
pub use linear_models::{MeanRegressor, RidgeRegression, RidgeSolver};
pub use metrics::{adjusted_r2, r2_score, RegressionMetrics};
pub use models::Regressor;
pub use random_forest::{MaxFeatures, RandomForestRegressor};
pub use svm::{scale_gamma, KernelType, SVMConfig, SVMRegressor};
pub use xgboost::{XGBoostConfig, XGBoostRegressor};
