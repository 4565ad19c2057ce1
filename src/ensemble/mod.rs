//! Ensemble methods

pub mod stacking;

pub use stacking::{FitFn, StackingConfig, StackingRegressor};
