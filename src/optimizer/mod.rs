//! Hyperparameter optimization
//!
//! - Finite search spaces with grid enumeration
//! - Random search without replacement
//! - Seeded K-fold cross-validated tuning of a single candidate

mod search_space;
mod tuner;

pub use search_space::{ParamSet, Parameter, ParameterValue, SearchSpace};
pub use tuner::{CandidateModelTuner, SearchStrategy, TunedModel, TunerConfig};
