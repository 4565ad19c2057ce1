//! Per-partition model selection
//!
//! A [`Roster`] holds the candidate model families. The
//! [`ChampionSelector`] tunes each one on the training split, scores it on
//! held-out rows, optionally stacks the tuned models, and returns the winner
//! together with the full score table.

mod candidate;
mod champion;

pub use candidate::{
    BaselineCandidate, Candidate, RandomForestCandidate, RidgeCandidate, Roster, SvrCandidate,
    XGBoostCandidate,
};
pub use champion::{
    CandidateFailure, Champion, ChampionSelector, ScoreKind, ScoreRecord, ScoreTable,
    SelectionConfig, STACKING,
};
