//! # hpo-optimizer
//!
//! Hyperparameter search space definitions, search budgets and objective
//! metrics, plus the request descriptors handed to execution and tuning
//! backends.
//!
//! The random and Bayesian samplers mirror what a managed tuner does with a
//! search request; the in-process backend uses them to simulate a search.

mod request;
mod search;
mod trial;

pub use request::{ImageRef, RunRequest, TuningRequest};
pub use search::{
    default_hyperparameters, strategy_for, BayesianSearch, HyperparameterRange, ParameterKind,
    RandomSearch, SearchSpace, SearchStrategy,
};
pub use trial::{ObjectiveMetric, SearchBudget, FINAL_SCORE_METRIC, FINAL_SCORE_PATTERN};
