#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! SIREN edge scoring for gene regulatory networks.
//!
//! Expression vectors are standardized, expanded into a quadratic B-spline basis
//! with quantile-placed knots, and reduced to marginal and joint bin probabilities.
//! Each candidate edge then receives a weighted, one-sided mutual-information score.

pub mod basis;
pub mod config;
pub mod engine;
pub mod io;
pub mod probability;
pub mod standardize;
pub mod types;
pub mod verify;
pub mod weights;

pub use basis::{BasisError, SplineSpec};
pub use config::{ConfigError, SirenConfig};
pub use engine::{NoopScoreProgress, ScoreEngine, ScoreProgressObserver, SirenError, compute_scores};
pub use types::{
    BasisTensor, EdgeList, ExpressionMatrix, MarginalProbabilities, ScoreVector, WeightMatrix,
};
