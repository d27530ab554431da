//! Similarity-regularized training objective for auxiliary heads.
//!
//! - [`jacobian`] estimates each head's sensitivity to each input coordinate
//! - [`similarity`] scores pairwise alignment of those sensitivities
//! - [`fit`] measures how well every head regresses the shared target
//! - [`objective`] combines the terms and assembles the gradient

pub mod fit;
pub mod jacobian;
pub mod objective;
pub mod similarity;

pub use fit::{mean_mean_sq_error, mean_mean_sq_error_with_grad};
pub use jacobian::{Analytic, FiniteDifference, JacobianEstimate, JacobianEstimator, JacobianKind};
pub use objective::{
    LunaObjective, LunaObjectiveBuilder, MseObjective, MseObjectiveBuilder, Objective,
    ObjectiveBuilder, ObjectiveEvaluation, ObjectiveTerms,
};
pub use similarity::{cos_sim_sq, similarity_score, similarity_score_with_grad};
