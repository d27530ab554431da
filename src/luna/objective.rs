//! Training objectives and the builders that bind them to data.
//!
//! The LUNA objective is
//!
//! ```text
//! L(W) = fit(W) − λ_reg ‖W‖² − λ_sim · similarity(W)
//! ```
//!
//! where `fit` is the mean squared error over all auxiliary heads and
//! `similarity` the pairwise squared-cosine score of their input Jacobians.
//! Signs are kept exactly as written. A negative `similarity_param`
//! therefore turns the similarity term into a penalty.

use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use super::fit::{mean_mean_sq_error, mean_mean_sq_error_with_grad};
use super::jacobian::JacobianEstimator;
use super::similarity::{similarity_score, similarity_score_with_grad};
use crate::error::{ensure_finite, LunaError, Result};
use crate::neural::FeedForward;

/// Unweighted components of one objective evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ObjectiveTerms {
    pub fit: f64,
    /// `λ_reg ‖W‖²`.
    pub weight_decay: f64,
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct ObjectiveEvaluation {
    pub value: f64,
    pub gradient: Array1<f64>,
    pub terms: ObjectiveTerms,
}

/// Scalar objective over a flattened weight vector.
///
/// `step` is the optimizer iteration. It exists for the optimizer's calling
/// convention and never changes the value.
pub trait Objective {
    fn evaluate(&mut self, weights: &Array1<f64>, step: usize) -> Result<ObjectiveEvaluation>;

    fn value(&mut self, weights: &Array1<f64>, step: usize) -> Result<f64> {
        Ok(self.evaluate(weights, step)?.value)
    }
}

/// Binds an objective to a network, training data and regularization strength.
pub trait ObjectiveBuilder {
    type Objective: Objective;

    fn build(
        &self,
        net: &FeedForward,
        x: &Array2<f64>,
        y: &Array2<f64>,
        regularization_param: f64,
    ) -> Result<Self::Objective>;

    fn name(&self) -> &'static str;
}

fn check_data(net: &FeedForward, x: &Array2<f64>, y: &Array2<f64>) -> Result<()> {
    let input_dim = net.architecture().input_dim;
    if x.nrows() != input_dim {
        return Err(LunaError::shape(
            "training inputs",
            &[input_dim, x.ncols()],
            x.shape(),
        ));
    }
    if y.nrows() != 1 || y.ncols() != x.ncols() {
        return Err(LunaError::shape("training targets", &[1, x.ncols()], y.shape()));
    }
    Ok(())
}

/// Plain neural-linear-model objective: `fit(W) + λ_reg ‖W‖²`.
#[derive(Debug, Clone)]
pub struct MseObjective {
    net: FeedForward,
    x: Array2<f64>,
    y: Array2<f64>,
    regularization_param: f64,
}

impl Objective for MseObjective {
    fn evaluate(&mut self, weights: &Array1<f64>, _step: usize) -> Result<ObjectiveEvaluation> {
        let outputs = self.net.forward(weights, &self.x)?;
        let (fit, d_outputs) = mean_mean_sq_error_with_grad(&outputs, &self.y)?;
        let mut gradient = self.net.backward(weights, &self.x, &d_outputs)?;

        let weight_decay = self.regularization_param * weights.dot(weights);
        gradient.scaled_add(2.0 * self.regularization_param, weights);

        Ok(ObjectiveEvaluation {
            value: ensure_finite("mse objective", fit + weight_decay)?,
            gradient,
            terms: ObjectiveTerms {
                fit,
                weight_decay,
                similarity: 0.0,
            },
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MseObjectiveBuilder;

impl ObjectiveBuilder for MseObjectiveBuilder {
    type Objective = MseObjective;

    fn build(
        &self,
        net: &FeedForward,
        x: &Array2<f64>,
        y: &Array2<f64>,
        regularization_param: f64,
    ) -> Result<MseObjective> {
        check_data(net, x, y)?;
        Ok(MseObjective {
            net: net.clone(),
            x: x.clone(),
            y: y.clone(),
            regularization_param,
        })
    }

    fn name(&self) -> &'static str {
        "nlm"
    }
}

/// Similarity-regularized objective over auxiliary heads.
#[derive(Debug)]
pub struct LunaObjective {
    net: FeedForward,
    x: Array2<f64>,
    y: Array2<f64>,
    regularization_param: f64,
    similarity_param: f64,
    estimator: Arc<dyn JacobianEstimator>,
    rng: StdRng,
}

impl LunaObjective {
    /// Restarts the random stream used by stochastic Jacobian estimators.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn fit_loss(&self, weights: &Array1<f64>) -> Result<f64> {
        let outputs = self.net.forward(weights, &self.x)?;
        mean_mean_sq_error(&outputs, &self.y)
    }

    /// Pairwise squared-cosine score of the heads on the training inputs.
    pub fn similarity_score(&mut self, weights: &Array1<f64>) -> Result<f64> {
        let estimate = self
            .estimator
            .estimate(&self.net, weights, &self.x, &mut self.rng)?;
        similarity_score(&estimate.jacobian)
    }

    pub fn estimator(&self) -> &Arc<dyn JacobianEstimator> {
        &self.estimator
    }
}

impl Objective for LunaObjective {
    fn evaluate(&mut self, weights: &Array1<f64>, _step: usize) -> Result<ObjectiveEvaluation> {
        let outputs = self.net.forward(weights, &self.x)?;
        let (fit, d_outputs) = mean_mean_sq_error_with_grad(&outputs, &self.y)?;
        let mut gradient = self.net.backward(weights, &self.x, &d_outputs)?;

        let weight_decay = self.regularization_param * weights.dot(weights);
        gradient.scaled_add(-2.0 * self.regularization_param, weights);

        // One estimate per evaluation: value and gradient share the same draw.
        // A zero similarity_param contributes nothing and skips the estimate.
        let mut similarity = 0.0;
        if self.similarity_param != 0.0 {
            let estimate = self
                .estimator
                .estimate(&self.net, weights, &self.x, &mut self.rng)?;
            let (score, d_jacobian) = similarity_score_with_grad(&estimate.jacobian)?;
            let d_similarity =
                self.estimator
                    .pullback(&self.net, weights, &self.x, &estimate, &d_jacobian)?;
            gradient.scaled_add(-self.similarity_param, &d_similarity);
            similarity = score;
        }

        let value = ensure_finite(
            "luna objective",
            fit - weight_decay - self.similarity_param * similarity,
        )?;
        Ok(ObjectiveEvaluation {
            value,
            gradient,
            terms: ObjectiveTerms {
                fit,
                weight_decay,
                similarity,
            },
        })
    }
}

/// Builds [`LunaObjective`]s sharing one Jacobian estimator.
#[derive(Debug, Clone)]
pub struct LunaObjectiveBuilder {
    pub similarity_param: f64,
    pub estimator: Arc<dyn JacobianEstimator>,
    /// Seed for the estimator's random stream.
    pub seed: u64,
}

impl LunaObjectiveBuilder {
    pub fn new(similarity_param: f64, estimator: Arc<dyn JacobianEstimator>, seed: u64) -> Self {
        Self {
            similarity_param,
            estimator,
            seed,
        }
    }
}

impl ObjectiveBuilder for LunaObjectiveBuilder {
    type Objective = LunaObjective;

    fn build(
        &self,
        net: &FeedForward,
        x: &Array2<f64>,
        y: &Array2<f64>,
        regularization_param: f64,
    ) -> Result<LunaObjective> {
        check_data(net, x, y)?;
        Ok(LunaObjective {
            net: net.clone(),
            x: x.clone(),
            y: y.clone(),
            regularization_param,
            similarity_param: self.similarity_param,
            estimator: Arc::clone(&self.estimator),
            rng: StdRng::seed_from_u64(self.seed),
        })
    }

    fn name(&self) -> &'static str {
        "luna"
    }
}
