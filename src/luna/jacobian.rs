//! Input-Jacobian estimators for the auxiliary heads.
//!
//! An estimator returns `J[d, h, n] ≈ ∂ output_h(x_n) / ∂ x_n[d]` with shape
//! `(input_dim, output_dim, n_obs)`, and can pull a cotangent on that tensor
//! back to the network weights. The pullback is exact for the estimate it is
//! given, so value and gradient of the objective stay consistent even when
//! the estimate itself is stochastic.

use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, Axis};
use rand::RngCore;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::{LunaError, Result};
use crate::neural::FeedForward;

/// Jacobian tensor of one call plus any state needed to differentiate it.
#[derive(Debug, Clone)]
pub struct JacobianEstimate {
    pub jacobian: Array3<f64>,
    /// Per-observation perturbations drawn by [`FiniteDifference`].
    pub epsilons: Option<Array1<f64>>,
}

/// Strategy producing the input Jacobian used by the similarity penalty.
pub trait JacobianEstimator: Send + Sync + Debug {
    fn estimate(
        &self,
        net: &FeedForward,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        rng: &mut dyn RngCore,
    ) -> Result<JacobianEstimate>;

    /// Gradient with respect to `weights` of `<cotangent, estimate.jacobian>`.
    fn pullback(
        &self,
        net: &FeedForward,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        estimate: &JacobianEstimate,
        cotangent: &Array3<f64>,
    ) -> Result<Array1<f64>>;

    fn name(&self) -> &'static str;
}

/// Forward differences with one random step per observation.
///
/// A single vector `ε ~ N(0, std²)` of length `n_obs` is drawn per call and
/// reused for every input dimension, so `J[d, h, n] = (f(x + ε_n e_d) - f(x)) / ε_n`.
/// No floor is applied to `ε_n`; a non-finite result is reported as
/// [`LunaError::NumericalDomain`].
#[derive(Debug, Clone)]
pub struct FiniteDifference {
    pub std: f64,
}

impl Default for FiniteDifference {
    fn default() -> Self {
        Self { std: 0.1 }
    }
}

impl FiniteDifference {
    pub fn new(std: f64) -> Self {
        Self { std }
    }

    fn shifted(x: &Array2<f64>, d: usize, epsilons: &Array1<f64>) -> Array2<f64> {
        let mut shifted = x.clone();
        let mut row = shifted.row_mut(d);
        row += epsilons;
        shifted
    }
}

impl JacobianEstimator for FiniteDifference {
    fn estimate(
        &self,
        net: &FeedForward,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        rng: &mut dyn RngCore,
    ) -> Result<JacobianEstimate> {
        check_input(net, x)?;
        let normal = Normal::new(0.0, self.std)
            .map_err(|err| LunaError::InvalidConfig(format!("finite difference std: {err}")))?;
        let n = x.ncols();
        let epsilons = Array1::from_shape_fn(n, |_| normal.sample(&mut *rng));
        let divisor = epsilons.view().insert_axis(Axis(0));

        let base = net.forward(weights, x)?;
        let slices = (0..x.nrows())
            .into_par_iter()
            .map(|d| {
                let perturbed = net.forward(weights, &Self::shifted(x, d, &epsilons))?;
                Ok((perturbed - &base) / &divisor)
            })
            .collect::<Result<Vec<Array2<f64>>>>()?;

        let mut jacobian = Array3::zeros((x.nrows(), base.nrows(), n));
        for (d, slice) in slices.into_iter().enumerate() {
            jacobian.index_axis_mut(Axis(0), d).assign(&slice);
        }
        if let Some(bad) = jacobian.iter().find(|v| !v.is_finite()) {
            return Err(LunaError::NumericalDomain {
                context: "finite difference jacobian",
                value: *bad,
            });
        }

        Ok(JacobianEstimate {
            jacobian,
            epsilons: Some(epsilons),
        })
    }

    fn pullback(
        &self,
        net: &FeedForward,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        estimate: &JacobianEstimate,
        cotangent: &Array3<f64>,
    ) -> Result<Array1<f64>> {
        check_input(net, x)?;
        check_cotangent(estimate, cotangent)?;
        let epsilons = estimate.epsilons.as_ref().ok_or_else(|| {
            LunaError::InvalidConfig("finite difference pullback needs the drawn epsilons".into())
        })?;
        let divisor = epsilons.view().insert_axis(Axis(0));

        // d/dW <C_d, (f(x + δ_d) - f(x)) / ε> = VJP(x + δ_d, C_d / ε) - VJP(x, C_d / ε)
        let scaled: Vec<Array2<f64>> = cotangent
            .axis_iter(Axis(0))
            .map(|c| &c / &divisor)
            .collect();

        let shifted_grads = scaled
            .par_iter()
            .enumerate()
            .map(|(d, c)| net.backward(weights, &Self::shifted(x, d, epsilons), c))
            .collect::<Result<Vec<_>>>()?;

        let mut base_cotangent = Array2::zeros(scaled[0].raw_dim());
        for c in &scaled {
            base_cotangent += c;
        }
        let mut total = net.backward(weights, x, &base_cotangent)?;
        total.mapv_inplace(|v| -v);
        for grad in shifted_grads {
            total += &grad;
        }
        Ok(total)
    }

    fn name(&self) -> &'static str {
        "finite_difference"
    }
}

/// Exact input Jacobian via forward-mode tangents through the network.
#[derive(Debug, Clone, Default)]
pub struct Analytic;

impl JacobianEstimator for Analytic {
    fn estimate(
        &self,
        net: &FeedForward,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        _rng: &mut dyn RngCore,
    ) -> Result<JacobianEstimate> {
        check_input(net, x)?;
        Ok(JacobianEstimate {
            jacobian: net.input_jacobian(weights, x)?,
            epsilons: None,
        })
    }

    fn pullback(
        &self,
        net: &FeedForward,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        estimate: &JacobianEstimate,
        cotangent: &Array3<f64>,
    ) -> Result<Array1<f64>> {
        check_cotangent(estimate, cotangent)?;
        net.input_jacobian_pullback(weights, x, cotangent)
    }

    fn name(&self) -> &'static str {
        "analytic"
    }
}

/// Config-level selector for the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JacobianKind {
    FiniteDifference,
    Analytic,
}

impl JacobianKind {
    pub fn build(self, finite_difference_std: f64) -> Arc<dyn JacobianEstimator> {
        match self {
            JacobianKind::FiniteDifference => {
                Arc::new(FiniteDifference::new(finite_difference_std))
            }
            JacobianKind::Analytic => Arc::new(Analytic),
        }
    }
}

impl FromStr for JacobianKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "finite_difference" | "finite-difference" | "fd" => Ok(JacobianKind::FiniteDifference),
            "analytic" | "exact" => Ok(JacobianKind::Analytic),
            other => Err(format!("unknown jacobian estimator `{other}`")),
        }
    }
}

fn check_input(net: &FeedForward, x: &Array2<f64>) -> Result<()> {
    let input_dim = net.architecture().input_dim;
    if x.nrows() != input_dim {
        return Err(LunaError::shape(
            "jacobian input",
            &[input_dim, x.ncols()],
            x.shape(),
        ));
    }
    Ok(())
}

fn check_cotangent(estimate: &JacobianEstimate, cotangent: &Array3<f64>) -> Result<()> {
    if cotangent.shape() != estimate.jacobian.shape() {
        return Err(LunaError::shape(
            "jacobian cotangent",
            estimate.jacobian.shape(),
            cotangent.shape(),
        ));
    }
    Ok(())
}
