//! Bayesian linear regression on fixed features.
//!
//! With a `N(0, prior_var · I)` prior on the coefficients and Gaussian noise of
//! variance `noise_var`, the posterior is Gaussian with
//!
//! ```text
//! precision = I / prior_var + FᵀF / noise_var
//! mean      = precision⁻¹ Fᵀy / noise_var
//! ```
//!
//! Samples are drawn as `mean + L⁻ᵀ z` where `precision = L Lᵀ`.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use serde::Serialize;

use crate::error::{LunaError, Result};
use crate::logging;

/// Gaussian posterior over regression coefficients.
#[derive(Debug, Clone)]
pub struct BayesPosterior {
    pub mean: Array1<f64>,
    pub covariance: Array2<f64>,
    /// Lower Cholesky factor of the posterior precision.
    precision_factor: DMatrix<f64>,
}

#[derive(Serialize)]
struct PosteriorLog {
    features: usize,
    observations: usize,
    prior_variance: f64,
    noise_variance: f64,
    mean_norm: f64,
}

impl BayesPosterior {
    /// `features` is `(n_obs, k)`, `targets` has length `n_obs`.
    pub fn fit(
        prior_var: f64,
        noise_var: f64,
        features: &Array2<f64>,
        targets: &Array1<f64>,
    ) -> Result<Self> {
        if !(prior_var > 0.0) || !(noise_var > 0.0) {
            return Err(LunaError::InvalidConfig(format!(
                "posterior variances must be positive (prior {prior_var}, noise {noise_var})"
            )));
        }
        let (n, k) = features.dim();
        if targets.len() != n {
            return Err(LunaError::shape("bayes targets", &[n], &[targets.len()]));
        }

        let f = DMatrix::from_fn(n, k, |i, j| features[[i, j]]);
        let y = DVector::from_fn(n, |i, _| targets[i]);
        let precision =
            DMatrix::<f64>::identity(k, k) / prior_var + f.transpose() * &f / noise_var;
        let cholesky = precision
            .cholesky()
            .ok_or_else(|| LunaError::Linalg("posterior precision is not positive definite".into()))?;
        let covariance = cholesky.inverse();
        let mean = &covariance * (f.transpose() * y) / noise_var;

        let posterior = Self {
            mean: Array1::from_iter(mean.iter().copied()),
            covariance: Array2::from_shape_fn((k, k), |(i, j)| covariance[(i, j)]),
            precision_factor: cholesky.l(),
        };
        logging::record(
            "bayes_posterior",
            &PosteriorLog {
                features: k,
                observations: n,
                prior_variance: prior_var,
                noise_variance: noise_var,
                mean_norm: posterior.mean.dot(&posterior.mean).sqrt(),
            },
        );
        Ok(posterior)
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Draws `samples` coefficient vectors, shape `(samples, k)`.
    pub fn sample<R: Rng>(&self, samples: usize, rng: &mut R) -> Result<Array2<f64>> {
        let k = self.dim();
        let upper = self.precision_factor.transpose();
        let mut out = Array2::zeros((samples, k));
        for mut row in out.axis_iter_mut(Axis(0)) {
            let z = DVector::<f64>::from_fn(k, |_, _| rng.sample(StandardNormal));
            let offset = upper
                .solve_upper_triangular(&z)
                .ok_or_else(|| LunaError::Linalg("singular precision factor".into()))?;
            for (j, value) in row.iter_mut().enumerate() {
                *value = self.mean[j] + offset[j];
            }
        }
        Ok(out)
    }
}

/// Posterior coefficient samples for Bayesian linear regression, shape `(samples, k)`.
pub fn bayes_lr_posterior<R: Rng>(
    prior_var: f64,
    noise_var: f64,
    features: &Array2<f64>,
    targets: &Array1<f64>,
    samples: usize,
    rng: &mut R,
) -> Result<Array2<f64>> {
    BayesPosterior::fit(prior_var, noise_var, features, targets)?.sample(samples, rng)
}

/// Posterior predictive draws at a set of test features.
#[derive(Debug, Clone)]
pub struct Predictives {
    /// Noise-free predictions, one row per posterior sample: `(samples, m)`.
    pub mean_samples: Array2<f64>,
    /// Noisy predictive samples: `(n, m)`.
    pub samples: Array2<f64>,
}

/// Pushes posterior samples through `features` (`(m, k)`) and adds observation noise.
///
/// Row `i` of the noisy samples uses posterior sample `i mod samples`.
pub fn bayes_lr_predictives<R: Rng>(
    noise_var: f64,
    posterior: &Array2<f64>,
    features: &Array2<f64>,
    n: usize,
    rng: &mut R,
) -> Result<Predictives> {
    if posterior.ncols() != features.ncols() {
        return Err(LunaError::shape(
            "predictive features",
            &[features.nrows(), posterior.ncols()],
            features.shape(),
        ));
    }
    if posterior.nrows() == 0 {
        return Err(LunaError::InvalidConfig(
            "predictives need at least one posterior sample".into(),
        ));
    }
    let noise = Normal::new(0.0, noise_var.sqrt())
        .map_err(|err| LunaError::InvalidConfig(format!("noise variance: {err}")))?;

    let mean_samples = posterior.dot(&features.t());
    let m = features.nrows();
    let mut samples = Array2::zeros((n, m));
    for (i, mut row) in samples.axis_iter_mut(Axis(0)).enumerate() {
        let source = mean_samples.row(i % mean_samples.nrows());
        for (value, mean) in row.iter_mut().zip(source.iter()) {
            *value = mean + noise.sample(rng);
        }
    }
    Ok(Predictives {
        mean_samples,
        samples,
    })
}

/// Pointwise mean and central 95% interval of predictive samples.
#[derive(Debug, Clone, Serialize)]
pub struct PredictiveSummary {
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl PredictiveSummary {
    /// `samples` is `(n_samples, m)`; statistics are taken per column.
    pub fn from_samples(samples: &Array2<f64>) -> Self {
        let mut mean = Vec::with_capacity(samples.ncols());
        let mut lower = Vec::with_capacity(samples.ncols());
        let mut upper = Vec::with_capacity(samples.ncols());
        for column in samples.axis_iter(Axis(1)) {
            let mut sorted: Vec<f64> = column.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            mean.push(column.mean().unwrap_or(0.0));
            lower.push(percentile(&sorted, 2.5));
            upper.push(percentile(&sorted, 97.5));
        }
        Self { mean, lower, upper }
    }
}

/// Linear-interpolated percentile of sorted data.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let rank = q / 100.0 * (len - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] * (1.0 - frac) + sorted[hi] * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn linear_problem(n: usize, noise_std: f64, rng: &mut StdRng) -> (Array2<f64>, Array1<f64>) {
        let normal = Normal::new(0.0, noise_std).unwrap();
        let features = Array2::from_shape_fn((n, 2), |(i, j)| {
            if j == 0 {
                1.0
            } else {
                -2.0 + 4.0 * i as f64 / (n - 1) as f64
            }
        });
        let targets = Array1::from_shape_fn(n, |i| 2.0 + 3.0 * features[[i, 1]] + normal.sample(rng));
        (features, targets)
    }

    #[test]
    fn posterior_recovers_linear_coefficients() {
        let mut rng = StdRng::seed_from_u64(21);
        let (features, targets) = linear_problem(200, 0.1, &mut rng);
        let posterior = BayesPosterior::fit(100.0, 0.01, &features, &targets).unwrap();
        assert!((posterior.mean[0] - 2.0).abs() < 0.05);
        assert!((posterior.mean[1] - 3.0).abs() < 0.05);

        let samples = posterior.sample(4000, &mut rng).unwrap();
        assert_eq!(samples.dim(), (4000, 2));
        let sample_mean = samples.mean_axis(Axis(0)).unwrap();
        for j in 0..2 {
            let sd = posterior.covariance[[j, j]].sqrt();
            assert!((sample_mean[j] - posterior.mean[j]).abs() < 5.0 * sd / 60.0 + 1e-9);
        }
    }

    #[test]
    fn sample_variance_matches_posterior_covariance() {
        let mut rng = StdRng::seed_from_u64(8);
        let (features, targets) = linear_problem(10, 1.0, &mut rng);
        let posterior = BayesPosterior::fit(1.0, 1.0, &features, &targets).unwrap();
        let samples = posterior.sample(20000, &mut rng).unwrap();
        let centered = &samples - &posterior.mean.view().insert_axis(Axis(0));
        let empirical = centered.t().dot(&centered) / samples.nrows() as f64;
        for i in 0..2 {
            for j in 0..2 {
                let expected = posterior.covariance[[i, j]];
                assert!((empirical[[i, j]] - expected).abs() < 0.05 * posterior.covariance[[i, i]].max(posterior.covariance[[j, j]]) + 1e-3);
            }
        }
    }

    #[test]
    fn strong_prior_shrinks_toward_zero() {
        let mut rng = StdRng::seed_from_u64(2);
        let (features, targets) = linear_problem(20, 0.1, &mut rng);
        let loose = BayesPosterior::fit(100.0, 0.01, &features, &targets).unwrap();
        let tight = BayesPosterior::fit(1e-4, 0.01, &features, &targets).unwrap();
        assert!(tight.mean.dot(&tight.mean) < loose.mean.dot(&loose.mean));
    }

    #[test]
    fn rejects_target_length_mismatch() {
        let features = Array2::zeros((5, 2));
        let targets = Array1::zeros(4);
        assert!(matches!(
            BayesPosterior::fit(1.0, 1.0, &features, &targets),
            Err(LunaError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn predictives_have_requested_shapes() {
        let mut rng = StdRng::seed_from_u64(4);
        let (features, targets) = linear_problem(30, 0.1, &mut rng);
        let posterior = bayes_lr_posterior(10.0, 0.01, &features, &targets, 50, &mut rng).unwrap();
        let test_features = features.slice(ndarray::s![..7, ..]).to_owned();
        let predictives =
            bayes_lr_predictives(0.01, &posterior, &test_features, 120, &mut rng).unwrap();
        assert_eq!(predictives.mean_samples.dim(), (50, 7));
        assert_eq!(predictives.samples.dim(), (120, 7));

        let summary = PredictiveSummary::from_samples(&predictives.samples);
        for i in 0..7 {
            assert!(summary.lower[i] <= summary.mean[i]);
            assert!(summary.mean[i] <= summary.upper[i]);
            let truth = 2.0 + 3.0 * test_features[[i, 1]];
            assert!((summary.mean[i] - truth).abs() < 0.2);
        }
    }

    #[test]
    fn percentile_interpolates() {
        let sorted = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&sorted, 0.0), 0.0);
        assert_eq!(percentile(&sorted, 50.0), 2.0);
        assert!((percentile(&sorted, 12.5) - 0.5).abs() < 1e-12);
        assert_eq!(percentile(&sorted, 100.0), 4.0);
    }
}
