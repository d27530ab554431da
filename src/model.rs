//! Neural linear model: a feed-forward network trained on an injected
//! objective, followed by Bayesian linear regression on its final hidden layer.
//!
//! [`Nlm`] is generic over the [`ObjectiveBuilder`] it trains with. The plain
//! model uses [`MseObjectiveBuilder`]; [`Luna`] swaps in the
//! similarity-regularized objective and otherwise shares the whole loop.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::bayes::{bayes_lr_posterior, bayes_lr_predictives, Predictives};
use crate::config::LunaConfig;
use crate::error::{LunaError, Result};
use crate::logging;
use crate::luna::{LunaObjectiveBuilder, MseObjectiveBuilder, Objective, ObjectiveBuilder, ObjectiveTerms};
use crate::neural::{minimize, Architecture, FeedForward, OptimizerConfig};

/// Bayesian and regularization settings of a neural linear model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelConfig {
    pub prior_variance: f64,
    pub y_noise_variance: f64,
    pub regularization_param: f64,
    /// Prepend a constant feature to the final-layer activations.
    pub fit_intercept: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            prior_variance: 1.0,
            y_noise_variance: 9.0,
            regularization_param: 0.0,
            fit_intercept: true,
        }
    }
}

/// Objective value and terms recorded at one optimizer iteration.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct IterationRecord {
    pub restart: usize,
    pub iteration: usize,
    pub value: f64,
    pub terms: ObjectiveTerms,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub objective: &'static str,
    pub iterations: usize,
    pub best_restart: usize,
    /// Final objective value of every restart, in order.
    pub restart_values: Vec<f64>,
    pub final_value: f64,
    pub final_terms: ObjectiveTerms,
}

#[derive(Serialize)]
struct IterationLog<'a> {
    objective: &'a str,
    #[serde(flatten)]
    record: IterationRecord,
}

#[derive(Serialize)]
struct RestartLog<'a> {
    objective: &'a str,
    restart: usize,
    final_value: f64,
    terms: ObjectiveTerms,
}

struct RestartOutcome {
    weights: Array1<f64>,
    weight_trace: Vec<Array1<f64>>,
    objective_trace: Vec<IterationRecord>,
    value: f64,
    terms: ObjectiveTerms,
}

/// Feed-forward network plus Bayesian linear regression on its final layer.
#[derive(Debug)]
pub struct Nlm<B: ObjectiveBuilder> {
    net: FeedForward,
    config: ModelConfig,
    builder: B,
    weights: Option<Array1<f64>>,
    weight_trace: Vec<Array1<f64>>,
    objective_trace: Vec<IterationRecord>,
    posterior: Option<Array2<f64>>,
    rng: StdRng,
}

/// Neural linear model trained on mean squared error alone.
pub type PlainNlm = Nlm<MseObjectiveBuilder>;

/// Neural linear model trained with the similarity-regularized objective.
pub type Luna = Nlm<LunaObjectiveBuilder>;

impl<B: ObjectiveBuilder> Nlm<B> {
    pub fn new(architecture: Architecture, config: ModelConfig, builder: B, seed: u64) -> Result<Self> {
        Ok(Self {
            net: FeedForward::new(architecture)?,
            config,
            builder,
            weights: None,
            weight_trace: Vec::new(),
            objective_trace: Vec::new(),
            posterior: None,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn network(&self) -> &FeedForward {
        &self.net
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }

    /// Weights after the last call to [`Nlm::fit`].
    pub fn weights(&self) -> Option<&Array1<f64>> {
        self.weights.as_ref()
    }

    /// Weights seen by the objective at each iteration of the kept restart.
    pub fn weight_trace(&self) -> &[Array1<f64>] {
        &self.weight_trace
    }

    pub fn objective_trace(&self) -> &[IterationRecord] {
        &self.objective_trace
    }

    /// Posterior samples over final-layer regression coefficients, `(samples, k)`.
    pub fn posterior(&self) -> Option<&Array2<f64>> {
        self.posterior.as_ref()
    }

    /// Optimizes the network weights, keeping the restart with the lowest
    /// final objective value. Clears any previous posterior.
    pub fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        optimizer: &OptimizerConfig,
    ) -> Result<TrainingReport> {
        let mut objective =
            self.builder
                .build(&self.net, x, y, self.config.regularization_param)?;
        let name = self.builder.name();
        let log_every = optimizer.log_every.max(1);
        let restarts = optimizer.random_restarts.max(1);

        let mut best: Option<(usize, RestartOutcome)> = None;
        let mut restart_values = Vec::with_capacity(restarts);
        for restart in 0..restarts {
            let init = self.net.init_weights(&mut self.rng);
            let mut weight_trace = Vec::with_capacity(optimizer.max_iteration);
            let mut objective_trace = Vec::with_capacity(optimizer.max_iteration);
            let mut stepper = optimizer.kind.build(optimizer, self.net.num_params());

            let weights = minimize(
                &mut objective,
                init,
                stepper.as_mut(),
                optimizer.max_iteration,
                |weights, iteration, evaluation| {
                    let record = IterationRecord {
                        restart,
                        iteration,
                        value: evaluation.value,
                        terms: evaluation.terms,
                    };
                    if iteration % log_every == 0 {
                        logging::record(
                            "nlm_iteration",
                            &IterationLog {
                                objective: name,
                                record,
                            },
                        );
                    }
                    weight_trace.push(weights.clone());
                    objective_trace.push(record);
                },
            )?;

            let last = objective.evaluate(&weights, optimizer.max_iteration)?;
            logging::record(
                "nlm_restart",
                &RestartLog {
                    objective: name,
                    restart,
                    final_value: last.value,
                    terms: last.terms,
                },
            );
            restart_values.push(last.value);

            let outcome = RestartOutcome {
                weights,
                weight_trace,
                objective_trace,
                value: last.value,
                terms: last.terms,
            };
            match &best {
                Some((_, kept)) if kept.value <= outcome.value => {}
                _ => best = Some((restart, outcome)),
            }
        }

        let (best_restart, outcome) = best.ok_or_else(|| {
            LunaError::InvalidConfig("training needs at least one restart".into())
        })?;
        self.weights = Some(outcome.weights);
        self.weight_trace = outcome.weight_trace;
        self.objective_trace = outcome.objective_trace;
        self.posterior = None;

        Ok(TrainingReport {
            objective: name,
            iterations: optimizer.max_iteration,
            best_restart,
            restart_values,
            final_value: outcome.value,
            final_terms: outcome.terms,
        })
    }

    /// Fits the network, then samples the Bayesian linear regression
    /// posterior on its final-layer features.
    pub fn train(
        &mut self,
        x: &Array2<f64>,
        y: &Array2<f64>,
        optimizer: &OptimizerConfig,
        samples: usize,
    ) -> Result<TrainingReport> {
        let report = self.fit(x, y, optimizer)?;
        let weights = self.trained_weights()?.clone();
        self.posterior = Some(self.sample_posterior(&weights, x, y, samples)?);
        Ok(report)
    }

    /// Design matrix `(n_obs, k)`: final-layer activations, with a leading
    /// column of ones when `fit_intercept` is set.
    pub fn features(&self, weights: &Array1<f64>, x: &Array2<f64>) -> Result<Array2<f64>> {
        let hidden = self.net.final_layer(weights, x)?;
        let (width, n_obs) = hidden.dim();
        if !self.config.fit_intercept {
            return Ok(hidden.reversed_axes());
        }
        Ok(Array2::from_shape_fn((n_obs, width + 1), |(i, j)| {
            if j == 0 {
                1.0
            } else {
                hidden[[j - 1, i]]
            }
        }))
    }

    /// Posterior samples using the weights recorded at `iteration`.
    pub fn posterior_at(
        &mut self,
        iteration: usize,
        x: &Array2<f64>,
        y: &Array2<f64>,
        samples: usize,
    ) -> Result<Array2<f64>> {
        let weights = self.traced_weights(iteration)?.clone();
        self.sample_posterior(&weights, x, y, samples)
    }

    /// Posterior predictive draws at `x_test` from the trained model.
    pub fn predict(&mut self, x_test: &Array2<f64>, n: usize) -> Result<Predictives> {
        let posterior = self.posterior.as_ref().ok_or_else(|| {
            LunaError::InvalidConfig("predict called before train".into())
        })?;
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| LunaError::InvalidConfig("model has not been fit".into()))?;
        let features = self.features(weights, x_test)?;
        bayes_lr_predictives(self.config.y_noise_variance, posterior, &features, n, &mut self.rng)
    }

    /// Posterior predictive draws at `x_test` using the weights of one iteration.
    pub fn predictives_at(
        &mut self,
        iteration: usize,
        x_train: &Array2<f64>,
        y_train: &Array2<f64>,
        x_test: &Array2<f64>,
        samples: usize,
        n: usize,
    ) -> Result<Predictives> {
        let weights = self.traced_weights(iteration)?.clone();
        let posterior = self.sample_posterior(&weights, x_train, y_train, samples)?;
        let features = self.features(&weights, x_test)?;
        bayes_lr_predictives(self.config.y_noise_variance, &posterior, &features, n, &mut self.rng)
    }

    /// Outputs of every auxiliary head, `(output_dim, n_obs)`.
    pub fn auxiliary_outputs(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.net.forward(self.trained_weights()?, x)
    }

    pub fn auxiliary_outputs_at(&self, iteration: usize, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.net.forward(self.traced_weights(iteration)?, x)
    }

    fn sample_posterior(
        &mut self,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        y: &Array2<f64>,
        samples: usize,
    ) -> Result<Array2<f64>> {
        if y.nrows() != 1 || y.ncols() != x.ncols() {
            return Err(LunaError::shape("posterior targets", &[1, x.ncols()], y.shape()));
        }
        let features = self.features(weights, x)?;
        let targets = y.row(0).to_owned();
        bayes_lr_posterior(
            self.config.prior_variance,
            self.config.y_noise_variance,
            &features,
            &targets,
            samples,
            &mut self.rng,
        )
    }

    fn trained_weights(&self) -> Result<&Array1<f64>> {
        self.weights
            .as_ref()
            .ok_or_else(|| LunaError::InvalidConfig("model has not been fit".into()))
    }

    fn traced_weights(&self, iteration: usize) -> Result<&Array1<f64>> {
        self.weight_trace.get(iteration).ok_or_else(|| {
            LunaError::InvalidConfig(format!(
                "iteration {iteration} not in weight trace of length {}",
                self.weight_trace.len()
            ))
        })
    }
}

impl Nlm<LunaObjectiveBuilder> {
    /// Builds a LUNA model from a validated configuration. The Jacobian
    /// estimator is chosen by `model.jacobian`.
    pub fn from_config(config: &LunaConfig) -> Result<Self> {
        config.validate()?;
        let estimator = config
            .model
            .jacobian
            .build(config.model.finite_difference_std);
        let builder = LunaObjectiveBuilder::new(
            config.model.similarity_param,
            estimator,
            config.data.seed.wrapping_add(1),
        );
        Self::new(
            config.architecture.clone(),
            config.model.model(),
            builder,
            config.data.seed,
        )
    }

    pub fn similarity_param(&self) -> f64 {
        self.builder.similarity_param
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::luna::JacobianKind;
    use crate::neural::OptimizerKind;

    fn toy_data() -> (Array2<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((1, 12), |(_, n)| -1.0 + 2.0 * n as f64 / 11.0);
        let y = x.mapv(|v| v.powi(3));
        (x, y)
    }

    fn short_run(max_iteration: usize, random_restarts: usize) -> OptimizerConfig {
        OptimizerConfig {
            max_iteration,
            random_restarts,
            log_every: 1000,
            ..OptimizerConfig::default()
        }
    }

    fn plain(width: usize, output_dim: usize) -> PlainNlm {
        let config = ModelConfig {
            y_noise_variance: 0.01,
            ..ModelConfig::default()
        };
        Nlm::new(Architecture::new(width, 1, 1, output_dim), config, MseObjectiveBuilder, 3).unwrap()
    }

    #[test]
    fn features_prepend_intercept_column() {
        let model = plain(5, 2);
        let (x, _) = toy_data();
        let w = model.network().init_weights(&mut StdRng::seed_from_u64(0));
        let features = model.features(&w, &x).unwrap();
        assert_eq!(features.dim(), (12, 6));
        assert!(features.column(0).iter().all(|v| *v == 1.0));

        let hidden = model.network().final_layer(&w, &x).unwrap();
        assert_eq!(features[[3, 2]], hidden[[1, 3]]);
    }

    #[test]
    fn features_without_intercept_are_transposed_activations() {
        let mut model = plain(4, 1);
        model.config.fit_intercept = false;
        let (x, _) = toy_data();
        let w = model.network().init_weights(&mut StdRng::seed_from_u64(1));
        let features = model.features(&w, &x).unwrap();
        assert_eq!(features.dim(), (12, 4));
    }

    #[test]
    fn fit_keeps_best_restart_and_traces() {
        let mut model = plain(6, 2);
        let (x, y) = toy_data();
        let report = model.fit(&x, &y, &short_run(40, 3)).unwrap();

        assert_eq!(report.objective, "nlm");
        assert_eq!(report.restart_values.len(), 3);
        let lowest = report.restart_values.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(report.final_value, lowest);
        assert_eq!(report.restart_values[report.best_restart], lowest);

        assert_eq!(model.weight_trace().len(), 40);
        assert_eq!(model.objective_trace().len(), 40);
        assert!(model
            .objective_trace()
            .iter()
            .all(|record| record.restart == report.best_restart));
        assert!(model.posterior().is_none());
    }

    #[test]
    fn fit_reduces_mse_on_noiseless_data() {
        let mut model = plain(10, 1);
        let (x, y) = toy_data();
        model.fit(&x, &y, &short_run(300, 1)).unwrap();
        let trace = model.objective_trace();
        let first = trace[0].terms.fit;
        let last = trace[trace.len() - 1].terms.fit;
        assert!(last < first, "fit went from {first} to {last}");
    }

    #[test]
    fn predict_before_train_is_rejected() {
        let mut model = plain(4, 2);
        let (x, _) = toy_data();
        assert!(matches!(model.predict(&x, 10), Err(LunaError::InvalidConfig(_))));
        assert!(matches!(model.auxiliary_outputs(&x), Err(LunaError::InvalidConfig(_))));
    }

    #[test]
    fn train_then_predict_has_expected_shapes() {
        let mut model = plain(6, 2);
        let (x, y) = toy_data();
        model.train(&x, &y, &short_run(50, 1), 30).unwrap();
        assert_eq!(model.posterior().map(|p| p.dim()), Some((30, 7)));

        let x_test = Array2::from_shape_fn((1, 9), |(_, n)| -2.0 + 0.5 * n as f64);
        let predictives = model.predict(&x_test, 80).unwrap();
        assert_eq!(predictives.mean_samples.dim(), (30, 9));
        assert_eq!(predictives.samples.dim(), (80, 9));
        assert_eq!(model.auxiliary_outputs(&x_test).unwrap().dim(), (2, 9));
    }

    #[test]
    fn trace_lookups_reject_unknown_iterations() {
        let mut model = plain(4, 2);
        let (x, y) = toy_data();
        model.fit(&x, &y, &short_run(5, 1)).unwrap();
        assert!(model.auxiliary_outputs_at(4, &x).is_ok());
        assert!(matches!(
            model.posterior_at(5, &x, &y, 10),
            Err(LunaError::InvalidConfig(_))
        ));
        let posterior = model.posterior_at(0, &x, &y, 10).unwrap();
        assert_eq!(posterior.dim(), (10, 5));
    }

    #[test]
    fn luna_from_config_trains_with_selected_estimator() {
        let mut config = LunaConfig::with_architecture(Architecture::new(5, 1, 1, 2));
        config.model.jacobian = JacobianKind::Analytic;
        config.model.similarity_param = 0.5;
        config.optimizer = OptimizerConfig {
            kind: OptimizerKind::Sgd,
            step_size: 1e-3,
            ..short_run(10, 1)
        };
        let mut model = Luna::from_config(&config).unwrap();
        assert_eq!(model.similarity_param(), 0.5);
        assert_eq!(model.builder().estimator.name(), "analytic");

        let (x, y) = toy_data();
        let report = model.fit(&x, &y, &config.optimizer).unwrap();
        assert_eq!(report.objective, "luna");
        assert!(report.final_value.is_finite());
    }

    #[test]
    fn luna_from_config_rejects_invalid_config() {
        let mut config = LunaConfig::with_architecture(Architecture::new(5, 1, 1, 2));
        config.optimizer.random_restarts = 0;
        assert!(matches!(Luna::from_config(&config), Err(LunaError::InvalidConfig(_))));
    }
}
