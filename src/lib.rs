//! # LUNA Core
//!
//! Neural linear models with diverse auxiliary heads. A feed-forward network
//! is trained so that several output heads all fit the same target while the
//! input Jacobians of those heads stay mutually dissimilar. Bayesian linear
//! regression on the final hidden layer then turns the network into a model
//! with predictive uncertainty.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use luna_core::{generate_data, default_generating_function, Architecture, Luna, LunaConfig};
//!
//! let config = LunaConfig::with_architecture(Architecture::new(50, 2, 1, 2));
//! let data = generate_data(config.data.seed, &config.data.gap_data(), default_generating_function)?;
//!
//! let mut model = Luna::from_config(&config)?;
//! let report = model.train(&data.x_train, &data.y_train, &config.optimizer, 100)?;
//! println!("fit = {:.3}, similarity = {:.3}", report.final_terms.fit, report.final_terms.similarity);
//!
//! let predictives = model.predict(&data.x_test, 100)?;
//! println!("{:?}", predictives.samples.dim());
//! # Ok::<(), luna_core::LunaError>(())
//! ```
//!
//! ## Core Modules
//!
//! - [`config`] - Experiment configuration via TOML
//! - [`luna`] - Jacobian estimators, similarity penalty and training objectives
//! - [`neural`] - Feed-forward network, activations and optimizers
//! - [`model`] - Neural linear model training loop
//! - [`bayes`] - Bayesian linear regression on final-layer features
//! - [`data`] - Synthetic gap-regression data
//! - [`viz`] - SVG diagnostics
//! - [`logging`] - JSON line-delimited logging

pub mod bayes;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod luna;
pub mod model;
pub mod neural;
pub mod viz;

pub use bayes::{bayes_lr_posterior, bayes_lr_predictives, BayesPosterior, PredictiveSummary, Predictives};
pub use config::{ConfigError, LunaConfig};
pub use data::{default_generating_function, generate_data, GapDataConfig, GapDataset};
pub use error::{LunaError, Result};
pub use luna::{
    Analytic, FiniteDifference, JacobianEstimator, JacobianKind, LunaObjective, LunaObjectiveBuilder,
    MseObjectiveBuilder, Objective, ObjectiveBuilder, ObjectiveTerms,
};
pub use model::{Luna, ModelConfig, Nlm, PlainNlm, TrainingReport};
pub use neural::{Activation, Architecture, FeedForward, OptimizerConfig, OptimizerKind};
pub use viz::{luna_snapshots, plot_posterior_predictive, plot_regression};
