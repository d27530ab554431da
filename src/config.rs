//! Experiment configuration via TOML files.
//!
//! Every section is optional except `[architecture]`, whose four size keys
//! must be present. Missing optional keys fall back to the defaults below.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use toml::value::Table;
use toml::Value;

use crate::data::GapDataConfig;
use crate::error::{LunaError, Result};
use crate::luna::JacobianKind;
use crate::model::ModelConfig;
use crate::neural::activation::Activation;
use crate::neural::network::Architecture;
use crate::neural::optimizer::{OptimizerConfig, OptimizerKind};

/// Full configuration of one LUNA experiment.
///
/// # Examples
///
/// ```
/// use luna_core::LunaConfig;
///
/// let config = LunaConfig::from_str(
///     "[architecture]\nwidth = 20\nhidden_layers = 1\ninput_dim = 1\noutput_dim = 2",
/// )
/// .unwrap();
/// assert_eq!(config.architecture.output_dim, 2);
/// assert_eq!(config.data.training_sample_size, 40);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct LunaConfig {
    pub data: DataConfig,
    pub architecture: Architecture,
    pub model: LunaModelConfig,
    pub optimizer: OptimizerConfig,
    pub output: OutputConfig,
}

/// `[data]` section: synthetic gap-regression data.
#[derive(Debug, Clone, Serialize)]
pub struct DataConfig {
    pub training_sample_size: usize,
    pub y_noise_variance: f64,
    pub region_size: f64,
    pub gap_size: f64,
    pub boundary_size: f64,
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            training_sample_size: 40,
            y_noise_variance: 9.0,
            region_size: 2.0,
            gap_size: 4.0,
            boundary_size: 1.0,
            seed: 42,
        }
    }
}

impl DataConfig {
    pub fn gap_data(&self) -> GapDataConfig {
        GapDataConfig {
            number_of_points: self.training_sample_size,
            noise_variance: self.y_noise_variance,
            region_size: self.region_size,
            gap_size: self.gap_size,
            boundary_size: self.boundary_size,
        }
    }
}

/// `[model]` section: Bayesian and similarity hyper-parameters.
#[derive(Debug, Clone, Serialize)]
pub struct LunaModelConfig {
    pub prior_variance: f64,
    pub y_noise_variance: f64,
    pub regularization_param: f64,
    pub similarity_param: f64,
    pub jacobian: JacobianKind,
    pub finite_difference_std: f64,
    pub fit_intercept: bool,
}

impl LunaModelConfig {
    fn defaults_for(data: &DataConfig) -> Self {
        Self {
            prior_variance: 1.0,
            y_noise_variance: data.y_noise_variance,
            regularization_param: 0.0,
            similarity_param: 1.0,
            jacobian: JacobianKind::FiniteDifference,
            finite_difference_std: 0.1,
            fit_intercept: true,
        }
    }

    pub fn model(&self) -> ModelConfig {
        ModelConfig {
            prior_variance: self.prior_variance,
            y_noise_variance: self.y_noise_variance,
            regularization_param: self.regularization_param,
            fit_intercept: self.fit_intercept,
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize)]
pub struct OutputConfig {
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "scratch".to_string(),
        }
    }
}

impl LunaConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> std::result::Result<Self, ConfigError> {
        let value: Value =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        let data = parse_data(&section(&value, "data"))?;
        let architecture = parse_architecture(&value)?;
        let model = parse_model(&section(&value, "model"), &data)?;
        let optimizer = parse_optimizer(&section(&value, "optimizer"))?;
        let output = section(&value, "output")
            .get("directory")
            .and_then(|v| v.as_str())
            .map(|dir| OutputConfig {
                directory: dir.to_string(),
            })
            .unwrap_or_default();

        Ok(Self {
            data,
            architecture,
            model,
            optimizer,
            output,
        })
    }

    /// Builds a configuration from an architecture, with every other section defaulted.
    pub fn with_architecture(architecture: Architecture) -> Self {
        let data = DataConfig::default();
        let model = LunaModelConfig::defaults_for(&data);
        Self {
            data,
            architecture,
            model,
            optimizer: OptimizerConfig::default(),
            output: OutputConfig::default(),
        }
    }

    /// Checks value constraints that TOML types alone cannot express.
    pub fn validate(&self) -> Result<()> {
        self.architecture.validate()?;
        if self.data.training_sample_size < 2 {
            return Err(LunaError::InvalidConfig(
                "training_sample_size must be at least 2".into(),
            ));
        }
        positive("data.y_noise_variance", self.data.y_noise_variance)?;
        positive("model.prior_variance", self.model.prior_variance)?;
        positive("model.y_noise_variance", self.model.y_noise_variance)?;
        positive("model.finite_difference_std", self.model.finite_difference_std)?;
        positive("optimizer.step_size", self.optimizer.step_size)?;
        if self.model.regularization_param < 0.0 {
            return Err(LunaError::InvalidConfig(
                "model.regularization_param must be non-negative".into(),
            ));
        }
        if self.optimizer.max_iteration == 0 {
            return Err(LunaError::InvalidConfig(
                "optimizer.max_iteration must be at least 1".into(),
            ));
        }
        if self.optimizer.random_restarts == 0 {
            return Err(LunaError::InvalidConfig(
                "optimizer.random_restarts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(LunaError::InvalidConfig(format!(
            "{name} must be positive, got {value}"
        )))
    }
}

fn section(value: &Value, name: &str) -> Table {
    value
        .get(name)
        .and_then(|v| v.as_table())
        .cloned()
        .unwrap_or_default()
}

fn get_float(table: &Table, key: &str) -> std::result::Result<Option<f64>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) => {
            if let Some(float) = value.as_float() {
                Ok(Some(float))
            } else if let Some(int) = value.as_integer() {
                Ok(Some(int as f64))
            } else {
                Err(ConfigError::Parse(format!("{key} must be a number")))
            }
        }
    }
}

fn get_usize(table: &Table, key: &str) -> std::result::Result<Option<usize>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .filter(|v| *v >= 0)
            .map(|v| Some(v as usize))
            .ok_or_else(|| ConfigError::Parse(format!("{key} must be a non-negative integer"))),
    }
}

fn get_bool(table: &Table, key: &str) -> std::result::Result<Option<bool>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| ConfigError::Parse(format!("{key} must be a boolean"))),
    }
}

fn get_parsed<T: FromStr<Err = String>>(
    table: &Table,
    key: &str,
) -> std::result::Result<Option<T>, ConfigError> {
    match table.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .ok_or_else(|| ConfigError::Parse(format!("{key} must be a string")))?
            .parse()
            .map(Some)
            .map_err(ConfigError::Parse),
    }
}

fn parse_data(table: &Table) -> std::result::Result<DataConfig, ConfigError> {
    let defaults = DataConfig::default();
    Ok(DataConfig {
        training_sample_size: get_usize(table, "training_sample_size")?
            .unwrap_or(defaults.training_sample_size),
        y_noise_variance: get_float(table, "y_noise_variance")?
            .unwrap_or(defaults.y_noise_variance),
        region_size: get_float(table, "region_size")?.unwrap_or(defaults.region_size),
        gap_size: get_float(table, "gap_size")?.unwrap_or(defaults.gap_size),
        boundary_size: get_float(table, "boundary_size")?.unwrap_or(defaults.boundary_size),
        seed: get_usize(table, "seed")?
            .map(|v| v as u64)
            .unwrap_or(defaults.seed),
    })
}

fn parse_architecture(value: &Value) -> std::result::Result<Architecture, ConfigError> {
    let table = value
        .get("architecture")
        .and_then(|v| v.as_table())
        .ok_or_else(|| ConfigError::MissingKey("architecture".into()))?;

    let required = |key: &str| -> std::result::Result<usize, ConfigError> {
        get_usize(table, key)?.ok_or_else(|| ConfigError::MissingKey(format!("architecture.{key}")))
    };

    Ok(Architecture {
        width: required("width")?,
        hidden_layers: required("hidden_layers")?,
        input_dim: required("input_dim")?,
        output_dim: required("output_dim")?,
        activation: get_parsed::<Activation>(table, "activation")?.unwrap_or(Activation::Tanh),
    })
}

fn parse_model(
    table: &Table,
    data: &DataConfig,
) -> std::result::Result<LunaModelConfig, ConfigError> {
    let defaults = LunaModelConfig::defaults_for(data);
    Ok(LunaModelConfig {
        prior_variance: get_float(table, "prior_variance")?.unwrap_or(defaults.prior_variance),
        y_noise_variance: get_float(table, "y_noise_variance")?
            .unwrap_or(defaults.y_noise_variance),
        regularization_param: get_float(table, "regularization_param")?
            .unwrap_or(defaults.regularization_param),
        similarity_param: get_float(table, "similarity_param")?
            .unwrap_or(defaults.similarity_param),
        jacobian: get_parsed::<JacobianKind>(table, "jacobian")?.unwrap_or(defaults.jacobian),
        finite_difference_std: get_float(table, "finite_difference_std")?
            .unwrap_or(defaults.finite_difference_std),
        fit_intercept: get_bool(table, "fit_intercept")?.unwrap_or(defaults.fit_intercept),
    })
}

fn parse_optimizer(table: &Table) -> std::result::Result<OptimizerConfig, ConfigError> {
    let defaults = OptimizerConfig::default();
    Ok(OptimizerConfig {
        kind: get_parsed::<OptimizerKind>(table, "kind")?.unwrap_or(defaults.kind),
        step_size: get_float(table, "step_size")?.unwrap_or(defaults.step_size),
        max_iteration: get_usize(table, "max_iteration")?.unwrap_or(defaults.max_iteration),
        random_restarts: get_usize(table, "random_restarts")?
            .unwrap_or(defaults.random_restarts),
        mass: get_float(table, "mass")?.unwrap_or(defaults.mass),
        log_every: get_usize(table, "log_every")?
            .map(|v| v.max(1))
            .unwrap_or(defaults.log_every),
    })
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
    MissingKey(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
            ConfigError::MissingKey(key) => write!(f, "Missing required key: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}
