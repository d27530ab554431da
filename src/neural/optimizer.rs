//! First-order optimizers over flattened parameter vectors.

use std::str::FromStr;

use ndarray::Array1;
use serde::Serialize;

use crate::error::Result;
use crate::luna::objective::{Objective, ObjectiveEvaluation};

/// A stateful update rule.
pub trait Optimizer {
    /// Applies one update in place. `iteration` starts at zero.
    fn step(&mut self, params: &mut Array1<f64>, grad: &Array1<f64>, iteration: usize);
}

/// Adam with bias-corrected moment estimates.
#[derive(Debug, Clone)]
pub struct Adam {
    pub step_size: f64,
    pub b1: f64,
    pub b2: f64,
    pub eps: f64,
    m: Array1<f64>,
    v: Array1<f64>,
}

impl Adam {
    pub fn new(step_size: f64, num_params: usize) -> Self {
        Self {
            step_size,
            b1: 0.9,
            b2: 0.999,
            eps: 1e-8,
            m: Array1::zeros(num_params),
            v: Array1::zeros(num_params),
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut Array1<f64>, grad: &Array1<f64>, iteration: usize) {
        let (b1, b2) = (self.b1, self.b2);
        self.m.zip_mut_with(grad, |m, &g| *m = (1.0 - b1) * g + b1 * *m);
        self.v.zip_mut_with(grad, |v, &g| *v = (1.0 - b2) * g * g + b2 * *v);

        let t = (iteration + 1) as i32;
        let m_scale = 1.0 / (1.0 - b1.powi(t));
        let v_scale = 1.0 / (1.0 - b2.powi(t));
        let (step, eps) = (self.step_size, self.eps);
        ndarray::Zip::from(params)
            .and(&self.m)
            .and(&self.v)
            .for_each(|p, &m, &v| {
                *p -= step * (m * m_scale) / ((v * v_scale).sqrt() + eps);
            });
    }
}

/// Stochastic gradient descent with momentum.
#[derive(Debug, Clone)]
pub struct Sgd {
    pub step_size: f64,
    pub mass: f64,
    velocity: Array1<f64>,
}

impl Sgd {
    pub fn new(step_size: f64, mass: f64, num_params: usize) -> Self {
        Self {
            step_size,
            mass,
            velocity: Array1::zeros(num_params),
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut Array1<f64>, grad: &Array1<f64>, _iteration: usize) {
        let mass = self.mass;
        self.velocity
            .zip_mut_with(grad, |v, &g| *v = mass * *v - (1.0 - mass) * g);
        params.scaled_add(self.step_size, &self.velocity);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl OptimizerKind {
    pub fn build(self, config: &OptimizerConfig, num_params: usize) -> Box<dyn Optimizer> {
        match self {
            OptimizerKind::Adam => Box::new(Adam::new(config.step_size, num_params)),
            OptimizerKind::Sgd => Box::new(Sgd::new(config.step_size, config.mass, num_params)),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adam" => Ok(OptimizerKind::Adam),
            "sgd" => Ok(OptimizerKind::Sgd),
            other => Err(format!("unknown optimizer `{other}`")),
        }
    }
}

/// `[optimizer]` section: training loop parameters.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub step_size: f64,
    pub max_iteration: usize,
    pub random_restarts: usize,
    /// Momentum for [`Sgd`]; ignored by Adam.
    pub mass: f64,
    pub log_every: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            step_size: 0.01,
            max_iteration: 1000,
            random_restarts: 1,
            mass: 0.9,
            log_every: 100,
        }
    }
}

/// Runs `max_iteration` optimizer steps on `objective` starting from `init`.
///
/// `callback` sees the weights and evaluation before each update. The first
/// objective error aborts the run.
pub fn minimize<O, F>(
    objective: &mut O,
    init: Array1<f64>,
    optimizer: &mut dyn Optimizer,
    max_iteration: usize,
    mut callback: F,
) -> Result<Array1<f64>>
where
    O: Objective + ?Sized,
    F: FnMut(&Array1<f64>, usize, &ObjectiveEvaluation),
{
    let mut weights = init;
    for iteration in 0..max_iteration {
        let evaluation = objective.evaluate(&weights, iteration)?;
        callback(&weights, iteration, &evaluation);
        optimizer.step(&mut weights, &evaluation.gradient, iteration);
    }
    Ok(weights)
}
