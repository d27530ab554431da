//! Feed-forward network over a flattened parameter vector.
//!
//! Parameters live in one `Array1<f64>` so an optimizer can treat them as a
//! single vector. For every affine layer in order the vector holds the
//! row-major weight matrix `(out, in)` followed by the bias `(out)`.
//! Inputs are column-major batches: `x` has shape `(input_dim, n_obs)`.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::Serialize;

use super::activation::Activation;
use crate::error::{LunaError, Result};

/// Network shape and nonlinearity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Architecture {
    /// Width of every hidden layer.
    pub width: usize,
    /// Number of hidden layers (at least one).
    pub hidden_layers: usize,
    /// Dimensionality of each observation.
    pub input_dim: usize,
    /// Number of auxiliary output heads.
    pub output_dim: usize,
    pub activation: Activation,
}

impl Architecture {
    pub fn new(width: usize, hidden_layers: usize, input_dim: usize, output_dim: usize) -> Self {
        Self {
            width,
            hidden_layers,
            input_dim,
            output_dim,
            activation: Activation::Tanh,
        }
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.hidden_layers == 0 || self.input_dim == 0 || self.output_dim == 0
        {
            return Err(LunaError::InvalidConfig(format!(
                "architecture sizes must be positive: {self:?}"
            )));
        }
        Ok(())
    }

    fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.hidden_layers + 1);
        dims.push((self.width, self.input_dim));
        for _ in 1..self.hidden_layers {
            dims.push((self.width, self.width));
        }
        dims.push((self.output_dim, self.width));
        dims
    }
}

#[derive(Debug, Clone, Copy)]
struct LayerSlot {
    rows: usize,
    cols: usize,
    offset: usize,
}

impl LayerSlot {
    fn weight_range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.rows * self.cols
    }

    fn bias_range(&self) -> std::ops::Range<usize> {
        let start = self.offset + self.rows * self.cols;
        start..start + self.rows
    }
}

/// Pre- and post-activation values of one forward pass.
struct ForwardCache {
    /// `inputs[l]` is the input to affine layer `l`; `inputs[0] == x`.
    inputs: Vec<Array2<f64>>,
    /// Pre-activations of the hidden layers.
    pre: Vec<Array2<f64>>,
    output: Array2<f64>,
}

/// Fully connected network with `hidden_layers` activated layers and a
/// linear output layer producing one scalar per head.
#[derive(Debug, Clone)]
pub struct FeedForward {
    architecture: Architecture,
    slots: Vec<LayerSlot>,
    num_params: usize,
}

impl FeedForward {
    pub fn new(architecture: Architecture) -> Result<Self> {
        architecture.validate()?;
        let mut slots = Vec::new();
        let mut offset = 0;
        for (rows, cols) in architecture.layer_dims() {
            slots.push(LayerSlot { rows, cols, offset });
            offset += rows * cols + rows;
        }
        Ok(Self {
            architecture,
            slots,
            num_params: offset,
        })
    }

    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    /// Length of the flattened parameter vector.
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    /// Draws every parameter from N(0, 1).
    pub fn init_weights<R: Rng>(&self, rng: &mut R) -> Array1<f64> {
        Array1::from_shape_fn(self.num_params, |_| rng.sample::<f64, _>(StandardNormal))
    }

    /// Auxiliary outputs, shape `(output_dim, n_obs)`.
    pub fn forward(&self, weights: &Array1<f64>, x: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.forward_cached(weights, x)?.output)
    }

    /// Last hidden layer activations, shape `(width, n_obs)`.
    pub fn final_layer(&self, weights: &Array1<f64>, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut cache = self.forward_cached(weights, x)?;
        cache
            .inputs
            .pop()
            .ok_or_else(|| LunaError::InvalidConfig("network has no layers".into()))
    }

    /// Vector-Jacobian product of the outputs with respect to the weights.
    ///
    /// `cotangent` has the output shape `(output_dim, n_obs)`.
    pub fn backward(
        &self,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        cotangent: &Array2<f64>,
    ) -> Result<Array1<f64>> {
        let cache = self.forward_cached(weights, x)?;
        self.check_cotangent(cotangent, x.ncols())?;
        let act = self.architecture.activation;
        let last = self.slots.len() - 1;

        let mut grads: Vec<(Array2<f64>, Array1<f64>)> = Vec::with_capacity(self.slots.len());
        let mut delta = cotangent.to_owned();
        for l in (0..=last).rev() {
            grads.push((delta.dot(&cache.inputs[l].t()), delta.sum_axis(Axis(1))));
            if l > 0 {
                let w = self.layer_weights(weights, l)?;
                let upstream = w.t().dot(&delta);
                delta = upstream * &cache.pre[l - 1].mapv(|z| act.derivative(z));
            }
        }
        grads.reverse();
        Ok(self.pack(&grads))
    }

    /// Exact input Jacobian, shape `(input_dim, output_dim, n_obs)`.
    ///
    /// Entry `[d, h, n]` is the derivative of head `h` at observation `n`
    /// with respect to input coordinate `d`.
    pub fn input_jacobian(&self, weights: &Array1<f64>, x: &Array2<f64>) -> Result<Array3<f64>> {
        let cache = self.forward_cached(weights, x)?;
        let (input_dim, output_dim, n) = (
            self.architecture.input_dim,
            self.architecture.output_dim,
            x.ncols(),
        );

        let slices = (0..input_dim)
            .into_par_iter()
            .map(|d| {
                let tangents = self.tangents(weights, &cache, d, n)?;
                Ok(tangents.output)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut jacobian = Array3::zeros((input_dim, output_dim, n));
        for (d, slice) in slices.into_iter().enumerate() {
            jacobian.index_axis_mut(Axis(0), d).assign(&slice);
        }
        Ok(jacobian)
    }

    /// Gradient with respect to the weights of `<cotangent, input_jacobian(weights, x)>`.
    pub fn input_jacobian_pullback(
        &self,
        weights: &Array1<f64>,
        x: &Array2<f64>,
        cotangent: &Array3<f64>,
    ) -> Result<Array1<f64>> {
        let cache = self.forward_cached(weights, x)?;
        let n = x.ncols();
        let expected = [self.architecture.input_dim, self.architecture.output_dim, n];
        if cotangent.shape() != expected {
            return Err(LunaError::shape(
                "input_jacobian_pullback",
                &expected,
                cotangent.shape(),
            ));
        }

        let partials = (0..self.architecture.input_dim)
            .into_par_iter()
            .map(|d| {
                let tangents = self.tangents(weights, &cache, d, n)?;
                let seed = cotangent.index_axis(Axis(0), d).to_owned();
                self.tangent_pullback(weights, &cache, &tangents, seed)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut total = Array1::zeros(self.num_params);
        for partial in partials {
            total += &partial;
        }
        Ok(total)
    }

    fn forward_cached(&self, weights: &Array1<f64>, x: &Array2<f64>) -> Result<ForwardCache> {
        self.check_weights(weights)?;
        if x.nrows() != self.architecture.input_dim {
            return Err(LunaError::shape(
                "forward",
                &[self.architecture.input_dim, x.ncols()],
                x.shape(),
            ));
        }
        let act = self.architecture.activation;
        let last = self.slots.len() - 1;

        let mut inputs = Vec::with_capacity(self.slots.len());
        let mut pre = Vec::with_capacity(last);
        let mut h = x.to_owned();
        for l in 0..last {
            let z = self.affine(weights, l, &h)?;
            let next = z.mapv(|v| act.value(v));
            inputs.push(h);
            pre.push(z);
            h = next;
        }
        let output = self.affine(weights, last, &h)?;
        inputs.push(h);
        Ok(ForwardCache {
            inputs,
            pre,
            output,
        })
    }

    fn affine(&self, weights: &Array1<f64>, layer: usize, h: &Array2<f64>) -> Result<Array2<f64>> {
        let w = self.layer_weights(weights, layer)?;
        let b = self.layer_bias(weights, layer);
        Ok(w.dot(h) + &b.insert_axis(Axis(1)))
    }

    fn layer_weights<'a>(&self, weights: &'a Array1<f64>, layer: usize) -> Result<ArrayView2<'a, f64>> {
        let slot = self.slots[layer];
        weights
            .slice(s![slot.weight_range()])
            .into_shape((slot.rows, slot.cols))
            .map_err(|err| LunaError::InvalidConfig(format!("weight layout: {err}")))
    }

    fn layer_bias<'a>(&self, weights: &'a Array1<f64>, layer: usize) -> ArrayView1<'a, f64> {
        let slot = self.slots[layer];
        weights.slice(s![slot.bias_range()])
    }

    /// Forward-mode tangents for a unit perturbation of input coordinate `d`.
    fn tangents(
        &self,
        weights: &Array1<f64>,
        cache: &ForwardCache,
        d: usize,
        n: usize,
    ) -> Result<Tangents> {
        let act = self.architecture.activation;
        let last = self.slots.len() - 1;

        let mut seed = Array2::zeros((self.architecture.input_dim, n));
        seed.row_mut(d).fill(1.0);

        let mut inputs = Vec::with_capacity(self.slots.len());
        let mut pre = Vec::with_capacity(last);
        let mut t = seed;
        for l in 0..last {
            let dz = self.layer_weights(weights, l)?.dot(&t);
            let next = &dz * &cache.pre[l].mapv(|z| act.derivative(z));
            inputs.push(t);
            pre.push(dz);
            t = next;
        }
        let output = self.layer_weights(weights, last)?.dot(&t);
        inputs.push(t);
        Ok(Tangents {
            inputs,
            pre,
            output,
        })
    }

    /// Reverse pass through the tangent recursion for one input coordinate.
    fn tangent_pullback(
        &self,
        weights: &Array1<f64>,
        cache: &ForwardCache,
        tangents: &Tangents,
        seed: Array2<f64>,
    ) -> Result<Array1<f64>> {
        let act = self.architecture.activation;
        let last = self.slots.len() - 1;
        let n = seed.ncols();

        // `a`: cotangent of the layer's tangent pre-activation.
        // `c`: cotangent of the layer's primal pre-activation.
        let mut a = seed;
        let mut c = Array2::<f64>::zeros((self.architecture.output_dim, n));
        let mut grads: Vec<(Array2<f64>, Array1<f64>)> = Vec::with_capacity(self.slots.len());
        for l in (0..=last).rev() {
            let gw = a.dot(&tangents.inputs[l].t()) + c.dot(&cache.inputs[l].t());
            grads.push((gw, c.sum_axis(Axis(1))));
            if l > 0 {
                let w = self.layer_weights(weights, l)?;
                let g_tangent = w.t().dot(&a);
                let g_primal = w.t().dot(&c);
                let z = &cache.pre[l - 1];
                let dz = &tangents.pre[l - 1];
                let first = z.mapv(|v| act.derivative(v));
                let second = z.mapv(|v| act.second_derivative(v));
                c = &g_tangent * &second * dz + &g_primal * &first;
                a = g_tangent * &first;
            }
        }
        grads.reverse();
        Ok(self.pack(&grads))
    }

    fn pack(&self, grads: &[(Array2<f64>, Array1<f64>)]) -> Array1<f64> {
        let mut flat = Vec::with_capacity(self.num_params);
        for (gw, gb) in grads {
            flat.extend(gw.iter().copied());
            flat.extend(gb.iter().copied());
        }
        Array1::from(flat)
    }

    fn check_weights(&self, weights: &Array1<f64>) -> Result<()> {
        if weights.len() != self.num_params {
            return Err(LunaError::shape(
                "weights",
                &[self.num_params],
                &[weights.len()],
            ));
        }
        Ok(())
    }

    fn check_cotangent(&self, cotangent: &Array2<f64>, n: usize) -> Result<()> {
        let expected = [self.architecture.output_dim, n];
        if cotangent.shape() != expected {
            return Err(LunaError::shape("backward", &expected, cotangent.shape()));
        }
        Ok(())
    }
}

struct Tangents {
    /// Tangent of the input to each affine layer.
    inputs: Vec<Array2<f64>>,
    /// Tangent of each hidden pre-activation.
    pre: Vec<Array2<f64>>,
    output: Array2<f64>,
}
