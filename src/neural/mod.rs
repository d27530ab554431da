//! Feed-forward network, activations, and optimizers used by the neural linear model.

pub mod activation;
pub mod network;
pub mod optimizer;

pub use activation::Activation;
pub use network::{Architecture, FeedForward};
pub use optimizer::{minimize, Adam, Optimizer, OptimizerConfig, OptimizerKind, Sgd};
