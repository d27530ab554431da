//! Synthetic regression data for uncertainty experiments.

pub mod gap;

pub use gap::{default_generating_function, generate_data, GapDataConfig, GapDataset};
