//! 1-D regression data with a gap in the middle of the training inputs.
//!
//! Training inputs cover two regions of width `region_size` separated by
//! `gap_size`. Test inputs span the training range widened by
//! `boundary_size` on each side, so they cover both the gap and the
//! extrapolation boundary.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;

use crate::error::{LunaError, Result};
use crate::logging;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapDataConfig {
    pub number_of_points: usize,
    pub noise_variance: f64,
    pub region_size: f64,
    pub gap_size: f64,
    pub boundary_size: f64,
}

impl Default for GapDataConfig {
    fn default() -> Self {
        Self {
            number_of_points: 40,
            noise_variance: 9.0,
            region_size: 2.0,
            gap_size: 4.0,
            boundary_size: 1.0,
        }
    }
}

impl GapDataConfig {
    /// Smallest and largest training input.
    pub fn train_span(&self) -> (f64, f64) {
        let half_gap = self.gap_size / 2.0;
        (-half_gap - self.region_size, half_gap + self.region_size)
    }
}

/// Generated data. Every array has shape `(1, n)`.
#[derive(Debug, Clone)]
pub struct GapDataset {
    pub x_train: Array2<f64>,
    pub y_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub config: GapDataConfig,
}

impl GapDataset {
    /// Test points beyond the training span on either side.
    pub fn boundary_mask(&self) -> Vec<bool> {
        let (lo, hi) = self.config.train_span();
        self.x_test.iter().map(|&x| x < lo || x > hi).collect()
    }

    /// Test points strictly inside the gap between the training regions.
    pub fn gap_mask(&self) -> Vec<bool> {
        let half_gap = self.config.gap_size / 2.0;
        self.x_test.iter().map(|&x| x > -half_gap && x < half_gap).collect()
    }

    /// Test inputs selected by `mask`, shape `(1, m)`.
    pub fn select_test(&self, mask: &[bool]) -> Array2<f64> {
        let picked: Vec<f64> = self
            .x_test
            .iter()
            .zip(mask)
            .filter_map(|(&x, &keep)| keep.then_some(x))
            .collect();
        row(picked)
    }
}

#[derive(Serialize)]
struct GenerateLog<'a> {
    seed: u64,
    #[serde(flatten)]
    config: &'a GapDataConfig,
    train_points: usize,
    test_points: usize,
}

/// Cubic target used by the gap experiments.
pub fn default_generating_function(x: f64) -> f64 {
    x.powi(3)
}

/// Generates `y = f(x) + N(0, noise_variance)` on the gapped training inputs.
///
/// Each training region receives `number_of_points / 2` evenly spaced
/// points, and `number_of_points` test inputs are spread over the widened
/// span. The noise is drawn from a generator seeded with `seed`.
pub fn generate_data<F>(seed: u64, config: &GapDataConfig, f: F) -> Result<GapDataset>
where
    F: Fn(f64) -> f64,
{
    if config.number_of_points < 2 {
        return Err(LunaError::InvalidConfig(format!(
            "number_of_points must be at least 2, got {}",
            config.number_of_points
        )));
    }
    if config.region_size < 0.0 || config.gap_size < 0.0 || config.boundary_size < 0.0 {
        return Err(LunaError::InvalidConfig(
            "region, gap and boundary sizes must be non-negative".into(),
        ));
    }
    let noise = Normal::new(0.0, config.noise_variance.sqrt())
        .map_err(|err| LunaError::InvalidConfig(format!("noise variance: {err}")))?;
    let mut rng = StdRng::seed_from_u64(seed);

    let per_region = config.number_of_points / 2;
    let half_gap = config.gap_size / 2.0;
    let (lo, hi) = config.train_span();
    let mut x_train = Array1::linspace(lo, -half_gap, per_region).to_vec();
    x_train.extend(Array1::linspace(half_gap, hi, per_region).iter());
    let y_train: Vec<f64> = x_train.iter().map(|&x| f(x) + noise.sample(&mut rng)).collect();
    let x_test = Array1::linspace(
        lo - config.boundary_size,
        hi + config.boundary_size,
        config.number_of_points,
    );

    let train_points = x_train.len();
    let dataset = GapDataset {
        x_train: row(x_train),
        y_train: row(y_train),
        x_test: row(x_test.to_vec()),
        config: config.clone(),
    };
    logging::record(
        "generate_data",
        &GenerateLog {
            seed,
            config,
            train_points,
            test_points: config.number_of_points,
        },
    );
    Ok(dataset)
}

fn row(values: Vec<f64>) -> Array2<f64> {
    let len = values.len();
    Array2::from_shape_fn((1, len), |(_, i)| values[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn training_inputs_leave_a_gap() {
        let config = GapDataConfig::default();
        let data = generate_data(0, &config, default_generating_function).unwrap();
        assert_eq!(data.x_train.dim(), (1, 40));
        assert_eq!(data.y_train.dim(), (1, 40));
        assert_eq!(data.x_test.dim(), (1, 40));

        for (index, expected) in [(0, -4.0), (19, -2.0), (20, 2.0), (39, 4.0)] {
            assert!((data.x_train[[0, index]] - expected).abs() < 1e-12);
        }
        assert!(data.x_train.iter().all(|x| x.abs() >= 2.0 - 1e-12));
    }

    #[test]
    fn test_inputs_extend_past_boundary() {
        let data = generate_data(0, &GapDataConfig::default(), default_generating_function).unwrap();
        assert!((data.x_test[[0, 0]] + 5.0).abs() < 1e-12);
        assert!((data.x_test[[0, 39]] - 5.0).abs() < 1e-12);

        let boundary = data.boundary_mask();
        assert!(boundary[0] && boundary[39]);
        assert!(!boundary[20]);
        let gap = data.gap_mask();
        assert!(boundary.iter().zip(&gap).all(|(b, g)| !(*b && *g)));
        assert!(gap.iter().any(|g| *g));

        let edge = data.select_test(&boundary);
        assert_eq!(edge.ncols(), boundary.iter().filter(|b| **b).count());
        assert!(edge.iter().all(|x| x.abs() > 4.0));
    }

    #[test]
    fn noiseless_targets_follow_generating_function() {
        let config = GapDataConfig {
            noise_variance: 0.0,
            ..GapDataConfig::default()
        };
        let data = generate_data(3, &config, |x| 2.0 * x + 1.0).unwrap();
        for (x, y) in data.x_train.iter().zip(data.y_train.iter()) {
            assert!((y - (2.0 * x + 1.0)).abs() < 1e-12);
        }
    }

    #[test]
    fn seed_controls_noise() {
        let config = GapDataConfig::default();
        let a = generate_data(11, &config, default_generating_function).unwrap();
        let b = generate_data(11, &config, default_generating_function).unwrap();
        let c = generate_data(12, &config, default_generating_function).unwrap();
        assert_eq!(a.y_train, b.y_train);
        assert_ne!(a.y_train, c.y_train);
    }

    #[test]
    fn odd_point_counts_split_evenly() {
        let config = GapDataConfig {
            number_of_points: 9,
            ..GapDataConfig::default()
        };
        let data = generate_data(0, &config, default_generating_function).unwrap();
        assert_eq!(data.x_train.ncols(), 8);
        assert_eq!(data.y_train.ncols(), 8);
        assert_eq!(data.x_test.ncols(), 9);
    }

    #[test]
    fn rejects_degenerate_configs() {
        let tiny = GapDataConfig {
            number_of_points: 1,
            ..GapDataConfig::default()
        };
        assert!(matches!(
            generate_data(0, &tiny, default_generating_function),
            Err(LunaError::InvalidConfig(_))
        ));
        let negative = GapDataConfig {
            noise_variance: -1.0,
            ..GapDataConfig::default()
        };
        assert!(generate_data(0, &negative, default_generating_function).is_err());
    }
}
