//! Fit term: every auxiliary head regresses the same target.

use ndarray::Array2;

use crate::error::{ensure_finite, LunaError, Result};

/// Mean squared error over all heads and observations.
///
/// `outputs` has shape `(output_dim, n_obs)`; `y` has shape `(1, n_obs)` and
/// is broadcast across heads.
pub fn mean_mean_sq_error(outputs: &Array2<f64>, y: &Array2<f64>) -> Result<f64> {
    let residuals = residuals(outputs, y)?;
    let mse = residuals.mapv(|r| r * r).mean().unwrap_or(0.0);
    ensure_finite("mean squared error", mse)
}

/// Fit loss and its gradient with respect to `outputs`.
pub fn mean_mean_sq_error_with_grad(
    outputs: &Array2<f64>,
    y: &Array2<f64>,
) -> Result<(f64, Array2<f64>)> {
    let residuals = residuals(outputs, y)?;
    let count = residuals.len().max(1) as f64;
    let mse = ensure_finite(
        "mean squared error",
        residuals.iter().map(|r| r * r).sum::<f64>() / count,
    )?;
    let grad = residuals * (2.0 / count);
    Ok((mse, grad))
}

fn residuals(outputs: &Array2<f64>, y: &Array2<f64>) -> Result<Array2<f64>> {
    if y.nrows() != 1 || y.ncols() != outputs.ncols() {
        return Err(LunaError::shape(
            "mean_mean_sq_error target",
            &[1, outputs.ncols()],
            y.shape(),
        ));
    }
    Ok(outputs - y)
}
