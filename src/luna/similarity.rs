//! Pairwise squared-cosine similarity between auxiliary heads.
//!
//! Each head is represented by its whole Jacobian slice `J[:, h, :]`
//! flattened into one vector. The penalty sums `cos²(g_i, g_j)` over every
//! unordered pair `i < j`, so a single-head model always scores zero.

use ndarray::{Array2, Array3, ArrayView1, Axis};

use crate::error::{ensure_finite, LunaError, Result};

/// Squared cosine similarity `(a·b)² / ((a·a)(b·b))`.
///
/// No floor is applied to the denominator. A zero-norm vector yields
/// [`LunaError::NumericalDomain`].
pub fn cos_sim_sq(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<f64> {
    if a.len() != b.len() {
        return Err(LunaError::shape("cos_sim_sq", &[a.len()], &[b.len()]));
    }
    let numer = a.dot(&b).powi(2);
    let denom = a.dot(&a) * b.dot(&b);
    checked_ratio(numer, denom)
}

/// Sum of squared cosine similarity over all head pairs of `jacobian`
/// (shape `(input_dim, output_dim, n_obs)`).
pub fn similarity_score(jacobian: &Array3<f64>) -> Result<f64> {
    let heads = head_matrix(jacobian);
    let n_heads = heads.nrows();
    let mut score = 0.0;
    for i in 0..n_heads {
        for j in (i + 1)..n_heads {
            score += cos_sim_sq(heads.row(i), heads.row(j))?;
        }
    }
    Ok(score)
}

/// Similarity score and its gradient with respect to `jacobian`.
///
/// With Gram matrix `G = F Fᵀ` over flattened heads `F` and
/// `c_ij = G_ij² / (G_ii G_jj)`:
///
/// `∂/∂g_i = Σ_{j≠i} 2 G_ij / (G_ii G_jj) g_j − 2 c_ij / G_ii g_i`.
pub fn similarity_score_with_grad(jacobian: &Array3<f64>) -> Result<(f64, Array3<f64>)> {
    let heads = head_matrix(jacobian);
    let n_heads = heads.nrows();
    if n_heads < 2 {
        return Ok((0.0, Array3::zeros(jacobian.raw_dim())));
    }

    let gram = heads.dot(&heads.t());
    let mut coeffs = Array2::<f64>::zeros((n_heads, n_heads));
    let mut score = 0.0;
    for i in 0..n_heads {
        for j in (i + 1)..n_heads {
            let denom = gram[[i, i]] * gram[[j, j]];
            let c = checked_ratio(gram[[i, j]].powi(2), denom)?;
            score += c;

            let cross = 2.0 * gram[[i, j]] / denom;
            coeffs[[i, j]] = cross;
            coeffs[[j, i]] = cross;
            coeffs[[i, i]] -= 2.0 * c / gram[[i, i]];
            coeffs[[j, j]] -= 2.0 * c / gram[[j, j]];
        }
    }

    let flat_grad = coeffs.dot(&heads);
    let n_obs = jacobian.dim().2;
    let grad = Array3::from_shape_fn(jacobian.raw_dim(), |(d, h, n)| {
        flat_grad[[h, d * n_obs + n]]
    });
    Ok((score, grad))
}

/// Rows are heads, columns are the `(input_dim, n_obs)` slice in row-major order.
fn head_matrix(jacobian: &Array3<f64>) -> Array2<f64> {
    let (input_dim, n_heads, n_obs) = jacobian.dim();
    let mut heads = Array2::zeros((n_heads, input_dim * n_obs));
    for (h, mut row) in heads.axis_iter_mut(Axis(0)).enumerate() {
        let slice = jacobian.index_axis(Axis(1), h);
        for (dst, src) in row.iter_mut().zip(slice.iter()) {
            *dst = *src;
        }
    }
    heads
}

fn checked_ratio(numer: f64, denom: f64) -> Result<f64> {
    if denom == 0.0 || !denom.is_finite() {
        return Err(LunaError::NumericalDomain {
            context: "cosine similarity denominator",
            value: denom,
        });
    }
    ensure_finite("cosine similarity", numer / denom)
}
