//! Shared algebra for mean-field location-scale families.
//!
//! λ = [μ (d), ln σ (d)] and θ = μ + σ ⊙ ε.

use ndarray::{s, Array1, Array2, ArrayView1};

use crate::error::{check_dim, Result};

pub(super) fn split(dim: usize, var_param: &Array1<f64>) -> Result<(ArrayView1<'_, f64>, ArrayView1<'_, f64>)> {
    check_dim(2 * dim, var_param.len())?;
    Ok((var_param.slice(s![..dim]), var_param.slice(s![dim..])))
}

pub(super) fn transform(dim: usize, var_param: &Array1<f64>, noise: &Array2<f64>) -> Result<Array2<f64>> {
    let (mean, ln_sd) = split(dim, var_param)?;
    check_dim(dim, noise.ncols())?;
    let sd = ln_sd.mapv(f64::exp);
    Ok(noise * &sd + &mean)
}

/// ∂θ/∂μ = 1 and ∂θ/∂ln σ = σ ε
pub(super) fn pullback(
    dim: usize,
    var_param: &Array1<f64>,
    noise: ArrayView1<f64>,
    grad_x: ArrayView1<f64>,
) -> Result<Array1<f64>> {
    let (_, ln_sd) = split(dim, var_param)?;
    check_dim(dim, noise.len())?;
    check_dim(dim, grad_x.len())?;
    let mut grad = Array1::zeros(2 * dim);
    grad.slice_mut(s![..dim]).assign(&grad_x);
    grad.slice_mut(s![dim..])
        .assign(&(&grad_x * &ln_sd.mapv(f64::exp) * &noise));
    Ok(grad)
}

/// ∇θ log q for a standardized density f with score `dlog_f(z)`, z = (θ-μ)/σ
pub(super) fn log_density_grad<F>(
    dim: usize,
    var_param: &Array1<f64>,
    x: ArrayView1<f64>,
    dlog_f: F,
) -> Result<Array1<f64>>
where
    F: Fn(f64) -> f64,
{
    let (mean, ln_sd) = split(dim, var_param)?;
    check_dim(dim, x.len())?;
    let grad = x
        .iter()
        .zip(mean.iter().zip(ln_sd.iter()))
        .map(|(&xi, (&m, &l))| {
            let inv_sd = (-l).exp();
            dlog_f((xi - m) * inv_sd) * inv_sd
        })
        .collect();
    Ok(grad)
}

/// The entropy of any location-scale family is Σ ln σ plus a constant.
pub(super) fn entropy_grad(dim: usize, var_param: &Array1<f64>) -> Result<Array1<f64>> {
    check_dim(2 * dim, var_param.len())?;
    let mut grad = Array1::zeros(2 * dim);
    grad.slice_mut(s![dim..]).fill(1.0);
    Ok(grad)
}

/// Diagonal covariance σ² scaled by the family's variance factor
pub(super) fn mean_and_diag_cov(
    dim: usize,
    var_param: &Array1<f64>,
    variance_factor: f64,
) -> Result<(Array1<f64>, Array2<f64>)> {
    let (mean, ln_sd) = split(dim, var_param)?;
    let var = ln_sd.mapv(|l| (2.0 * l).exp() * variance_factor);
    Ok((mean.to_owned(), Array2::from_diag(&var)))
}
