//! Built-in target densities, written with candle tensor ops.

use std::sync::Arc;

use candle_core::{Device, Result, Tensor};
use clap::ValueEnum;

use crate::error::LentilError;
use crate::models::{CandleLogDensity, LogDensity};

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum TargetType {
    /// Isotropic Gaussian N(loc, scale² I)
    Normal,
    /// Equicorrelated Gaussian with unit variances and correlation rho
    Correlated,
    /// Non-centered eight schools hierarchical model (dimension 10)
    EightSchools,
}

pub const EIGHT_SCHOOLS_Y: [f64; 8] = [28., 8., -3., 7., -1., 1., 18., 12.];
pub const EIGHT_SCHOOLS_SIGMA: [f64; 8] = [15., 10., 16., 11., 9., 11., 10., 18.];
pub const EIGHT_SCHOOLS_DIM: usize = 10;

/// log N(θ; loc, scale² I), dropping constants
pub fn isotropic_normal(dim: usize, loc: f64, scale: f64) -> CandleLogDensity {
    let inv_var = 1.0 / (scale * scale);
    CandleLogDensity::new(dim, move |theta| {
        (theta - loc)?.sqr()?.sum_all()? * (-0.5 * inv_var)
    })
}

/// Precision of the equicorrelated covariance (1-ρ) I + ρ 11ᵀ:
/// P = [I - ρ/(1+(d-1)ρ) 11ᵀ] / (1-ρ)
fn equicorrelated_precision(dim: usize, rho: f64) -> Result<Tensor> {
    let off = -rho / (1.0 + (dim as f64 - 1.0) * rho);
    let prec: Vec<f64> = (0..dim * dim)
        .map(|ij| {
            let diag = if ij / dim == ij % dim { 1.0 } else { 0.0 };
            (diag + off) / (1.0 - rho)
        })
        .collect();
    Tensor::from_vec(prec, (dim, dim), &Device::Cpu)
}

/// log N(θ; 0, Σ) with Σ = (1-ρ) I + ρ 11ᵀ, dropping constants
pub fn correlated_normal(dim: usize, rho: f64) -> Result<CandleLogDensity> {
    let prec = equicorrelated_precision(dim, rho)?;
    Ok(CandleLogDensity::new(dim, move |theta| {
        let row = theta.unsqueeze(0)?;
        let quad = (row.matmul(&prec)? * &row)?.sum_all()?;
        quad * (-0.5)
    }))
}

/// Non-centered eight schools.
///
/// θ = [μ, ln τ, θ̃_1..θ̃_8] with
/// μ ~ N(0, 5), τ ~ half-Cauchy(0, 5), θ̃_j ~ N(0, 1),
/// y_j ~ N(μ + τ θ̃_j, σ_j). The ln τ Jacobian is included.
pub fn eight_schools() -> Result<CandleLogDensity> {
    let y = Tensor::new(&EIGHT_SCHOOLS_Y, &Device::Cpu)?;
    let sigma = Tensor::new(&EIGHT_SCHOOLS_SIGMA, &Device::Cpu)?;

    Ok(CandleLogDensity::new(EIGHT_SCHOOLS_DIM, move |theta| {
        let mu = theta.narrow(0, 0, 1)?;
        let ln_tau = theta.narrow(0, 1, 1)?;
        let theta_tilde = theta.narrow(0, 2, 8)?;
        let tau = ln_tau.exp()?;

        let lp_mu = ((&mu / 5.0)?.sqr()? * (-0.5))?;
        let lp_tau = ((&tau / 5.0)?.sqr()? + 1.0)?.log()?.neg()?;
        let lp_tilde = (theta_tilde.sqr()?.sum_all()? * (-0.5))?;

        let effect = theta_tilde.broadcast_mul(&tau)?.broadcast_add(&mu)?;
        let resid = (&y - &effect)?.div(&sigma)?;
        let lp_y = (resid.sqr()?.sum_all()? * (-0.5))?;

        let lp = (lp_mu.sum_all()? + lp_tau.sum_all()?)?;
        let lp = (lp + ln_tau.sum_all()?)?;
        (lp + lp_tilde)? + lp_y
    }))
}

fn invalid(name: &'static str, reason: String) -> LentilError {
    LentilError::InvalidOption { name, reason }
}

/// `scale` must be finite and positive
fn check_scale(scale: f64) -> crate::error::Result<()> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(invalid("scale", format!("must be finite and positive, got {}", scale)))
    }
}

/// (1-ρ) I + ρ 11ᵀ is positive definite iff -1/(d-1) < ρ < 1
fn check_rho(dim: usize, rho: f64) -> crate::error::Result<()> {
    let lower = if dim > 1 {
        -1.0 / (dim as f64 - 1.0)
    } else {
        f64::NEG_INFINITY
    };
    if rho.is_finite() && rho > lower && rho < 1.0 {
        Ok(())
    } else {
        Err(invalid(
            "rho",
            format!("must lie in ({}, 1) for dimension {}, got {}", lower, dim, rho),
        ))
    }
}

/// `dimension` is ignored for fixed-size targets; read it back with `dim()`.
pub fn build_target(
    target: TargetType,
    dimension: usize,
    loc: f64,
    scale: f64,
    rho: f64,
) -> crate::error::Result<Arc<dyn LogDensity>> {
    let out: Arc<dyn LogDensity> = match target {
        TargetType::Normal => {
            check_scale(scale)?;
            if !loc.is_finite() {
                return Err(invalid("loc", format!("must be finite, got {}", loc)));
            }
            Arc::new(isotropic_normal(dimension, loc, scale))
        }
        TargetType::Correlated => {
            check_rho(dimension, rho)?;
            Arc::new(correlated_normal(dimension, rho)?)
        }
        TargetType::EightSchools => Arc::new(eight_schools()?),
    };
    Ok(out)
}
