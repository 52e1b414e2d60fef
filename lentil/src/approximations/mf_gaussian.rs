use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;

use super::location_scale;
use super::traits::ApproximationFamily;
use crate::error::{check_dim, LentilError, Result};

const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Mean-field Gaussian q(θ) = N(μ, diag(σ²))
///
/// Parameters are stored as mean μ and log standard deviation ln(σ),
/// λ = [μ, ln σ], so `var_param_dim = 2 * dim`.
#[derive(Debug, Clone)]
pub struct MFGaussian {
    dim: usize,
}

impl MFGaussian {
    /// Create a mean-field Gaussian over `dim` coordinates.
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(LentilError::InvalidOption {
                name: "dim",
                reason: "must be positive".into(),
            });
        }
        Ok(Self { dim })
    }
}

impl ApproximationFamily for MFGaussian {
    fn dim(&self) -> usize {
        self.dim
    }

    fn var_param_dim(&self) -> usize {
        2 * self.dim
    }

    fn sample_noise(&self, n: usize, rng: &mut StdRng) -> Array2<f64> {
        Array2::from_shape_simple_fn((n, self.dim), || rng.sample(StandardNormal))
    }

    fn transform(&self, var_param: &Array1<f64>, noise: &Array2<f64>) -> Result<Array2<f64>> {
        location_scale::transform(self.dim, var_param, noise)
    }

    fn pullback(
        &self,
        var_param: &Array1<f64>,
        noise: ArrayView1<f64>,
        grad_x: ArrayView1<f64>,
    ) -> Result<Array1<f64>> {
        location_scale::pullback(self.dim, var_param, noise, grad_x)
    }

    /// log N(θ; μ, σ²) = Σ -0.5 * [(θ-μ)²/σ² + 2*ln(σ) + ln(2π)]
    fn log_density(&self, var_param: &Array1<f64>, x: ArrayView1<f64>) -> Result<f64> {
        let (mean, ln_sd) = location_scale::split(self.dim, var_param)?;
        check_dim(self.dim, x.len())?;
        let lp = x
            .iter()
            .zip(mean.iter().zip(ln_sd.iter()))
            .map(|(&xi, (&m, &l))| {
                let z = (xi - m) * (-l).exp();
                -0.5 * (z * z + 2.0 * l + LN_2PI)
            })
            .sum();
        Ok(lp)
    }

    fn log_density_grad(&self, var_param: &Array1<f64>, x: ArrayView1<f64>) -> Result<Array1<f64>> {
        location_scale::log_density_grad(self.dim, var_param, x, |z| -z)
    }

    /// H = Σ ln σ + 0.5 * d * (1 + ln 2π)
    fn entropy(&self, var_param: &Array1<f64>) -> Result<f64> {
        let (_, ln_sd) = location_scale::split(self.dim, var_param)?;
        Ok(ln_sd.sum() + 0.5 * self.dim as f64 * (1.0 + LN_2PI))
    }

    fn entropy_grad(&self, var_param: &Array1<f64>) -> Result<Array1<f64>> {
        location_scale::entropy_grad(self.dim, var_param)
    }

    fn mean_and_cov(&self, var_param: &Array1<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
        location_scale::mean_and_diag_cov(self.dim, var_param, 1.0)
    }
}
