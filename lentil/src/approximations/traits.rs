use ndarray::{Array1, Array2, ArrayView1};
use rand::rngs::StdRng;

use crate::error::Result;

/// A parametric family q(θ; λ) with a reparameterized sampler.
pub trait ApproximationFamily: Send + Sync {
    /// Dimension of θ
    fn dim(&self) -> usize;

    /// Dimension of the variational parameter λ
    fn var_param_dim(&self) -> usize;

    /// Starting point for optimization: the zero vector
    fn init_param(&self) -> Array1<f64> {
        Array1::zeros(self.var_param_dim())
    }

    /// Draw parameter-free noise ε.
    ///
    /// # Returns
    /// Noise matrix, shape (n, dim)
    fn sample_noise(&self, n: usize, rng: &mut StdRng) -> Array2<f64>;

    /// Map noise to samples, θ = T(λ, ε) row by row.
    fn transform(&self, var_param: &Array1<f64>, noise: &Array2<f64>) -> Result<Array2<f64>>;

    /// Vector-Jacobian product `J_T(λ, ε)ᵀ g` for a single noise row.
    ///
    /// # Arguments
    /// * `noise` - one row of ε, length dim
    /// * `grad_x` - gradient w.r.t. θ at θ = T(λ, ε), length dim
    ///
    /// # Returns
    /// Gradient w.r.t. λ, length var_param_dim
    fn pullback(
        &self,
        var_param: &Array1<f64>,
        noise: ArrayView1<f64>,
        grad_x: ArrayView1<f64>,
    ) -> Result<Array1<f64>>;

    /// Draw `n` samples θ ~ q(θ; λ), shape (n, dim)
    fn sample(&self, var_param: &Array1<f64>, n: usize, rng: &mut StdRng) -> Result<Array2<f64>> {
        let noise = self.sample_noise(n, rng);
        self.transform(var_param, &noise)
    }

    /// log q(θ; λ)
    fn log_density(&self, var_param: &Array1<f64>, x: ArrayView1<f64>) -> Result<f64>;

    /// ∇θ log q(θ; λ) with λ held fixed
    fn log_density_grad(&self, var_param: &Array1<f64>, x: ArrayView1<f64>) -> Result<Array1<f64>>;

    /// Whether [`entropy`](Self::entropy) has a closed form
    fn supports_entropy(&self) -> bool {
        true
    }

    /// H[q(·; λ)]
    fn entropy(&self, var_param: &Array1<f64>) -> Result<f64>;

    /// ∇λ H[q(·; λ)]
    fn entropy_grad(&self, var_param: &Array1<f64>) -> Result<Array1<f64>>;

    /// Mean vector and covariance matrix of q
    fn mean_and_cov(&self, var_param: &Array1<f64>) -> Result<(Array1<f64>, Array2<f64>)>;
}
