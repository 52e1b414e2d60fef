//! Variational objectives.
//!
//! An objective turns the current variational parameter λ into a noisy
//! estimate of a divergence together with its gradient. The optimizer only
//! ever sees [`ObjectiveSample`]s.
//!
//! # Exclusive KL
//!
//! KL(q || p) = E_q[log q(θ)] - E_q[log p(θ)] up to the normalizer of p.
//!
//! With θ = T(λ, ε), ε ~ base noise:
//!
//! - entropy form: `KL ≈ -(1/S) Σ log p(θ_s) - H[q]`,
//!   `∇λ ≈ -(1/S) Σ J_Tᵀ ∇log p(θ_s) - ∇H[q]`
//! - path-derivative form: `KL ≈ (1/S) Σ [log q(θ_s) - log p(θ_s)]`,
//!   `∇λ ≈ (1/S) Σ J_Tᵀ [∇θ log q(θ_s) - ∇log p(θ_s)]` with λ inside
//!   log q held fixed (the score term has zero mean)

use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::approximations::ApproximationFamily;
use crate::error::{check_dim, LentilError, Result};
use crate::models::LogDensity;

/// One Monte Carlo estimate of the objective and its gradient.
#[derive(Debug, Clone)]
pub struct ObjectiveSample {
    pub value: f64,
    pub grad: Array1<f64>,
}

/// A stochastic objective to be minimized over variational parameters.
pub trait VariationalObjective: Send + Sync {
    /// The approximation family the parameters belong to
    fn approx(&self) -> &dyn ApproximationFamily;

    /// The target density
    fn model(&self) -> &dyn LogDensity;

    /// Estimate the objective and its gradient at `var_param`
    fn evaluate(&self, var_param: &Array1<f64>, rng: &mut StdRng) -> Result<ObjectiveSample>;
}

/// Exclusive Kullback-Leibler divergence KL(q || p).
pub struct ExclusiveKL {
    approx: Arc<dyn ApproximationFamily>,
    model: Arc<dyn LogDensity>,
    num_mc_samples: usize,
    use_path_deriv: bool,
}

impl ExclusiveKL {
    /// # Arguments
    /// * `approx` - approximation family q
    /// * `model` - unnormalized target log p
    /// * `num_mc_samples` - Monte Carlo samples S per evaluation
    pub fn new(
        approx: Arc<dyn ApproximationFamily>,
        model: Arc<dyn LogDensity>,
        num_mc_samples: usize,
    ) -> Result<Self> {
        if num_mc_samples == 0 {
            return Err(LentilError::config("num_mc_samples must be positive"));
        }
        check_dim(approx.dim(), model.dim())?;
        Ok(Self {
            approx,
            model,
            num_mc_samples,
            use_path_deriv: false,
        })
    }

    /// Use the path-derivative estimator even when q has a closed-form entropy.
    pub fn with_path_deriv(mut self, use_path_deriv: bool) -> Self {
        self.use_path_deriv = use_path_deriv;
        self
    }

    pub fn num_mc_samples(&self) -> usize {
        self.num_mc_samples
    }

    fn uses_path_deriv(&self) -> bool {
        self.use_path_deriv || !self.approx.supports_entropy()
    }

    /// log p and ∇log p at every row of `samples`, kept in row order
    fn eval_model(&self, samples: &Array2<f64>) -> Result<Vec<(f64, Array1<f64>)>> {
        (0..samples.nrows())
            .into_par_iter()
            .map(|s| {
                let theta = samples.row(s).to_vec();
                self.model.log_density_and_grad(&theta)
            })
            .collect()
    }
}

impl VariationalObjective for ExclusiveKL {
    fn approx(&self) -> &dyn ApproximationFamily {
        self.approx.as_ref()
    }

    fn model(&self) -> &dyn LogDensity {
        self.model.as_ref()
    }

    fn evaluate(&self, var_param: &Array1<f64>, rng: &mut StdRng) -> Result<ObjectiveSample> {
        let approx = self.approx.as_ref();
        check_dim(approx.var_param_dim(), var_param.len())?;

        // 1. θ_s = T(λ, ε_s); noise is drawn sequentially so a seed pins it
        let noise = approx.sample_noise(self.num_mc_samples, rng);
        let samples = approx.transform(var_param, &noise)?;

        // 2. log p(θ_s), ∇log p(θ_s)
        let evals = self.eval_model(&samples)?;

        let path_deriv = self.uses_path_deriv();
        let nn = self.num_mc_samples as f64;

        // 3. accumulate in sample order
        let mut value = 0.0;
        let mut grad = Array1::<f64>::zeros(approx.var_param_dim());

        for (s, (lp, grad_lp)) in evals.into_iter().enumerate() {
            let theta = samples.row(s);
            let mut g_theta = -grad_lp;
            value -= lp;
            if path_deriv {
                value += approx.log_density(var_param, theta)?;
                g_theta += &approx.log_density_grad(var_param, theta)?;
            }
            grad += &approx.pullback(var_param, noise.row(s), g_theta.view())?;
        }

        value /= nn;
        grad /= nn;

        // 4. closed-form entropy
        if !path_deriv {
            value -= approx.entropy(var_param)?;
            grad -= &approx.entropy_grad(var_param)?;
        }

        Ok(ObjectiveSample { value, grad })
    }
}

/// Average objective value over `num_draws` independent evaluations.
///
/// Handy for comparing fitted parameters without the noise of one draw.
pub fn average_objective(
    objective: &dyn VariationalObjective,
    var_param: &Array1<f64>,
    num_draws: usize,
    rng: &mut StdRng,
) -> Result<f64> {
    if num_draws == 0 {
        return Err(LentilError::config("num_draws must be positive"));
    }
    let values = (0..num_draws)
        .map(|_| objective.evaluate(var_param, rng).map(|o| o.value))
        .collect::<Result<Array1<f64>>>()?;
    Ok(values.mean().unwrap_or(f64::NAN))
}
