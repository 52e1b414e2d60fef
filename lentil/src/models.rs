//! Target densities.
//!
//! Everything downstream (objectives, optimizer) only needs the
//! [`LogDensity`] capability: an unnormalized log density together with
//! its gradient. How the gradient is obtained is up to the implementation:
//!
//! - [`FnLogDensity`]: the caller supplies value and gradient directly
//! - [`CandleLogDensity`]: the density is written with candle tensor ops
//!   and differentiated in reverse mode
//! - [`FitModel`]: adapts an external fitted-model handle ([`PosteriorFit`])

use std::sync::Arc;

use candle_core::{DType, Device, Tensor, Var};
use ndarray::Array1;

use crate::error::{check_dim, LentilError, Result};

/// Unnormalized log density with gradient.
pub trait LogDensity: Send + Sync {
    /// Dimension of the parameter θ
    fn dim(&self) -> usize;

    /// Evaluate log p(θ) up to a constant
    fn log_density(&self, x: &[f64]) -> Result<f64> {
        Ok(self.log_density_and_grad(x)?.0)
    }

    /// Evaluate log p(θ) and ∇θ log p(θ)
    fn log_density_and_grad(&self, x: &[f64]) -> Result<(f64, Array1<f64>)>;
}

type ValueGradFn = dyn Fn(&[f64]) -> (f64, Vec<f64>) + Send + Sync;

/// Log density given as a closure returning `(value, gradient)`.
pub struct FnLogDensity {
    dim: usize,
    func: Box<ValueGradFn>,
}

impl FnLogDensity {
    pub fn new<F>(dim: usize, func: F) -> Self
    where
        F: Fn(&[f64]) -> (f64, Vec<f64>) + Send + Sync + 'static,
    {
        Self {
            dim,
            func: Box::new(func),
        }
    }
}

impl LogDensity for FnLogDensity {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_density_and_grad(&self, x: &[f64]) -> Result<(f64, Array1<f64>)> {
        check_dim(self.dim, x.len())?;
        let (value, grad) = (self.func)(x);
        check_dim(self.dim, grad.len())?;
        Ok((value, Array1::from(grad)))
    }
}

type TensorFn = dyn Fn(&Tensor) -> candle_core::Result<Tensor> + Send + Sync;

/// Log density written with candle tensor operations.
///
/// The closure receives θ as a rank-1 `F64` tensor of length `dim` and
/// must return a tensor whose total sum is log p(θ). Gradients come from
/// candle's reverse-mode `backward`.
pub struct CandleLogDensity {
    dim: usize,
    func: Box<TensorFn>,
}

impl CandleLogDensity {
    pub fn new<F>(dim: usize, func: F) -> Self
    where
        F: Fn(&Tensor) -> candle_core::Result<Tensor> + Send + Sync + 'static,
    {
        Self {
            dim,
            func: Box::new(func),
        }
    }

    fn forward(&self, theta: &Tensor) -> Result<Tensor> {
        let lp = (self.func)(theta)?.sum_all()?;
        Ok(lp.to_dtype(DType::F64)?)
    }
}

impl LogDensity for CandleLogDensity {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_density(&self, x: &[f64]) -> Result<f64> {
        check_dim(self.dim, x.len())?;
        let theta = Tensor::from_slice(x, self.dim, &Device::Cpu)?;
        Ok(self.forward(&theta)?.to_scalar::<f64>()?)
    }

    fn log_density_and_grad(&self, x: &[f64]) -> Result<(f64, Array1<f64>)> {
        check_dim(self.dim, x.len())?;
        let theta = Var::from_tensor(&Tensor::from_slice(x, self.dim, &Device::Cpu)?)?;
        let lp = self.forward(theta.as_tensor())?;
        let grads = lp.backward()?;

        // coordinates the density never touched have no gradient entry
        let grad = match grads.get(theta.as_tensor()) {
            Some(g) => Array1::from(g.to_dtype(DType::F64)?.to_vec1::<f64>()?),
            None => Array1::zeros(self.dim),
        };

        Ok((lp.to_scalar::<f64>()?, grad))
    }
}

/// Handle to an externally fitted model.
///
/// Works on the unconstrained parameterization, with the log-Jacobian of
/// the constraining transform already included in `log_prob`.
pub trait PosteriorFit: Send + Sync {
    fn n_params(&self) -> usize;

    fn log_prob(&self, unconstrained: &[f64]) -> Result<f64>;

    fn grad_log_prob(&self, unconstrained: &[f64]) -> Result<Vec<f64>>;
}

/// Adapts a [`PosteriorFit`] to [`LogDensity`].
#[derive(Clone)]
pub struct FitModel {
    fit: Arc<dyn PosteriorFit>,
}

impl FitModel {
    pub fn new(fit: Arc<dyn PosteriorFit>) -> Self {
        Self { fit }
    }
}

impl LogDensity for FitModel {
    fn dim(&self) -> usize {
        self.fit.n_params()
    }

    fn log_density(&self, x: &[f64]) -> Result<f64> {
        check_dim(self.dim(), x.len())?;
        self.fit.log_prob(x)
    }

    fn log_density_and_grad(&self, x: &[f64]) -> Result<(f64, Array1<f64>)> {
        check_dim(self.dim(), x.len())?;
        let value = self.fit.log_prob(x)?;
        let grad = self.fit.grad_log_prob(x)?;
        if grad.len() != x.len() {
            return Err(LentilError::Model(format!(
                "fit returned a gradient of length {} for {} parameters",
                grad.len(),
                x.len()
            )));
        }
        Ok((value, Array1::from(grad)))
    }
}

/// Where the target density comes from.
#[derive(Clone)]
pub enum Model {
    /// A raw log density supplied by the caller
    LogDensity(Arc<dyn LogDensity>),
    /// An external fitted model
    Fit(FitModel),
}

impl Model {
    pub fn from_log_density<L: LogDensity + 'static>(log_density: L) -> Self {
        Self::LogDensity(Arc::new(log_density))
    }

    pub fn from_fit<F: PosteriorFit + 'static>(fit: F) -> Self {
        Self::Fit(FitModel::new(Arc::new(fit)))
    }

    fn inner(&self) -> &dyn LogDensity {
        match self {
            Self::LogDensity(ld) => ld.as_ref(),
            Self::Fit(fm) => fm,
        }
    }
}

impl LogDensity for Model {
    fn dim(&self) -> usize {
        self.inner().dim()
    }

    fn log_density(&self, x: &[f64]) -> Result<f64> {
        self.inner().log_density(x)
    }

    fn log_density_and_grad(&self, x: &[f64]) -> Result<(f64, Array1<f64>)> {
        self.inner().log_density_and_grad(x)
    }
}
