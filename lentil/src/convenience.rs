//! One-call black-box variational inference.
//!
//! [`Bbvi`] assembles a model, an approximation family and an objective,
//! starts from the zero parameter vector and runs [`adagrad_optimize`].
//!
//! ```ignore
//! let results = Bbvi::new(2)
//!     .log_density(FnLogDensity::new(2, |x| {
//!         let lp = -0.5 * x.iter().map(|v| v * v).sum::<f64>();
//!         (lp, x.iter().map(|v| -v).collect())
//!     }))
//!     .n_iters(5000)
//!     .optimizer(AdagradConfig::default().with_seed(42))
//!     .run()?;
//!
//! let (mean, cov) = results.approx_mean_and_cov()?;
//! ```

use std::sync::Arc;

use log::info;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;

use crate::approximations::{ApproximationFamily, MFGaussian};
use crate::error::{check_dim, LentilError, Result};
use crate::models::{FitModel, LogDensity, Model, PosteriorFit};
use crate::objectives::{ExclusiveKL, VariationalObjective};
use crate::optimization::{adagrad_optimize, AdagradConfig};

pub const DEFAULT_N_ITERS: usize = 10_000;
pub const DEFAULT_NUM_MC_SAMPLES: usize = 10;

/// Output of a BBVI run.
///
/// `var_param` always equals the last row of `var_param_history`, or the
/// zero vector when no iterations were run (the history is then empty).
pub struct BbviResults {
    pub var_param: Array1<f64>,
    pub var_param_history: Array2<f64>,
    pub value_history: Array1<f64>,
    pub objective: Arc<dyn VariationalObjective>,
}

impl BbviResults {
    /// Mean and covariance of the fitted approximation
    pub fn approx_mean_and_cov(&self) -> Result<(Array1<f64>, Array2<f64>)> {
        self.objective.approx().mean_and_cov(&self.var_param)
    }

    /// Draw `n` samples from the fitted approximation, shape (n, dim)
    pub fn sample_approx(&self, n: usize, rng: &mut StdRng) -> Result<Array2<f64>> {
        self.objective.approx().sample(&self.var_param, n, rng)
    }
}

/// Builder for a BBVI run.
///
/// Exactly one of `log_density` or `fit` must be given. A custom
/// `objective` needs an explicit `approx` and a raw `log_density`.
pub struct Bbvi {
    dimension: usize,
    n_iters: usize,
    num_mc_samples: usize,
    log_density: Option<Arc<dyn LogDensity>>,
    fit: Option<Arc<dyn PosteriorFit>>,
    approx: Option<Arc<dyn ApproximationFamily>>,
    objective: Option<Arc<dyn VariationalObjective>>,
    optimizer: AdagradConfig,
}

impl Bbvi {
    /// * `dimension` - dimension of the model parameter
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            n_iters: DEFAULT_N_ITERS,
            num_mc_samples: DEFAULT_NUM_MC_SAMPLES,
            log_density: None,
            fit: None,
            approx: None,
            objective: None,
            optimizer: AdagradConfig::default(),
        }
    }

    pub fn n_iters(mut self, n_iters: usize) -> Self {
        self.n_iters = n_iters;
        self
    }

    pub fn num_mc_samples(mut self, num_mc_samples: usize) -> Self {
        self.num_mc_samples = num_mc_samples;
        self
    }

    pub fn log_density<L: LogDensity + 'static>(self, log_density: L) -> Self {
        self.shared_log_density(Arc::new(log_density))
    }

    pub fn shared_log_density(mut self, log_density: Arc<dyn LogDensity>) -> Self {
        self.log_density = Some(log_density);
        self
    }

    pub fn fit<F: PosteriorFit + 'static>(mut self, fit: F) -> Self {
        self.fit = Some(Arc::new(fit));
        self
    }

    pub fn approx<A: ApproximationFamily + 'static>(self, approx: A) -> Self {
        self.shared_approx(Arc::new(approx))
    }

    pub fn shared_approx(mut self, approx: Arc<dyn ApproximationFamily>) -> Self {
        self.approx = Some(approx);
        self
    }

    pub fn objective<O: VariationalObjective + 'static>(mut self, objective: O) -> Self {
        self.objective = Some(Arc::new(objective));
        self
    }

    pub fn optimizer(mut self, config: AdagradConfig) -> Self {
        self.optimizer = config;
        self
    }

    /// Resolve the model source, rejecting ambiguous combinations.
    fn resolve_model(&mut self) -> Result<Model> {
        match (self.log_density.take(), self.fit.take()) {
            (Some(ld), None) => Ok(Model::LogDensity(ld)),
            (None, Some(fit)) => {
                if self.objective.is_some() {
                    return Err(LentilError::config(
                        "objective can only be specified if log_density is too",
                    ));
                }
                Ok(Model::Fit(FitModel::new(fit)))
            }
            (None, None) => Err(LentilError::config("either log_density or fit must be specified")),
            (Some(_), Some(_)) => Err(LentilError::config(
                "log_density and fit cannot both be specified",
            )),
        }
    }

    /// Validate the configuration, fill in defaults and optimize.
    pub fn run(mut self) -> Result<BbviResults> {
        if self.dimension == 0 {
            return Err(LentilError::config("dimension must be positive"));
        }

        let model = self.resolve_model()?;

        if self.approx.is_none() && self.objective.is_some() {
            return Err(LentilError::config(
                "objective can only be specified if approx is too",
            ));
        }
        self.optimizer.validate()?;

        let approx: Arc<dyn ApproximationFamily> = match self.approx.take() {
            Some(approx) => approx,
            None => Arc::new(MFGaussian::new(self.dimension)?),
        };
        check_dim(self.dimension, approx.dim())?;

        let objective: Arc<dyn VariationalObjective> = match self.objective.take() {
            Some(objective) => objective,
            None => Arc::new(ExclusiveKL::new(approx.clone(), Arc::new(model), self.num_mc_samples)?),
        };

        optimize_objective(self.n_iters, objective, approx.init_param(), &self.optimizer)
    }
}

/// BBVI from an explicit model source with the default family and objective.
///
/// q is a mean-field Gaussian over `dimension` coordinates and the
/// objective is [`ExclusiveKL`] with `num_mc_samples` draws.
pub fn bbvi(
    dimension: usize,
    model: Model,
    n_iters: usize,
    num_mc_samples: usize,
    config: &AdagradConfig,
) -> Result<BbviResults> {
    if dimension == 0 {
        return Err(LentilError::config("dimension must be positive"));
    }
    config.validate()?;
    let approx: Arc<dyn ApproximationFamily> = Arc::new(MFGaussian::new(dimension)?);
    let objective = ExclusiveKL::new(approx.clone(), Arc::new(model), num_mc_samples)?;
    optimize_objective(n_iters, Arc::new(objective), approx.init_param(), config)
}

/// Run the optimizer on a fully constructed objective and package the output.
pub fn optimize_objective(
    n_iters: usize,
    objective: Arc<dyn VariationalObjective>,
    init_param: Array1<f64>,
    config: &AdagradConfig,
) -> Result<BbviResults> {
    info!(
        "BBVI: dim = {}, var_param_dim = {}, iters = {}",
        objective.approx().dim(),
        objective.approx().var_param_dim(),
        n_iters
    );

    let trace = adagrad_optimize(n_iters, objective.as_ref(), init_param, config)?;

    Ok(BbviResults {
        var_param: trace.var_param,
        var_param_history: trace.var_param_history,
        value_history: trace.value_history,
        objective,
    })
}
