//! Black-box variational inference.
//!
//! Fits a tractable approximation q(θ; λ) to an unnormalized target p(θ)
//! by minimizing a Monte Carlo estimate of KL(q || p) with AdaGrad.
//!
//! - [`models`]: target densities and the gradient capability they expose
//! - [`approximations`]: mean-field Gaussian and Student's t families
//! - [`objectives`]: the exclusive KL estimator
//! - [`optimization`]: AdaGrad loop and its options
//! - [`convenience`]: [`Bbvi`] builder tying everything together

pub mod approximations;
pub mod cli;
pub mod convenience;
pub mod error;
pub mod models;
pub mod objectives;
pub mod optimization;

pub use approximations::{ApproximationFamily, MFGaussian, MFStudentT};
pub use convenience::{bbvi, optimize_objective, Bbvi, BbviResults};
pub use error::{LentilError, Result};
pub use models::{CandleLogDensity, FitModel, FnLogDensity, LogDensity, Model, PosteriorFit};
pub use objectives::{average_objective, ExclusiveKL, ObjectiveSample, VariationalObjective};
pub use optimization::{adagrad_optimize, learning_rate_schedule, AdagradConfig, OptimizationTrace};

pub use candle_core;
