//! Adaptive stochastic gradient descent (AdaGrad) over variational parameters.
//!
//! Each iteration asks the objective for a fresh Monte Carlo estimate
//! `(f, g)` at the current λ and applies
//!
//! ```text
//! acc ← acc + g²                       (elementwise)
//! λ   ← λ - lr_t * g / sqrt(ε + acc)
//! ```
//!
//! With `window = Some(w)` the accumulator only covers the last `w`
//! squared gradients, which keeps the step size from vanishing on long
//! runs. Iterations are strictly sequential; iteration `t + 1` starts from
//! the λ produced by iteration `t`.

use std::collections::VecDeque;

use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info};
use ndarray::{Array1, Array2, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{check_dim, LentilError, Result};
use crate::objectives::{ObjectiveSample, VariationalObjective};

/// Number of trailing objective values in the reported average loss
pub const AVG_LOSS_WINDOW: usize = 1000;

/// Recognized optimizer options.
///
/// Unknown keys are rejected when deserializing, and [`validate`](Self::validate)
/// checks every range before the optimizer allocates anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdagradConfig {
    /// Base step size, > 0
    pub learning_rate: f64,
    /// Stabilizer added under the square root, > 0
    pub epsilon: f64,
    /// Starting value of the squared-gradient accumulator, >= 0
    pub initial_accumulator: f64,
    /// Final step size; when set the step decays from `learning_rate`
    /// over the middle half of the run. Must be below `learning_rate`.
    pub learning_rate_end: Option<f64>,
    /// Only accumulate the last `window` squared gradients, >= 1
    pub window: Option<usize>,
    /// Seed for Monte Carlo sampling; OS entropy when absent
    pub seed: Option<u64>,
    /// Abort with `NonFinite` instead of carrying NaN/Inf forward
    pub check_finite: bool,
    pub show_progress: bool,
    /// Log the running average loss every `log_every` iterations, >= 1
    pub log_every: usize,
}

impl Default for AdagradConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            epsilon: 0.1,
            initial_accumulator: 0.0,
            learning_rate_end: None,
            window: None,
            seed: None,
            check_finite: false,
            show_progress: false,
            log_every: 100,
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> LentilError {
    LentilError::InvalidOption {
        name,
        reason: reason.into(),
    }
}

fn check_rates(learning_rate: f64, learning_rate_end: Option<f64>) -> Result<()> {
    if !(learning_rate.is_finite() && learning_rate > 0.0) {
        return Err(invalid("learning_rate", format!("must be finite and positive, got {}", learning_rate)));
    }
    if let Some(end) = learning_rate_end {
        if !(end.is_finite() && end > 0.0 && end < learning_rate) {
            return Err(invalid(
                "learning_rate_end",
                format!("must be positive and below learning_rate {}, got {}", learning_rate, end),
            ));
        }
    }
    Ok(())
}

impl AdagradConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Parse a JSON object of options, then validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_rates(self.learning_rate, self.learning_rate_end)?;
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(invalid("epsilon", format!("must be finite and positive, got {}", self.epsilon)));
        }
        if !(self.initial_accumulator.is_finite() && self.initial_accumulator >= 0.0) {
            return Err(invalid(
                "initial_accumulator",
                format!("must be finite and non-negative, got {}", self.initial_accumulator),
            ));
        }
        if self.window == Some(0) {
            return Err(invalid("window", "must be at least 1"));
        }
        if self.log_every == 0 {
            return Err(invalid("log_every", "must be at least 1"));
        }
        Ok(())
    }

    fn make_rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

/// Step size for every iteration.
///
/// Constant without `learning_rate_end`. Otherwise constant for the first
/// quarter, decaying like `a / (b + t)` through the middle half so that it
/// lands on `learning_rate_end`, and constant again for the last quarter.
pub fn learning_rate_schedule(
    n_iters: usize,
    learning_rate: f64,
    learning_rate_end: Option<f64>,
) -> Result<Vec<f64>> {
    check_rates(learning_rate, learning_rate_end)?;
    let Some(end) = learning_rate_end else {
        return Ok(vec![learning_rate; n_iters]);
    };

    let b = n_iters as f64 * end / (2.0 * (learning_rate - end));
    let a = learning_rate * b;
    let start_decrease_at = n_iters / 4;
    let end_decrease_at = 3 * n_iters / 4;

    let schedule = (0..n_iters)
        .map(|i| {
            if i < start_decrease_at {
                learning_rate
            } else if i < end_decrease_at {
                a / (b + (i - start_decrease_at) as f64 + 1.0)
            } else {
                end
            }
        })
        .collect();
    Ok(schedule)
}

/// Everything the optimizer produced.
#[derive(Debug, Clone)]
pub struct OptimizationTrace {
    /// Parameter after the last iteration
    pub var_param: Array1<f64>,
    /// One row per iteration, the parameter *after* that iteration's update.
    /// The initial parameter is not included, so there are exactly `n_iters` rows.
    pub var_param_history: Array2<f64>,
    /// Objective estimate at each iteration, evaluated before the update
    pub value_history: Array1<f64>,
    /// Final squared-gradient accumulator (includes `initial_accumulator`)
    pub accumulator: Array1<f64>,
}

impl OptimizationTrace {
    /// Mean of the trailing `last` objective values
    pub fn average_loss(&self, last: usize) -> Option<f64> {
        let n = self.value_history.len();
        if n == 0 || last == 0 {
            return None;
        }
        let start = n.saturating_sub(last);
        self.value_history.slice(ndarray::s![start..]).mean()
    }
}

/// Squared-gradient accumulator, either a running sum or a sliding window.
struct Accumulator {
    sum: Array1<f64>,
    initial: f64,
    recent: Option<(usize, VecDeque<Array1<f64>>)>,
}

impl Accumulator {
    fn new(dim: usize, initial: f64, window: Option<usize>) -> Self {
        Self {
            sum: Array1::from_elem(dim, initial),
            initial,
            recent: window.map(|w| (w, VecDeque::with_capacity(w + 1))),
        }
    }

    fn push(&mut self, grad: &Array1<f64>) {
        let sq = grad.mapv(|g| g * g);
        self.sum += &sq;
        if let Some((window, recent)) = self.recent.as_mut() {
            recent.push_back(sq);
            if recent.len() > *window {
                if let Some(old) = recent.pop_front() {
                    self.sum -= &old;
                    // roundoff must not push the sum below its floor
                    let floor = self.initial;
                    self.sum.mapv_inplace(|a| a.max(floor));
                }
            }
        }
    }
}

fn all_finite(value: f64, grad: &Array1<f64>) -> bool {
    value.is_finite() && grad.iter().all(|g| g.is_finite())
}

/// Run `n_iters` AdaGrad steps from `init_param`.
///
/// # Arguments
/// * `n_iters` - number of iterations, no early stopping
/// * `objective` - stochastic objective to minimize
/// * `init_param` - starting λ, length `objective.approx().var_param_dim()`
/// * `config` - optimizer options
///
/// # Returns
/// The final λ, its history, the objective trace and the accumulator
pub fn adagrad_optimize(
    n_iters: usize,
    objective: &dyn VariationalObjective,
    init_param: Array1<f64>,
    config: &AdagradConfig,
) -> Result<OptimizationTrace> {
    config.validate()?;
    check_dim(objective.approx().var_param_dim(), init_param.len())?;

    let dim = init_param.len();
    let mut rng = config.make_rng();
    let schedule = learning_rate_schedule(n_iters, config.learning_rate, config.learning_rate_end)?;

    let mut var_param = init_param;
    let mut accumulator = Accumulator::new(dim, config.initial_accumulator, config.window);
    let mut var_param_history = Array2::<f64>::zeros((n_iters, dim));
    let mut value_history = Array1::<f64>::zeros(n_iters);

    let pb = ProgressBar::new(n_iters as u64);
    if !config.show_progress {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    info!("AdaGrad for {} iterations over {} variational parameters", n_iters, dim);

    for (iter, &lr) in schedule.iter().enumerate() {
        let ObjectiveSample { value, grad } = objective.evaluate(&var_param, &mut rng)?;

        if config.check_finite && !all_finite(value, &grad) {
            pb.finish_and_clear();
            return Err(LentilError::NonFinite { iteration: iter });
        }

        accumulator.push(&grad);

        let epsilon = config.epsilon;
        Zip::from(&mut var_param)
            .and(&grad)
            .and(&accumulator.sum)
            .for_each(|p, &g, &acc| *p -= lr * g / (epsilon + acc).sqrt());

        if config.check_finite && var_param.iter().any(|p| !p.is_finite()) {
            pb.finish_and_clear();
            return Err(LentilError::NonFinite { iteration: iter });
        }

        var_param_history.row_mut(iter).assign(&var_param);
        value_history[iter] = value;
        pb.inc(1);

        if iter % config.log_every == 0 || iter + 1 == n_iters {
            let start = (iter + 1).saturating_sub(AVG_LOSS_WINDOW);
            let avg = value_history.slice(ndarray::s![start..=iter]).mean().unwrap_or(value);
            pb.set_message(format!("Average Loss = {:.5}", avg));
            debug!("[{}] average loss = {:.5}, lr = {:.3e}", iter + 1, avg, lr);
        }
    }
    pb.finish_and_clear();

    let trace = OptimizationTrace {
        var_param,
        var_param_history,
        value_history,
        accumulator: accumulator.sum,
    };

    if let Some(avg) = trace.average_loss(AVG_LOSS_WINDOW) {
        info!("Finished AdaGrad: average loss = {:.5}", avg);
    }

    Ok(trace)
}
