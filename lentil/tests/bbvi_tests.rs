use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_abs_diff_eq;
use lentil::*;
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Standard normal log density that counts how often it is evaluated
struct CountingNormal {
    dim: usize,
    calls: Arc<AtomicUsize>,
    loc: f64,
}

impl CountingNormal {
    fn new(dim: usize, loc: f64) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                dim,
                calls: calls.clone(),
                loc,
            },
            calls,
        )
    }
}

impl LogDensity for CountingNormal {
    fn dim(&self) -> usize {
        self.dim
    }

    fn log_density_and_grad(&self, x: &[f64]) -> Result<(f64, Array1<f64>)> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let diff = Array1::from_iter(x.iter().map(|v| v - self.loc));
        Ok((-0.5 * diff.dot(&diff), -diff))
    }
}

struct CountingFit {
    calls: Arc<AtomicUsize>,
}

impl PosteriorFit for CountingFit {
    fn n_params(&self) -> usize {
        2
    }

    fn log_prob(&self, u: &[f64]) -> Result<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(-0.5 * u.iter().map(|v| (v - 1.0) * (v - 1.0)).sum::<f64>())
    }

    fn grad_log_prob(&self, u: &[f64]) -> Result<Vec<f64>> {
        Ok(u.iter().map(|v| 1.0 - v).collect())
    }
}

/// Objective that only counts calls
struct CountingObjective {
    approx: MFGaussian,
    model: FnLogDensity,
    calls: Arc<AtomicUsize>,
}

impl CountingObjective {
    fn new(dim: usize) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                approx: MFGaussian::new(dim).unwrap(),
                model: FnLogDensity::new(dim, |x| (0.0, vec![0.0; x.len()])),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl VariationalObjective for CountingObjective {
    fn approx(&self) -> &dyn ApproximationFamily {
        &self.approx
    }

    fn model(&self) -> &dyn LogDensity {
        &self.model
    }

    fn evaluate(&self, var_param: &Array1<f64>, _rng: &mut StdRng) -> Result<ObjectiveSample> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ObjectiveSample {
            value: 0.0,
            grad: Array1::zeros(var_param.len()),
        })
    }
}

fn seeded(seed: u64) -> AdagradConfig {
    AdagradConfig::default().with_seed(seed)
}

#[test]
fn var_param_has_family_dimension() -> Result<()> {
    for dim in [1, 3, 5] {
        let (model, _) = CountingNormal::new(dim, 0.0);
        let results = Bbvi::new(dim)
            .log_density(model)
            .n_iters(5)
            .optimizer(seeded(1))
            .run()?;
        assert_eq!(results.var_param.len(), 2 * dim);
        assert_eq!(results.objective.approx().var_param_dim(), 2 * dim);
    }

    let (model, _) = CountingNormal::new(3, 0.0);
    let results = Bbvi::new(3)
        .log_density(model)
        .approx(MFStudentT::new(3, 4.0)?)
        .n_iters(5)
        .optimizer(seeded(1))
        .run()?;
    assert_eq!(results.var_param.len(), 6);
    Ok(())
}

#[test]
fn history_has_one_row_per_iteration() -> Result<()> {
    let (model, _) = CountingNormal::new(2, 0.0);
    let results = Bbvi::new(2)
        .log_density(model)
        .n_iters(25)
        .optimizer(seeded(3))
        .run()?;
    assert_eq!(results.var_param_history.dim(), (25, 4));
    assert_eq!(results.value_history.len(), 25);
    assert_eq!(results.var_param_history.row(24), results.var_param);
    Ok(())
}

#[test]
fn both_log_density_and_fit_is_rejected_before_any_work() {
    let (model, model_calls) = CountingNormal::new(2, 0.0);
    let fit_calls = Arc::new(AtomicUsize::new(0));
    let out = Bbvi::new(2)
        .log_density(model)
        .fit(CountingFit {
            calls: fit_calls.clone(),
        })
        .n_iters(10)
        .run();

    assert!(matches!(out, Err(LentilError::Config(_))));
    assert_eq!(model_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fit_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn neither_log_density_nor_fit_is_rejected() {
    let out = Bbvi::new(2).n_iters(10).run();
    assert!(matches!(out, Err(LentilError::Config(_))));
}

#[test]
fn objective_with_fit_is_rejected() {
    let (objective, calls) = CountingObjective::new(2);
    let out = Bbvi::new(2)
        .fit(CountingFit {
            calls: Arc::new(AtomicUsize::new(0)),
        })
        .approx(MFGaussian::new(2).unwrap())
        .objective(objective)
        .n_iters(10)
        .run();
    assert!(matches!(out, Err(LentilError::Config(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn objective_without_approx_is_rejected() {
    let (model, _) = CountingNormal::new(2, 0.0);
    let (objective, calls) = CountingObjective::new(2);
    let out = Bbvi::new(2)
        .log_density(model)
        .objective(objective)
        .n_iters(10)
        .run();
    match out {
        Err(e) => assert!(e.is_config(), "unexpected error: {}", e),
        Ok(_) => panic!("objective without approx must fail"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn custom_objective_is_used_when_approx_is_given() -> Result<()> {
    let (model, model_calls) = CountingNormal::new(2, 0.0);
    let (objective, calls) = CountingObjective::new(2);
    let results = Bbvi::new(2)
        .log_density(model)
        .approx(MFGaussian::new(2)?)
        .objective(objective)
        .n_iters(4)
        .run()?;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(model_calls.load(Ordering::SeqCst), 0);
    assert_eq!(results.var_param, Array1::<f64>::zeros(4));
    Ok(())
}

#[test]
fn zero_iterations_returns_initial_zero_vector() -> Result<()> {
    let (model, calls) = CountingNormal::new(3, 0.0);
    let results = Bbvi::new(3).log_density(model).n_iters(0).run()?;
    assert_eq!(results.var_param, Array1::<f64>::zeros(6));
    assert_eq!(results.var_param_history, Array2::<f64>::zeros((0, 6)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn fixed_seed_gives_identical_history() -> Result<()> {
    let run = |seed: u64| -> Result<Array2<f64>> {
        let (model, _) = CountingNormal::new(3, 1.5);
        let results = Bbvi::new(3)
            .log_density(model)
            .n_iters(200)
            .num_mc_samples(16)
            .optimizer(seeded(seed))
            .run()?;
        Ok(results.var_param_history)
    };

    let a = run(2024)?;
    let b = run(2024)?;
    assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));

    let c = run(2025)?;
    assert_ne!(a, c);
    Ok(())
}

#[test]
fn objective_moving_average_decreases() -> Result<()> {
    // target N(m, I); the zero start is far from m, so the KL has room to drop
    let window = 100;
    for seed in 0..5u64 {
        let (model, _) = CountingNormal::new(2, 3.0);
        let results = Bbvi::new(2)
            .log_density(model)
            .n_iters(2000)
            .optimizer(seeded(seed).with_learning_rate(0.1))
            .run()?;
        let values = &results.value_history;
        let head = values.slice(ndarray::s![..window]).mean().unwrap_or(f64::NAN);
        let mid = values.slice(ndarray::s![900..900 + window]).mean().unwrap_or(f64::NAN);
        let tail = values.slice(ndarray::s![-(window as isize)..]).mean().unwrap_or(f64::NAN);
        assert!(mid < head, "seed {}: {} !< {}", seed, mid, head);
        assert!(tail <= mid + 0.5, "seed {}: {} vs {}", seed, tail, mid);
    }
    Ok(())
}

#[test]
fn recovers_gaussian_target() -> Result<()> {
    let target = CandleLogDensity::new(2, |theta| {
        let shift = lentil::candle_core::Tensor::new(&[1.0f64, -2.0], theta.device())?;
        (theta - &shift)?.sqr()?.sum_all()? * (-0.5)
    });
    let results = bbvi(
        2,
        Model::from_log_density(target),
        4000,
        10,
        &seeded(7).with_learning_rate(0.1),
    )?;
    let (mean, cov) = results.approx_mean_and_cov()?;
    assert_abs_diff_eq!(mean[0], 1.0, epsilon = 0.2);
    assert_abs_diff_eq!(mean[1], -2.0, epsilon = 0.2);
    assert_abs_diff_eq!(cov[[0, 0]], 1.0, epsilon = 0.3);
    assert_abs_diff_eq!(cov[[1, 1]], 1.0, epsilon = 0.3);

    let draws = results.sample_approx(50, &mut StdRng::seed_from_u64(1))?;
    assert_eq!(draws.dim(), (50, 2));
    Ok(())
}

#[test]
fn fit_model_drives_the_default_objective() -> Result<()> {
    let calls = Arc::new(AtomicUsize::new(0));
    let results = Bbvi::new(2)
        .fit(CountingFit {
            calls: calls.clone(),
        })
        .n_iters(3000)
        .optimizer(seeded(11).with_learning_rate(0.1))
        .run()?;
    let (mean, _) = results.approx_mean_and_cov()?;
    assert_abs_diff_eq!(mean[0], 1.0, epsilon = 0.2);
    assert_abs_diff_eq!(mean[1], 1.0, epsilon = 0.2);
    // 10 default Monte Carlo draws per iteration
    assert_eq!(calls.load(Ordering::SeqCst), 3000 * 10);
    Ok(())
}

#[test]
fn invalid_optimizer_options_are_config_time_errors() {
    let (model, calls) = CountingNormal::new(2, 0.0);
    let out = Bbvi::new(2)
        .log_density(model)
        .optimizer(AdagradConfig {
            epsilon: 0.0,
            ..Default::default()
        })
        .n_iters(10)
        .run();
    assert!(matches!(out, Err(LentilError::InvalidOption { name: "epsilon", .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_dimension_is_rejected() {
    let (model, _) = CountingNormal::new(0, 0.0);
    let out = Bbvi::new(0).log_density(model).run();
    assert!(matches!(out, Err(LentilError::Config(_))));
}

#[test]
fn approx_of_the_wrong_dimension_is_rejected() -> Result<()> {
    let (model, calls) = CountingNormal::new(2, 0.0);
    let out = Bbvi::new(2)
        .log_density(model)
        .approx(MFGaussian::new(3)?)
        .n_iters(10)
        .run();
    assert!(matches!(
        out,
        Err(LentilError::DimensionMismatch {
            expected: 2,
            found: 3
        })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn zero_dimension_is_a_config_error_for_both_entry_points() {
    let (model, calls) = CountingNormal::new(0, 0.0);
    let out = bbvi(0, Model::from_log_density(model), 10, 4, &AdagradConfig::default());
    assert!(matches!(out, Err(LentilError::Config(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
