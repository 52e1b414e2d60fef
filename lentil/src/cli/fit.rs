use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, ValueEnum};
use log::info;
use serde::Serialize;

use super::targets::{build_target, TargetType};
use crate::approximations::{ApproximationFamily, MFGaussian, MFStudentT};
use crate::convenience::{Bbvi, BbviResults};
use crate::models::LogDensity;
use crate::optimization::{AdagradConfig, AVG_LOSS_WINDOW};

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum FamilyType {
    /// Mean-field Gaussian
    Gaussian,
    /// Mean-field Student's t with `--df` degrees of freedom
    StudentT,
}

#[derive(Args, Debug, Clone)]
pub struct FitArgs {
    /// target density
    #[arg(short, long, value_enum, default_value = "normal")]
    pub target: TargetType,

    /// dimension of the target (ignored by eight-schools)
    #[arg(short, long, default_value_t = 2)]
    pub dimension: usize,

    /// location of the normal target
    #[arg(long, default_value_t = 0.0)]
    pub loc: f64,

    /// scale of the normal target
    #[arg(long, default_value_t = 1.0)]
    pub scale: f64,

    /// correlation of the correlated target
    #[arg(long, default_value_t = 0.5)]
    pub rho: f64,

    /// approximation family
    #[arg(short, long, value_enum, default_value = "gaussian")]
    pub family: FamilyType,

    /// degrees of freedom of the Student's t family
    #[arg(long, default_value_t = 5.0)]
    pub df: f64,

    /// number of optimization iterations
    #[arg(long, default_value_t = 10000)]
    pub iters: usize,

    /// Monte Carlo samples per gradient estimate
    #[arg(long, default_value_t = 10)]
    pub samples: usize,

    /// JSON file of optimizer options (learning_rate, epsilon, window, ...)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// learning rate, overrides the config file
    #[arg(long)]
    pub lr: Option<f64>,

    /// random seed, overrides the config file
    #[arg(long)]
    pub seed: Option<u64>,

    /// keep every k-th history row in the output
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub history_every: u64,

    /// show a progress bar
    #[arg(long, default_value_t = false)]
    pub progress: bool,

    /// output JSON file; printed to stdout when absent
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

/// What gets written after a fit
#[derive(Serialize, Debug)]
pub struct FitSummary {
    pub target: String,
    pub family: String,
    pub dimension: usize,
    pub n_iters: usize,
    pub var_param: Vec<f64>,
    pub mean: Vec<f64>,
    pub sd: Vec<f64>,
    pub average_loss: Option<f64>,
    pub history_every: u64,
    pub var_param_history: Vec<Vec<f64>>,
}

fn load_config(args: &FitArgs) -> Result<AdagradConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Reading optimizer options from {:?}", path);
            AdagradConfig::from_json_str(&std::fs::read_to_string(path)?)?
        }
        None => AdagradConfig::default(),
    };
    if let Some(lr) = args.lr {
        config.learning_rate = lr;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    config.show_progress = args.progress;
    config.validate()?;
    Ok(config)
}

fn build_family(args: &FitArgs, dim: usize) -> Result<Arc<dyn ApproximationFamily>> {
    let family: Arc<dyn ApproximationFamily> = match args.family {
        FamilyType::Gaussian => Arc::new(MFGaussian::new(dim)?),
        FamilyType::StudentT => Arc::new(MFStudentT::new(dim, args.df)?),
    };
    Ok(family)
}

pub fn summarize(args: &FitArgs, results: &BbviResults) -> Result<FitSummary> {
    let (mean, cov) = results.approx_mean_and_cov()?;
    let n = results.value_history.len();
    let tail = n.saturating_sub(AVG_LOSS_WINDOW);
    let average_loss = results.value_history.slice(ndarray::s![tail..]).mean();
    let every = args.history_every;
    if every == 0 {
        anyhow::bail!("history_every must be at least 1");
    }

    Ok(FitSummary {
        target: format!("{:?}", args.target),
        family: format!("{:?}", args.family),
        dimension: results.objective.approx().dim(),
        n_iters: n,
        var_param: results.var_param.to_vec(),
        mean: mean.to_vec(),
        sd: cov.diag().mapv(f64::sqrt).to_vec(),
        average_loss,
        history_every: every,
        var_param_history: results
            .var_param_history
            .rows()
            .into_iter()
            .step_by(every as usize)
            .map(|row| row.to_vec())
            .collect(),
    })
}

fn write_summary(summary: &FitSummary, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)?;
            info!("Saved results to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub fn run(args: &FitArgs) -> Result<()> {
    let config = load_config(args)?;
    let target = build_target(args.target, args.dimension, args.loc, args.scale, args.rho)?;
    let dim = target.dim();
    let family = build_family(args, dim)?;

    info!(
        "Fitting {:?} target (dim = {}) with {:?} family",
        args.target, dim, args.family
    );

    let results = Bbvi::new(dim)
        .shared_log_density(target)
        .shared_approx(family)
        .n_iters(args.iters)
        .num_mc_samples(args.samples)
        .optimizer(config)
        .run()?;

    let summary = summarize(args, &results)?;
    if let Some(avg) = summary.average_loss {
        info!("average loss over the last iterations: {:.5}", avg);
    }
    write_summary(&summary, args.out.as_deref())
}
