pub mod fit;
pub mod targets;

use clap::{Parser, Subcommand};

pub use fit::{FamilyType, FitArgs};
pub use targets::TargetType;

#[derive(Parser)]
#[command(name = "lentil")]
#[command(about = "Black-box variational inference with AdaGrad")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit a variational approximation to a built-in target
    Fit(FitArgs),
}
