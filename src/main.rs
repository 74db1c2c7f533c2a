//! Runs the tutorials from the command line.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use topoasg::training::{EpochReport, TrainConfig};
use topoasg::tutorials;
use tracing_subscriber::EnvFilter;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "topoasg: message passing on simplicial and cell complexes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    tutorial: Tutorial,
}

#[derive(Subcommand, Debug)]
enum Tutorial {
    /// Node classification with a High Skip Network
    Hsn(TrainArgs),
    /// Complex classification with ConvCXN layers on a cell complex
    Convcxn(TrainArgs),
    /// Edge classification with the two-step template layer
    Template(TrainArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// JSON training configuration, flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    learning_rate: Option<f32>,

    #[arg(long)]
    epochs: Option<usize>,

    /// Epochs between two evaluations on the held-out set
    #[arg(long)]
    eval_interval: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,
}

impl TrainArgs {
    fn train_config(&self) -> topoasg::Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_json_file(path)?,
            None => TrainConfig::default(),
        };
        if let Some(lr) = self.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(epochs) = self.epochs {
            config.num_epochs = epochs;
        }
        if let Some(interval) = self.eval_interval {
            config.eval_interval = interval;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

fn print_report(report: &EpochReport) {
    println!(
        "Epoch: {} loss: {:.4} Train_acc: {:.4}",
        report.epoch, report.mean_loss, report.train_accuracy
    );
    if let Some(test_accuracy) = report.test_accuracy {
        println!("Test_acc: {:.4}", test_accuracy);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let history = match &cli.tutorial {
        Tutorial::Hsn(args) => tutorials::hsn::run(args.train_config()?)?,
        Tutorial::Convcxn(args) => tutorials::convcxn::run(args.train_config()?)?,
        Tutorial::Template(args) => tutorials::template::run(args.train_config()?)?,
    };

    for report in &history.epochs {
        print_report(report);
    }
    Ok(())
}
