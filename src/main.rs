//! lotto_nn command line
//!
//! ```bash
//! lotto_nn init-config --output lotto_nn.toml
//! lotto_nn encode --draws draws.json --output samples.json
//! lotto_nn train --config lotto_nn.toml --data samples.json --output model.json
//! lotto_nn predict --checkpoint model.json --draws draws.json --top 6
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ndarray::Array1;
use tracing::info;

use lotto_nn::logging::setup_logging;
use lotto_nn::prelude::*;

#[derive(Parser)]
#[command(name = "lotto_nn")]
#[command(about = "Feed-forward neural network for lottery draw scoring")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration
    InitConfig {
        /// Output file path
        #[arg(short, long, default_value = "lotto_nn.toml")]
        output: PathBuf,
    },

    /// Turn a draw history into training samples
    Encode {
        /// JSON array of draws, each an array of 1-based numbers, oldest first
        #[arg(short, long)]
        draws: PathBuf,

        /// Output samples file
        #[arg(short, long)]
        output: PathBuf,

        /// Highest number that can be drawn
        #[arg(long)]
        total_numbers: Option<usize>,

        /// Past draws per input
        #[arg(long)]
        window: Option<usize>,
    },

    /// Train a network on a samples file
    Train {
        /// Samples file produced by `encode`
        #[arg(short, long)]
        data: PathBuf,

        /// Continue from this checkpoint instead of a fresh network
        #[arg(short, long)]
        resume: Option<PathBuf>,

        /// Checkpoint to write
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Last epoch to train
        #[arg(short, long)]
        epochs: Option<usize>,
    },

    /// Mean loss of a checkpoint on a samples file
    Evaluate {
        #[arg(long)]
        checkpoint: PathBuf,

        #[arg(short, long)]
        data: PathBuf,
    },

    /// Print output probabilities for one input
    Predict {
        #[arg(long)]
        checkpoint: PathBuf,

        /// Comma separated input vector
        #[arg(short, long, conflicts_with = "draws")]
        input: Option<String>,

        /// Draw history; the latest window becomes the input
        #[arg(short, long)]
        draws: Option<PathBuf>,

        /// Also list the N most probable numbers
        #[arg(short, long, default_value = "0")]
        top: usize,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn load_draws(path: &Path) -> Result<Vec<Vec<usize>>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let draws = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse draws in {}", path.display()))?;
    Ok(draws)
}

fn parse_input(text: &str) -> Result<Array1<f64>> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("input must be comma separated numbers")?;
    Ok(Array1::from(values))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    setup_logging(cli.log_level.as_deref().unwrap_or(&config.logging.level));

    match cli.command {
        Commands::InitConfig { output } => {
            Config::create_default(&output)?;
            println!("Default configuration written to {}", output.display());
        }

        Commands::Encode {
            draws,
            output,
            total_numbers,
            window,
        } => {
            let encoder = DrawWindowEncoder::new(
                total_numbers.unwrap_or(config.data.total_numbers),
                window.unwrap_or(config.data.window),
            )?;
            let history = load_draws(&draws)?;
            let dataset = Dataset::new(encoder.encode_samples(&history)?)?;
            dataset.save_json(&output)?;

            println!("Encoded {} draws into {} samples", history.len(), dataset.len());
            println!("Input width:  {}", dataset.input_width());
            println!("Target width: {}", dataset.target_width());
        }

        Commands::Train {
            data,
            resume,
            output,
            epochs,
        } => {
            let dataset = Dataset::load_json(&data)?;

            let mut network = match &resume {
                Some(path) => {
                    info!("Resuming from {}", path.display());
                    NeuralNetwork::load(path)
                        .with_context(|| format!("failed to restore {}", path.display()))?
                }
                None => config.build_network(dataset.input_width())?,
            };
            println!("{}", network.summary());

            let mut training = config.training.clone();
            if let Some(epochs) = epochs {
                training.epochs = epochs;
            }
            let checkpoint = output
                .or_else(|| training.checkpoint_path.clone())
                .or(resume)
                .unwrap_or_else(|| PathBuf::from("model.json"));
            training.checkpoint_path = Some(checkpoint.clone());

            let mut trainer = Trainer::new(training)?;
            let history = trainer.fit(&mut network, &dataset)?;

            match (history.epochs.first(), history.epochs.last()) {
                (Some(first), Some(last)) => {
                    println!("\nTraining finished");
                    println!("================");
                    println!("Epochs:     {}..={}", first.epoch, last.epoch);
                    println!("First loss: {:.6}", first.mean_loss);
                    println!("Final loss: {:.6}", last.mean_loss);
                    println!("Matched:    {}/{}", last.matched, last.total);
                    println!("Checkpoint: {}", checkpoint.display());
                }
                _ => println!("Nothing to train, network is at epoch {}", network.epoch),
            }
        }

        Commands::Evaluate { checkpoint, data } => {
            let network = NeuralNetwork::load(&checkpoint)
                .with_context(|| format!("failed to restore {}", checkpoint.display()))?;
            let dataset = Dataset::load_json(&data)?;
            let loss = Trainer::evaluate(&network, &dataset)?;
            println!("Mean loss on {} samples: {:.6}", dataset.len(), loss);
        }

        Commands::Predict {
            checkpoint,
            input,
            draws,
            top,
        } => {
            let network = NeuralNetwork::load(&checkpoint)
                .with_context(|| format!("failed to restore {}", checkpoint.display()))?;

            let input = match (input, draws) {
                (Some(text), _) => parse_input(&text)?,
                (None, Some(path)) => {
                    let encoder =
                        DrawWindowEncoder::new(config.data.total_numbers, config.data.window)?;
                    encoder.latest_input(&load_draws(&path)?)?
                }
                (None, None) => bail!("either --input or --draws is required"),
            };

            let output = network.predict(&input)?;
            println!("{:>6}  {:>11}", "number", "probability");
            for (i, p) in output.iter().enumerate() {
                println!("{:>6}  {:>11.6}", i + 1, p);
            }

            if top > 0 {
                let mut ranked: Vec<(usize, f64)> =
                    output.iter().copied().enumerate().map(|(i, p)| (i + 1, p)).collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
                let numbers: Vec<String> =
                    ranked.iter().take(top).map(|(n, _)| n.to_string()).collect();
                println!("\nTop {}: {}", top, numbers.join(", "));
            }
        }
    }

    Ok(())
}
