//! Training driver
//!
//! Runs epochs over a [`Dataset`] in mini-batches, optionally shuffled with a
//! seeded generator, and writes checkpoints at epoch boundaries. A network
//! restored from a checkpoint continues with the epoch after the one it was
//! saved at.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::Dataset;
use crate::error::{NnError, Result};
use crate::nn::NeuralNetwork;

/// The `[training]` table of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Last epoch to train (epochs are numbered from 1)
    pub epochs: usize,
    /// Samples per step; 1 trains sample by sample
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: Option<u64>,
    /// Save a checkpoint every N epochs, 0 saves only at the end
    pub checkpoint_every: usize,
    pub checkpoint_path: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            shuffle: true,
            seed: None,
            checkpoint_every: 0,
            checkpoint_path: None,
        }
    }
}

/// Aggregated result of one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    /// Sample-weighted mean of the step losses
    pub mean_loss: f64,
    pub steps: usize,
    pub matched: usize,
    pub total: usize,
}

impl EpochSummary {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.matched as f64 / self.total as f64
        }
    }
}

/// Per-epoch summaries of one `fit` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochSummary>,
}

impl TrainingHistory {
    pub fn losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.mean_loss).collect()
    }

    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.mean_loss)
    }

    /// Epoch with the lowest mean loss
    pub fn best_epoch(&self) -> Option<&EpochSummary> {
        self.epochs
            .iter()
            .filter(|e| e.mean_loss.is_finite())
            .min_by(|a, b| a.mean_loss.total_cmp(&b.mean_loss))
    }
}

pub struct Trainer {
    config: TrainingConfig,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(NnError::InvalidParameter(
                "batch size must be at least 1".to_string(),
            ));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self { config, rng })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// First epoch `fit` will run for this network
    pub fn start_epoch(network: &NeuralNetwork) -> usize {
        network.epoch + 1
    }

    fn check_widths(network: &NeuralNetwork, dataset: &Dataset) -> Result<()> {
        let input = network
            .input_width()
            .ok_or_else(|| NnError::InvalidTopology("network has no dense layer".to_string()))?;
        if input != dataset.input_width() {
            return Err(NnError::dimension("dataset inputs", input, dataset.input_width()));
        }
        if let Some(output) = network.output_width() {
            if output != dataset.target_width() {
                return Err(NnError::dimension(
                    "dataset targets",
                    output,
                    dataset.target_width(),
                ));
            }
        }
        Ok(())
    }

    /// Train until `config.epochs`, resuming after `network.epoch`
    pub fn fit(&mut self, network: &mut NeuralNetwork, dataset: &Dataset) -> Result<TrainingHistory> {
        Self::check_widths(network, dataset)?;

        let mut history = TrainingHistory::default();
        let start = Self::start_epoch(network);
        if start > self.config.epochs {
            info!(
                "Network already trained for {} epochs, nothing to do",
                network.epoch
            );
            return Ok(history);
        }

        info!(
            "Training epochs {}..={} on {} samples (batch size {})",
            start,
            self.config.epochs,
            dataset.len(),
            self.config.batch_size
        );

        let mut order: Vec<usize> = (0..dataset.len()).collect();
        let mut saved_epoch = None;

        for epoch in start..=self.config.epochs {
            if self.config.shuffle {
                order.shuffle(&mut self.rng);
            }

            let mut loss_sum = 0.0;
            let mut steps = 0;
            let mut matched = 0;
            let mut total = 0;

            for chunk in order.chunks(self.config.batch_size) {
                let report = if self.config.batch_size == 1 {
                    let sample = &dataset.samples()[chunk[0]];
                    network.train(epoch, &sample.input_array(), &sample.target_array())?
                } else {
                    let (inputs, targets) = dataset.batch(chunk)?;
                    network.train_batch(epoch, &inputs, &targets)?
                };

                loss_sum += report.loss * chunk.len() as f64;
                steps += 1;
                matched += report.matched();
                total += report.total();
            }

            let summary = EpochSummary {
                epoch,
                mean_loss: loss_sum / dataset.len() as f64,
                steps,
                matched,
                total,
            };
            info!(
                "Epoch {}/{}: loss={:.6}, matched={}/{} ({:.2}%)",
                epoch,
                self.config.epochs,
                summary.mean_loss,
                summary.matched,
                summary.total,
                summary.accuracy() * 100.0
            );
            history.epochs.push(summary);

            if self.config.checkpoint_every > 0 && epoch % self.config.checkpoint_every == 0 {
                if let Some(path) = &self.config.checkpoint_path {
                    network.save(path)?;
                    saved_epoch = Some(epoch);
                }
            }
        }

        if let Some(path) = &self.config.checkpoint_path {
            if saved_epoch != Some(network.epoch) {
                network.save(path)?;
            }
        }

        if let Some(best) = history.best_epoch() {
            debug!("Lowest loss {:.6} at epoch {}", best.mean_loss, best.epoch);
        }
        Ok(history)
    }

    /// Mean loss over the dataset with dropout disabled; weights are untouched
    pub fn evaluate(network: &NeuralNetwork, dataset: &Dataset) -> Result<f64> {
        Self::check_widths(network, dataset)?;
        let (inputs, targets) = dataset.to_arrays();
        let outputs = network.predict_batch(&inputs)?;
        network
            .loss_function
            .calculate_loss_batch(&outputs, &targets, network.positive_target_threshold)
    }
}
