//! Configuration management
//!
//! One TOML file describes the network, its layer stack, the training run,
//! the draw encoding and logging.

use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::nn::{
    ActivationType, LayerSpec, LayerType, LossFunction, NetworkConfig, NeuralNetwork, WeightInit,
};
use crate::trainer::TrainingConfig;

/// Draw encoding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Highest number that can be drawn
    pub total_numbers: usize,
    /// Numbers drawn per draw
    pub numbers_per_draw: usize,
    /// Past draws per input
    pub window: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            total_numbers: 49,
            numbers_per_draw: 6,
            window: 3,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub training: TrainingConfig,
    pub data: DataConfig,
    pub logging: LoggingConfig,
    pub layers: Vec<LayerSpec>,
}

impl Default for Config {
    fn default() -> Self {
        let data = DataConfig::default();
        let network = NetworkConfig {
            learning_rate: 0.001,
            loss: LossFunction::weighted_binary_cross_entropy(),
            positive_prior: Some(data.numbers_per_draw as f64 / data.total_numbers as f64),
            ..Default::default()
        };
        let layers = vec![
            LayerSpec::dense("hidden", LayerType::Hidden, 64, ActivationType::ReLU)
                .with_init(WeightInit::He),
            LayerSpec::dropout("dropout", 0.2),
            LayerSpec::dense("output", LayerType::Output, data.total_numbers, ActivationType::Sigmoid)
                .with_init(WeightInit::Xavier),
        ];

        Self {
            network,
            training: TrainingConfig::default(),
            data,
            logging: LoggingConfig::default(),
            layers,
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from file or use default
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Using default configuration, {} not loaded: {}",
                    path.as_ref().display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create default configuration file
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        Config::default().save(path)
    }

    /// Build a freshly initialised network for inputs of `input_width`
    pub fn build_network(&self, input_width: usize) -> Result<NeuralNetwork> {
        let mut rng = match self.network.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        NeuralNetwork::from_config(&self.network, &self.layers, input_width, &mut rng)
    }
}
