//! # lotto_nn
//!
//! A small feed-forward neural network library with hand-written gradients,
//! used to score lottery numbers from a window of past draws.
//!
//! ## Modules
//!
//! - `nn` - Layers, activations, losses, optimizers, the network and its checkpoints
//! - `data` - Training samples, datasets and draw-window encoding
//! - `trainer` - Epoch/mini-batch training driver with checkpointing
//! - `config` - TOML configuration
//! - `logging` - tracing subscriber setup
//! - `error` - Crate error type

pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod nn;
pub mod trainer;

pub use config::Config;
pub use data::{Dataset, DrawWindowEncoder, TrainingSample};
pub use error::{NnError, Result};
pub use nn::{Checkpoint, NeuralNetwork, TrainingReport};
pub use trainer::{Trainer, TrainingConfig, TrainingHistory};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::data::{Dataset, DrawWindowEncoder, TrainingSample};
    pub use crate::error::{NnError, Result};
    pub use crate::nn::{
        ActivationType, Adam, Checkpoint, DenseLayer, DropoutLayer, GradientClipping, Layer,
        LayerSpec, LayerType, LossFunction, NetworkConfig, NeuralNetwork, Optimizer,
        OptimizerType, RegularizationType, TrainingReport, WeightInit,
    };
    pub use crate::trainer::{Trainer, TrainingConfig, TrainingHistory};
}
