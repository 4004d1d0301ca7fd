//! Neural Network Module
//!
//! Provides building blocks for feedforward neural networks:
//! - Activation functions (ReLU, LeakyReLU, Sigmoid, Tanh, Softmax)
//! - Loss functions with hand-written gradients
//! - Dense and dropout layers with forward and backward propagation
//! - SGD and Adam optimizers, L1/L2 regularization, gradient clipping
//! - Full network with training capabilities and JSON checkpoints

mod activation;
mod checkpoint;
mod dense;
mod dropout;
mod init;
mod layer;
pub mod loss;
mod network;
mod optimizer;
mod regularization;

pub use activation::{
    sigmoid_scalar, softmax_jacobian, ActivationFns, ActivationType, LEAKY_RELU_ALPHA,
};
pub use checkpoint::{Checkpoint, LayerRecord, LossFunctionRecord};
pub use dense::{DenseGradients, DenseLayer, DEFAULT_L1_LAMBDA, DEFAULT_L2_LAMBDA};
pub use dropout::DropoutLayer;
pub use init::WeightInit;
pub use layer::{Layer, LayerType};
pub use loss::{LossFunction, LossFunctionType};
pub use network::{
    LayerSpec, NetworkConfig, NeuralNetwork, TrainingReport, DEFAULT_LEARNING_RATE,
    DEFAULT_POSITIVE_OUTPUT_THRESHOLD, DEFAULT_POSITIVE_TARGET_THRESHOLD,
};
pub use optimizer::{Adam, GradientClipping, LayerMoments, Optimizer, OptimizerType, Sgd};
pub use regularization::{apply_l1, apply_l2, RegularizationType};
