//! Optimization Algorithms
//!
//! Implements the weight update rules:
//! - SGD (Stochastic Gradient Descent)
//! - Adam (Adaptive Moment Estimation) with bias-corrected moments
//!
//! A step walks every dense layer, takes its accumulated gradients (which
//! resets the accumulators), optionally clips them and applies the update
//! with the layer's own learning rate.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::dense::{DenseGradients, DenseLayer};
use super::layer::Layer;
use crate::error::NnError;

/// Added to the gradient norm before dividing
const NORM_EPSILON: f64 = 1e-7;

/// Optimizer identifiers stored in checkpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerType {
    #[default]
    SGD,
    Adam,
}

impl OptimizerType {
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizerType::SGD => "SGD",
            OptimizerType::Adam => "Adam",
        }
    }
}

impl fmt::Display for OptimizerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerType {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SGD" => Ok(OptimizerType::SGD),
            "Adam" => Ok(OptimizerType::Adam),
            other => Err(NnError::UnknownIdentifier {
                kind: "optimizer",
                value: other.to_string(),
            }),
        }
    }
}

/// Gradient clipping applied between taking and applying gradients
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum GradientClipping {
    #[default]
    None,
    /// Clamp every component into [-limit, limit]
    Value { limit: f64 },
    /// Rescale weights and biases together when their L2 norm exceeds `max_norm`
    Norm { max_norm: f64 },
}

impl GradientClipping {
    pub fn apply(&self, gradients: &mut DenseGradients) {
        match *self {
            GradientClipping::None => {}
            GradientClipping::Value { limit } => {
                gradients.weights.mapv_inplace(|g| g.clamp(-limit, limit));
                gradients.biases.mapv_inplace(|g| g.clamp(-limit, limit));
            }
            GradientClipping::Norm { max_norm } => {
                let squared: f64 = gradients.weights.iter().map(|g| g * g).sum::<f64>()
                    + gradients.biases.iter().map(|g| g * g).sum::<f64>();
                let norm = squared.sqrt();
                if norm > max_norm {
                    let scale = max_norm / (norm + NORM_EPSILON);
                    gradients.weights.mapv_inplace(|g| g * scale);
                    gradients.biases.mapv_inplace(|g| g * scale);
                }
            }
        }
    }
}

/// Plain gradient descent: `w -= lr * g`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sgd;

impl Sgd {
    pub fn update(&self, layer: &mut DenseLayer, gradients: &DenseGradients) {
        let lr = layer.learning_rate;
        layer.weights.scaled_add(-lr, &gradients.weights);
        layer.biases.scaled_add(-lr, &gradients.biases);
    }
}

/// First and second moment estimates of one dense layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMoments {
    pub m_weights: Array2<f64>,
    pub v_weights: Array2<f64>,
    pub m_biases: Array1<f64>,
    pub v_biases: Array1<f64>,
}

impl LayerMoments {
    fn zeros(layer: &DenseLayer) -> Self {
        Self {
            m_weights: Array2::zeros(layer.weights.dim()),
            v_weights: Array2::zeros(layer.weights.dim()),
            m_biases: Array1::zeros(layer.biases.len()),
            v_biases: Array1::zeros(layer.biases.len()),
        }
    }

    fn matches(&self, layer: &DenseLayer) -> bool {
        self.m_weights.dim() == layer.weights.dim() && self.m_biases.len() == layer.biases.len()
    }
}

/// Adam optimizer (Adaptive Moment Estimation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    /// Number of optimizer steps taken
    t: u64,
    /// Moments keyed by the layer's position in the stack
    moments: BTreeMap<usize, LayerMoments>,
}

impl Default for Adam {
    fn default() -> Self {
        Self::new()
    }
}

impl Adam {
    pub fn new() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            moments: BTreeMap::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn step_count(&self) -> u64 {
        self.t
    }

    pub fn moments(&self, layer_index: usize) -> Option<&LayerMoments> {
        self.moments.get(&layer_index)
    }

    /// Moments of every layer seen so far, by layer index
    pub fn layer_moments(&self) -> impl Iterator<Item = (usize, &LayerMoments)> {
        self.moments.iter().map(|(index, moments)| (*index, moments))
    }

    /// Clear the step counter and all moments
    pub fn reset(&mut self) {
        self.t = 0;
        self.moments.clear();
    }

    fn update(&mut self, index: usize, layer: &mut DenseLayer, gradients: &DenseGradients) {
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);
        let correction1 = 1.0 - beta1.powf(self.t as f64);
        let correction2 = 1.0 - beta2.powf(self.t as f64);
        let lr = layer.learning_rate;

        let moments = self
            .moments
            .entry(index)
            .or_insert_with(|| LayerMoments::zeros(layer));
        // A layer replaced by one of another shape starts from fresh moments
        if !moments.matches(layer) {
            *moments = LayerMoments::zeros(layer);
        }

        let g_w = &gradients.weights;
        moments.m_weights = &moments.m_weights * beta1 + g_w * (1.0 - beta1);
        moments.v_weights = &moments.v_weights * beta2 + &(g_w * g_w) * (1.0 - beta2);
        let m_hat = &moments.m_weights / correction1;
        let v_hat = &moments.v_weights / correction2;
        layer.weights = &layer.weights - &(m_hat * lr / (v_hat.mapv(f64::sqrt) + epsilon));

        let g_b = &gradients.biases;
        moments.m_biases = &moments.m_biases * beta1 + g_b * (1.0 - beta1);
        moments.v_biases = &moments.v_biases * beta2 + &(g_b * g_b) * (1.0 - beta2);
        let m_hat = &moments.m_biases / correction1;
        let v_hat = &moments.v_biases / correction2;
        layer.biases = &layer.biases - &(m_hat * lr / (v_hat.mapv(f64::sqrt) + epsilon));
    }
}

/// Optimizer selected for a network
#[derive(Debug, Clone, PartialEq)]
pub enum Optimizer {
    Sgd(Sgd),
    Adam(Adam),
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::Sgd(Sgd)
    }
}

impl Optimizer {
    pub fn from_type(optimizer_type: OptimizerType) -> Self {
        match optimizer_type {
            OptimizerType::SGD => Optimizer::Sgd(Sgd),
            OptimizerType::Adam => Optimizer::Adam(Adam::new()),
        }
    }

    pub fn optimizer_type(&self) -> OptimizerType {
        match self {
            Optimizer::Sgd(_) => OptimizerType::SGD,
            Optimizer::Adam(_) => OptimizerType::Adam,
        }
    }

    /// Consume the accumulated gradients of every dense layer and update it.
    ///
    /// Accumulators are zero afterwards whether or not clipping changed the
    /// gradients.
    pub fn step(&mut self, layers: &mut [Layer], clipping: GradientClipping) {
        if let Optimizer::Adam(adam) = self {
            adam.t += 1;
        }

        for (index, layer) in layers.iter_mut().enumerate() {
            let Some(dense) = layer.as_dense_mut() else {
                continue;
            };
            let mut gradients = dense.take_gradients();
            clipping.apply(&mut gradients);

            match self {
                Optimizer::Sgd(sgd) => sgd.update(dense, &gradients),
                Optimizer::Adam(adam) => adam.update(index, dense, &gradients),
            }
        }
    }
}
