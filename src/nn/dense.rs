//! Dense (Fully Connected) Layer Implementation
//!
//! A dense layer performs: output = activation(weights · input + bias)
//!
//! The weight matrix has one row per neuron and one column per input.
//! Gradients collected by `backward` are summed into accumulators that stay
//! put until an optimizer consumes them through [`DenseLayer::take_gradients`],
//! which hands them over and zeroes the buffers in the same call.

use std::mem;

use ndarray::{Array1, Array2, Axis};
use rand::Rng;

use super::activation::ActivationType;
use super::init::WeightInit;
use super::layer::LayerType;
use crate::error::{NnError, Result};

/// Default L1 coefficient of a new dense layer
pub const DEFAULT_L1_LAMBDA: f64 = 0.1;

/// Default L2 coefficient of a new dense layer
pub const DEFAULT_L2_LAMBDA: f64 = 0.1;

/// Gradients consumed from a dense layer by an optimizer step
#[derive(Debug, Clone, PartialEq)]
pub struct DenseGradients {
    /// Same shape as the layer's weights
    pub weights: Array2<f64>,
    /// Same length as the layer's biases
    pub biases: Array1<f64>,
}

/// Dense layer with weights, biases, and activation function
#[derive(Debug, Clone)]
pub struct DenseLayer {
    pub tag: String,
    pub layer_type: LayerType,
    /// Weight matrix (neurons x inputs)
    pub weights: Array2<f64>,
    /// Bias vector (neurons)
    pub biases: Array1<f64>,
    pub activation: ActivationType,
    /// Activation whose derivative drives the backward pass, normally the same as `activation`
    pub activation_derivative: ActivationType,
    pub learning_rate: f64,
    pub l1_lambda: f64,
    pub l2_lambda: f64,

    accumulated_weights: Array2<f64>,
    accumulated_biases: Array1<f64>,
    pending_backward_passes: usize,

    // Cached values for backpropagation
    last_input: Option<Array1<f64>>,
    last_z: Option<Array1<f64>>,
    last_inputs: Option<Array2<f64>>,
    last_zs: Option<Array2<f64>>,
}

impl DenseLayer {
    /// Create a layer from explicit weights and biases
    pub fn new(
        tag: impl Into<String>,
        layer_type: LayerType,
        weights: Array2<f64>,
        biases: Array1<f64>,
        activation: ActivationType,
    ) -> Result<Self> {
        let tag = tag.into();
        if layer_type == LayerType::Dropout {
            return Err(NnError::UnsupportedLayer(format!(
                "dense layer '{}' cannot have type {}",
                tag,
                layer_type.as_str()
            )));
        }
        if weights.nrows() == 0 || weights.ncols() == 0 {
            return Err(NnError::InvalidParameter(format!(
                "dense layer '{}' needs at least one neuron and one input",
                tag
            )));
        }
        if biases.len() != weights.nrows() {
            return Err(NnError::dimension(
                format!("biases of layer '{}'", tag),
                weights.nrows(),
                biases.len(),
            ));
        }

        let accumulated_weights = Array2::zeros(weights.dim());
        let accumulated_biases = Array1::zeros(biases.len());

        Ok(Self {
            tag,
            layer_type,
            weights,
            biases,
            activation,
            activation_derivative: activation,
            learning_rate: 0.0,
            l1_lambda: DEFAULT_L1_LAMBDA,
            l2_lambda: DEFAULT_L2_LAMBDA,
            accumulated_weights,
            accumulated_biases,
            pending_backward_passes: 0,
            last_input: None,
            last_z: None,
            last_inputs: None,
            last_zs: None,
        })
    }

    /// Create a layer with generated weights and zero biases
    pub fn with_init<R: Rng + ?Sized>(
        tag: impl Into<String>,
        layer_type: LayerType,
        neurons: usize,
        inputs: usize,
        activation: ActivationType,
        init: WeightInit,
        rng: &mut R,
    ) -> Result<Self> {
        if neurons == 0 || inputs == 0 {
            return Err(NnError::InvalidParameter(format!(
                "cannot initialise a {}x{} weight matrix",
                neurons, inputs
            )));
        }
        let weights = init.generate(neurons, inputs, rng);
        Self::new(tag, layer_type, weights, Array1::zeros(neurons), activation)
    }

    /// Use a different activation for the derivative in the backward pass
    pub fn with_derivative(mut self, derivative: ActivationType) -> Self {
        self.activation_derivative = derivative;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_regularization(mut self, l1_lambda: f64, l2_lambda: f64) -> Self {
        self.l1_lambda = l1_lambda;
        self.l2_lambda = l2_lambda;
        self
    }

    /// Number of inputs per sample
    pub fn input_size(&self) -> usize {
        self.weights.ncols()
    }

    /// Number of neurons
    pub fn output_size(&self) -> usize {
        self.weights.nrows()
    }

    /// Get number of parameters
    pub fn num_parameters(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    pub fn accumulated_weights(&self) -> &Array2<f64> {
        &self.accumulated_weights
    }

    pub fn accumulated_biases(&self) -> &Array1<f64> {
        &self.accumulated_biases
    }

    /// Backward passes accumulated since the last [`take_gradients`](Self::take_gradients)
    pub fn pending_backward_passes(&self) -> usize {
        self.pending_backward_passes
    }

    fn pre_activation(&self, input: &Array1<f64>) -> Result<Array1<f64>> {
        if input.len() != self.input_size() {
            return Err(NnError::dimension(
                format!("input of layer '{}'", self.tag),
                self.input_size(),
                input.len(),
            ));
        }
        Ok(self.weights.dot(input) + &self.biases)
    }

    fn pre_activation_batch(&self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        if inputs.ncols() != self.input_size() {
            return Err(NnError::dimension(
                format!("batch input of layer '{}'", self.tag),
                self.input_size(),
                inputs.ncols(),
            ));
        }
        Ok(inputs.dot(&self.weights.t()) + &self.biases)
    }

    /// Forward pass for a single sample.
    ///
    /// Caches the input for [`backward`](Self::backward) and drops any cached
    /// batch, so a later `backward_batch` fails instead of reusing it.
    pub fn forward(&mut self, input: &Array1<f64>) -> Result<Array1<f64>> {
        let z = self.pre_activation(input)?;
        let output = self.activation.forward(&z);

        self.last_input = Some(input.clone());
        self.last_z = Some(z);
        self.last_inputs = None;
        self.last_zs = None;
        Ok(output)
    }

    /// Forward pass for a batch, one sample per row. Drops any cached single sample.
    pub fn forward_batch(&mut self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        let z = self.pre_activation_batch(inputs)?;
        let output = self.activation.forward_batch(&z);

        self.last_inputs = Some(inputs.clone());
        self.last_zs = Some(z);
        self.last_input = None;
        self.last_z = None;
        Ok(output)
    }

    /// Output for one sample without touching the backward caches
    pub fn infer(&self, input: &Array1<f64>) -> Result<Array1<f64>> {
        Ok(self.activation.forward(&self.pre_activation(input)?))
    }

    pub fn infer_batch(&self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        Ok(self.activation.forward_batch(&self.pre_activation_batch(inputs)?))
    }

    /// Backward pass for a single sample.
    ///
    /// Accumulates weight and bias gradients and returns the delta for the
    /// previous layer. The incoming gradient is multiplied by the derivative
    /// evaluated at the cached pre-activation; for Softmax that derivative is
    /// the Jacobian diagonal only, the off-diagonal terms are dropped.
    pub fn backward(&mut self, loss_gradient: &Array1<f64>) -> Result<Array1<f64>> {
        let (input, z) = match (&self.last_input, &self.last_z) {
            (Some(input), Some(z)) => (input, z),
            _ => return Err(NnError::BackwardBeforeForward(self.tag.clone())),
        };
        if loss_gradient.len() != self.output_size() {
            return Err(NnError::dimension(
                format!("gradient of layer '{}'", self.tag),
                self.output_size(),
                loss_gradient.len(),
            ));
        }

        let activation_gradient = loss_gradient * &self.activation_derivative.backward(z);

        // Outer product: (neurons x 1) · (1 x inputs)
        let column = activation_gradient.view().insert_axis(Axis(1));
        let row = input.view().insert_axis(Axis(0));
        self.accumulated_weights += &column.dot(&row);
        self.accumulated_biases += &activation_gradient;
        self.pending_backward_passes += 1;

        Ok(self.weights.t().dot(&activation_gradient))
    }

    /// Backward pass for a batch.
    ///
    /// Weight and bias contributions are averaged over the batch; the returned
    /// previous-layer deltas stay per sample.
    pub fn backward_batch(&mut self, loss_gradients: &Array2<f64>) -> Result<Array2<f64>> {
        let (inputs, zs) = match (&self.last_inputs, &self.last_zs) {
            (Some(inputs), Some(zs)) => (inputs, zs),
            _ => return Err(NnError::BackwardBeforeForward(self.tag.clone())),
        };
        if loss_gradients.nrows() != inputs.nrows() {
            return Err(NnError::dimension(
                format!("gradient batch of layer '{}'", self.tag),
                inputs.nrows(),
                loss_gradients.nrows(),
            ));
        }
        if loss_gradients.ncols() != self.output_size() {
            return Err(NnError::dimension(
                format!("gradient of layer '{}'", self.tag),
                self.output_size(),
                loss_gradients.ncols(),
            ));
        }

        let batch_size = inputs.nrows() as f64;
        let activation_gradients = loss_gradients * &self.activation_derivative.backward_batch(zs);

        self.accumulated_weights += &(activation_gradients.t().dot(inputs) / batch_size);
        self.accumulated_biases += &(activation_gradients.sum_axis(Axis(0)) / batch_size);
        self.pending_backward_passes += 1;

        Ok(activation_gradients.dot(&self.weights))
    }

    /// Hand the accumulated gradients to the caller and reset the accumulators
    pub fn take_gradients(&mut self) -> DenseGradients {
        let weights = mem::replace(
            &mut self.accumulated_weights,
            Array2::zeros(self.weights.dim()),
        );
        let biases = mem::replace(
            &mut self.accumulated_biases,
            Array1::zeros(self.biases.len()),
        );
        self.pending_backward_passes = 0;
        DenseGradients { weights, biases }
    }
}
