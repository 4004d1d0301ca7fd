//! Neural Network Implementation
//!
//! Ordered layer stack with training orchestration: forward, loss and
//! gradient, backward in reverse order, regularization, then the optimizer
//! step that consumes the accumulated gradients.

use std::fmt::Write as _;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::activation::ActivationType;
use super::checkpoint::Checkpoint;
use super::dense::{DenseLayer, DEFAULT_L1_LAMBDA, DEFAULT_L2_LAMBDA};
use super::dropout::DropoutLayer;
use super::init::WeightInit;
use super::layer::{Layer, LayerType};
use super::loss::LossFunction;
use super::optimizer::{Adam, GradientClipping, Optimizer, OptimizerType};
use super::regularization::RegularizationType;
use crate::error::{NnError, Result};

pub const DEFAULT_LEARNING_RATE: f64 = 0.001;
pub const DEFAULT_POSITIVE_TARGET_THRESHOLD: f64 = 0.5;
pub const DEFAULT_POSITIVE_OUTPUT_THRESHOLD: f64 = 1.0;

/// Network-level hyperparameters, the `[network]` table of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub learning_rate: f64,
    /// Targets at or above this value count as positive
    pub positive_target_threshold: f64,
    /// Outputs at or above this value count as predicted positive
    pub positive_output_threshold: f64,
    pub loss: LossFunction,
    pub optimizer: OptimizerType,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub adam_epsilon: f64,
    pub regularization: RegularizationType,
    pub gradient_clipping: GradientClipping,
    /// Prior probability of the positive class; sets the output biases when present
    pub positive_prior: Option<f64>,
    /// Seed for weight initialisation and dropout masks
    pub seed: Option<u64>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            learning_rate: DEFAULT_LEARNING_RATE,
            positive_target_threshold: DEFAULT_POSITIVE_TARGET_THRESHOLD,
            positive_output_threshold: DEFAULT_POSITIVE_OUTPUT_THRESHOLD,
            loss: LossFunction::default(),
            optimizer: OptimizerType::Adam,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-8,
            regularization: RegularizationType::None,
            gradient_clipping: GradientClipping::None,
            positive_prior: None,
            seed: None,
        }
    }
}

impl NetworkConfig {
    pub fn build_optimizer(&self) -> Optimizer {
        match self.optimizer {
            OptimizerType::SGD => Optimizer::from_type(OptimizerType::SGD),
            OptimizerType::Adam => {
                let mut adam = Adam::new().with_betas(self.adam_beta1, self.adam_beta2);
                adam.epsilon = self.adam_epsilon;
                Optimizer::Adam(adam)
            }
        }
    }
}

/// One entry of the `[[layers]]` list of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub tag: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    /// Neuron count, unused for dropout layers
    #[serde(default)]
    pub neurons: usize,
    #[serde(default = "default_activation")]
    pub activation: ActivationType,
    #[serde(default)]
    pub init: WeightInit,
    #[serde(default = "default_l1_lambda")]
    pub l1_lambda: f64,
    #[serde(default = "default_l2_lambda")]
    pub l2_lambda: f64,
    #[serde(default)]
    pub dropout_rate: f64,
    #[serde(default)]
    pub dropout_value: f64,
}

fn default_activation() -> ActivationType {
    ActivationType::ReLU
}

fn default_l1_lambda() -> f64 {
    DEFAULT_L1_LAMBDA
}

fn default_l2_lambda() -> f64 {
    DEFAULT_L2_LAMBDA
}

impl LayerSpec {
    pub fn dense(
        tag: impl Into<String>,
        layer_type: LayerType,
        neurons: usize,
        activation: ActivationType,
    ) -> Self {
        Self {
            tag: tag.into(),
            layer_type,
            neurons,
            activation,
            init: WeightInit::default(),
            l1_lambda: DEFAULT_L1_LAMBDA,
            l2_lambda: DEFAULT_L2_LAMBDA,
            dropout_rate: 0.0,
            dropout_value: 0.0,
        }
    }

    pub fn dropout(tag: impl Into<String>, rate: f64) -> Self {
        Self {
            dropout_rate: rate,
            ..Self::dense(tag, LayerType::Dropout, 0, ActivationType::ReLU)
        }
    }

    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }
}

/// Diagnostics of one training step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub epoch: usize,
    pub loss: f64,
    pub samples: usize,
    pub target_negatives: usize,
    pub target_positives: usize,
    pub predicted_negatives: usize,
    pub predicted_positives: usize,
    pub matched_negatives: usize,
    pub matched_positives: usize,
}

impl TrainingReport {
    pub fn matched(&self) -> usize {
        self.matched_negatives + self.matched_positives
    }

    pub fn total(&self) -> usize {
        self.target_negatives + self.target_positives
    }

    /// Fraction of output elements on the same side of the thresholds as their targets
    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.matched() as f64 / total as f64,
        }
    }

    fn count(&mut self, output: ArrayView1<f64>, target: ArrayView1<f64>, thresholds: (f64, f64)) -> Result<()> {
        let (target_threshold, output_threshold) = thresholds;

        let negatives = target.iter().filter(|t| **t < target_threshold).count();
        let positives = target.iter().filter(|t| **t >= target_threshold).count();
        if negatives + positives != target.len() {
            return Err(NnError::TargetCountMismatch {
                negatives,
                positives,
                total: target.len(),
            });
        }

        self.samples += 1;
        self.target_negatives += negatives;
        self.target_positives += positives;
        self.predicted_negatives += output.iter().filter(|o| **o < output_threshold).count();
        self.predicted_positives += output.iter().filter(|o| **o >= output_threshold).count();
        for (t, o) in target.iter().zip(output.iter()) {
            if *t < target_threshold && *o < output_threshold {
                self.matched_negatives += 1;
            } else if *t >= target_threshold && *o >= output_threshold {
                self.matched_positives += 1;
            }
        }
        Ok(())
    }
}

/// Feedforward Neural Network
#[derive(Debug, Clone)]
pub struct NeuralNetwork {
    pub label: String,
    layers: Vec<Layer>,
    pub loss_function: LossFunction,
    pub optimizer: Optimizer,
    pub regularization: RegularizationType,
    pub gradient_clipping: GradientClipping,
    learning_rate: f64,
    pub positive_target_threshold: f64,
    pub positive_output_threshold: f64,
    /// Epoch number of the last training step, 0 before any training
    pub epoch: usize,
    /// Loss of the last training step
    pub loss: f64,
}

impl NeuralNetwork {
    pub fn new(
        loss_function: LossFunction,
        optimizer: Optimizer,
        regularization: RegularizationType,
    ) -> Self {
        Self {
            label: String::from("network"),
            layers: Vec::new(),
            loss_function,
            optimizer,
            regularization,
            gradient_clipping: GradientClipping::None,
            learning_rate: DEFAULT_LEARNING_RATE,
            positive_target_threshold: DEFAULT_POSITIVE_TARGET_THRESHOLD,
            positive_output_threshold: DEFAULT_POSITIVE_OUTPUT_THRESHOLD,
            epoch: 0,
            loss: 0.0,
        }
    }

    /// Build a network from the config tables, drawing initial weights from `rng`
    pub fn from_config<R: Rng + ?Sized>(
        config: &NetworkConfig,
        specs: &[LayerSpec],
        input_width: usize,
        rng: &mut R,
    ) -> Result<Self> {
        if specs.is_empty() {
            return Err(NnError::InvalidTopology(
                "configuration lists no layers".to_string(),
            ));
        }

        let mut network = Self::new(
            config.loss,
            config.build_optimizer(),
            config.regularization,
        )
        .with_learning_rate(config.learning_rate)
        .with_thresholds(
            config.positive_target_threshold,
            config.positive_output_threshold,
        )
        .with_gradient_clipping(config.gradient_clipping);

        let mut width = input_width;
        for spec in specs {
            let layer: Layer = match spec.layer_type {
                LayerType::Dropout => DropoutLayer::new(spec.tag.as_str(), spec.dropout_rate)?
                    .with_value(spec.dropout_value)
                    .with_seed(rng.gen())
                    .into(),
                layer_type => {
                    let dense = DenseLayer::with_init(
                        spec.tag.as_str(),
                        layer_type,
                        spec.neurons,
                        width,
                        spec.activation,
                        spec.init,
                        rng,
                    )?
                    .with_regularization(spec.l1_lambda, spec.l2_lambda);
                    width = spec.neurons;
                    dense.into()
                }
            };
            network.add_layer(layer)?;
        }

        if let Some(prior) = config.positive_prior {
            network.optimize_output_layer_biases_for_binary_imbalances(prior)?;
        }
        Ok(network)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set the network learning rate and propagate it to existing layers
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.update_learning_rate(learning_rate);
        self
    }

    pub fn with_thresholds(mut self, target_threshold: f64, output_threshold: f64) -> Self {
        self.positive_target_threshold = target_threshold;
        self.positive_output_threshold = output_threshold;
        self
    }

    pub fn with_gradient_clipping(mut self, clipping: GradientClipping) -> Self {
        self.gradient_clipping = clipping;
        self
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Change the learning rate of the network and every dense layer
    pub fn update_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
        for dense in self.layers.iter_mut().filter_map(Layer::as_dense_mut) {
            dense.learning_rate = learning_rate;
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Append a layer, handing it the network learning rate
    pub fn add_layer(&mut self, layer: impl Into<Layer>) -> Result<()> {
        let mut layer = layer.into();
        if let Some(dense) = layer.as_dense_mut() {
            dense.learning_rate = self.learning_rate;
        }
        self.push_layer(layer)
    }

    pub fn add_layers<I>(&mut self, layers: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Layer>,
    {
        for layer in layers {
            self.add_layer(layer)?;
        }
        Ok(())
    }

    /// Append a layer as is, keeping its own learning rate
    pub(crate) fn push_layer(&mut self, layer: Layer) -> Result<()> {
        let layer_type = layer.layer_type();
        if matches!(layer_type, LayerType::Input | LayerType::Output)
            && self.count_layers(layer_type) > 0
        {
            return Err(NnError::InvalidTopology(format!(
                "layer '{}' would be a second {} layer",
                layer.tag(),
                layer_type
            )));
        }
        if let (Some(previous), Some(next)) = (self.output_width(), layer.input_width()) {
            if previous != next {
                return Err(NnError::dimension(
                    format!("input of layer '{}'", layer.tag()),
                    previous,
                    next,
                ));
            }
        }
        self.layers.push(layer);
        Ok(())
    }

    fn count_layers(&self, layer_type: LayerType) -> usize {
        self.layers
            .iter()
            .filter(|layer| layer.layer_type() == layer_type)
            .count()
    }

    /// Width expected by the first dense layer
    pub fn input_width(&self) -> Option<usize> {
        self.layers.iter().find_map(Layer::input_width)
    }

    /// Width produced by the last dense layer
    pub fn output_width(&self) -> Option<usize> {
        self.layers.iter().rev().find_map(Layer::output_width)
    }

    /// Check the layer count rules and that adjacent widths line up
    pub fn validate_topology(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(NnError::InvalidTopology("network has no layers".to_string()));
        }
        for layer_type in [LayerType::Input, LayerType::Output] {
            let count = self.count_layers(layer_type);
            if count > 1 {
                return Err(NnError::InvalidTopology(format!(
                    "found {} {} layers, at most one is allowed",
                    count, layer_type
                )));
            }
        }

        let mut width: Option<usize> = None;
        for layer in &self.layers {
            if let (Some(previous), Some(next)) = (width, layer.input_width()) {
                if previous != next {
                    return Err(NnError::dimension(
                        format!("input of layer '{}'", layer.tag()),
                        previous,
                        next,
                    ));
                }
            }
            if let Some(output) = layer.output_width() {
                width = Some(output);
            }
        }
        Ok(())
    }

    fn output_layer_mut(&mut self) -> Result<&mut DenseLayer> {
        let count = self.count_layers(LayerType::Output);
        if count != 1 {
            return Err(NnError::InvalidTopology(format!(
                "expected exactly one OUTPUT layer, found {}",
                count
            )));
        }
        self.layers
            .iter_mut()
            .filter_map(Layer::as_dense_mut)
            .find(|dense| dense.layer_type == LayerType::Output)
            .ok_or_else(|| NnError::InvalidTopology("OUTPUT layer is not a dense layer".to_string()))
    }

    /// Set every output bias to the log-odds `ln(p / (1 - p))` of the positive class prior
    pub fn optimize_output_layer_biases_for_binary_imbalances(
        &mut self,
        positive_prior: f64,
    ) -> Result<()> {
        if !(positive_prior > 0.0 && positive_prior < 1.0) {
            return Err(NnError::InvalidParameter(format!(
                "positive class prior must be in (0, 1), got {}",
                positive_prior
            )));
        }
        let bias = (positive_prior / (1.0 - positive_prior)).ln();
        let output = self.output_layer_mut()?;
        output.biases.fill(bias);
        info!(
            "Output layer '{}' biases set to {:.4} for prior {:.4}",
            output.tag, bias, positive_prior
        );
        Ok(())
    }

    fn ensure_layers(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(NnError::InvalidTopology("network has no layers".to_string()));
        }
        Ok(())
    }

    /// Training forward pass (dropout active)
    pub fn forward(&mut self, input: &Array1<f64>) -> Result<Array1<f64>> {
        self.ensure_layers()?;
        self.layers
            .iter_mut()
            .try_fold(input.clone(), |x, layer| layer.forward(&x))
    }

    pub fn forward_batch(&mut self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        self.ensure_layers()?;
        self.layers
            .iter_mut()
            .try_fold(inputs.clone(), |x, layer| layer.forward_batch(&x))
    }

    /// Inference forward pass (dropout disabled)
    pub fn predict(&self, input: &Array1<f64>) -> Result<Array1<f64>> {
        self.ensure_layers()?;
        self.layers
            .iter()
            .try_fold(input.clone(), |x, layer| layer.predict(&x))
    }

    pub fn predict_batch(&self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        self.ensure_layers()?;
        self.layers
            .iter()
            .try_fold(inputs.clone(), |x, layer| layer.predict_batch(&x))
    }

    fn backward(&mut self, gradient: Array1<f64>) -> Result<()> {
        self.layers
            .iter_mut()
            .rev()
            .try_fold(gradient, |g, layer| layer.backward(&g))?;
        Ok(())
    }

    fn backward_batch(&mut self, gradients: Array2<f64>) -> Result<()> {
        self.layers
            .iter_mut()
            .rev()
            .try_fold(gradients, |g, layer| layer.backward_batch(&g))?;
        Ok(())
    }

    fn optimize(&mut self) {
        self.regularization.apply(&mut self.layers);
        self.optimizer.step(&mut self.layers, self.gradient_clipping);
    }

    fn warn_on_pending_gradients(&self) {
        for dense in self.layers.iter().filter_map(Layer::as_dense) {
            if dense.pending_backward_passes() > 0 {
                warn!(
                    "Layer '{}' carries gradients from {} earlier backward pass(es); they join this step",
                    dense.tag,
                    dense.pending_backward_passes()
                );
            }
        }
    }

    fn thresholds(&self) -> (f64, f64) {
        (self.positive_target_threshold, self.positive_output_threshold)
    }

    /// One training step on a single sample
    pub fn train(
        &mut self,
        epoch: usize,
        input: &Array1<f64>,
        target: &Array1<f64>,
    ) -> Result<TrainingReport> {
        self.epoch = epoch;
        let output = self.forward(input)?;

        let threshold = self.positive_target_threshold;
        let loss = self.loss_function.calculate_loss(&output, target, threshold)?;
        let gradient = self.loss_function.calculate_gradient(&output, target, threshold)?;

        let mut report = TrainingReport {
            epoch,
            loss,
            ..Default::default()
        };
        report.count(output.view(), target.view(), self.thresholds())?;

        self.warn_on_pending_gradients();
        self.backward(gradient)?;
        self.optimize();

        self.finish_step(report);
        Ok(report)
    }

    /// One training step on a mini-batch, one sample per row
    pub fn train_batch(
        &mut self,
        epoch: usize,
        inputs: &Array2<f64>,
        targets: &Array2<f64>,
    ) -> Result<TrainingReport> {
        if inputs.nrows() == 0 {
            return Err(NnError::EmptyInput("training batch has no rows".to_string()));
        }
        self.epoch = epoch;
        let outputs = self.forward_batch(inputs)?;

        let threshold = self.positive_target_threshold;
        let loss = self
            .loss_function
            .calculate_loss_batch(&outputs, targets, threshold)?;
        let gradients = self
            .loss_function
            .calculate_gradient_batch(&outputs, targets, threshold)?;

        let mut report = TrainingReport {
            epoch,
            loss,
            ..Default::default()
        };
        for (output, target) in outputs.outer_iter().zip(targets.outer_iter()) {
            report.count(output, target, self.thresholds())?;
        }

        self.warn_on_pending_gradients();
        self.backward_batch(gradients)?;
        self.optimize();

        self.finish_step(report);
        Ok(report)
    }

    fn finish_step(&mut self, report: TrainingReport) {
        self.loss = report.loss;
        if !report.loss.is_finite() {
            warn!("Epoch {}: loss is not finite ({})", report.epoch, report.loss);
        }
        debug!(
            "Epoch {} loss {:.6} | predicted 0s: {} 1s: {} | matched 0s: {}/{} 1s: {}/{} | matched: {}/{}",
            report.epoch,
            report.loss,
            report.predicted_negatives,
            report.predicted_positives,
            report.matched_negatives,
            report.target_negatives,
            report.matched_positives,
            report.target_positives,
            report.matched(),
            report.total()
        );
    }

    /// Get total number of trainable parameters
    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .filter_map(Layer::as_dense)
            .map(DenseLayer::num_parameters)
            .sum()
    }

    /// Human readable layer table
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Network '{}'", self.label);
        let _ = writeln!(out, "{:-<60}", "");
        for (i, layer) in self.layers.iter().enumerate() {
            let _ = match layer {
                Layer::Dense(dense) => writeln!(
                    out,
                    "{:>2} {:<12} {:<7} {:>4} -> {:<4} {:<10} params: {}",
                    i,
                    dense.tag,
                    dense.layer_type.as_str(),
                    dense.input_size(),
                    dense.output_size(),
                    dense.activation.as_str(),
                    dense.num_parameters()
                ),
                Layer::Dropout(dropout) => writeln!(
                    out,
                    "{:>2} {:<12} {:<7} rate: {:.2}",
                    i,
                    dropout.tag,
                    LayerType::Dropout.as_str(),
                    dropout.rate()
                ),
            };
        }
        let _ = writeln!(out, "{:-<60}", "");
        let _ = writeln!(
            out,
            "Loss: {} | Optimizer: {} | Regularization: {} | Parameters: {}",
            self.loss_function.loss_type(),
            self.optimizer.optimizer_type(),
            self.regularization,
            self.num_parameters()
        );
        out
    }

    /// Save model to a checkpoint file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        Checkpoint::capture(self).save(path)
    }

    /// Load model from a checkpoint file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Checkpoint::load(path)?.restore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn dense(tag: &str, layer_type: LayerType, weights: Array2<f64>, activation: ActivationType) -> DenseLayer {
        let biases = Array1::zeros(weights.nrows());
        DenseLayer::new(tag, layer_type, weights, biases, activation).unwrap()
    }

    fn sgd_network() -> NeuralNetwork {
        NeuralNetwork::new(
            LossFunction::BinaryCrossEntropy,
            Optimizer::from_type(OptimizerType::SGD),
            RegularizationType::None,
        )
    }

    #[test]
    fn test_add_layer_propagates_learning_rate() {
        let mut network = sgd_network().with_learning_rate(0.05);
        network
            .add_layer(dense("out", LayerType::Output, array![[1.0]], ActivationType::Sigmoid).with_learning_rate(9.0))
            .unwrap();
        assert_eq!(network.layers()[0].as_dense().unwrap().learning_rate, 0.05);

        network.update_learning_rate(0.2);
        assert_eq!(network.learning_rate(), 0.2);
        assert_eq!(network.layers()[0].as_dense().unwrap().learning_rate, 0.2);
    }

    #[test]
    fn test_topology_rules() {
        let mut network = sgd_network();
        network
            .add_layer(dense("in", LayerType::Input, array![[1.0, 1.0]], ActivationType::ReLU))
            .unwrap();
        let err = network
            .add_layer(dense("in2", LayerType::Input, array![[1.0]], ActivationType::ReLU))
            .unwrap_err();
        assert!(matches!(err, NnError::InvalidTopology(_)));

        let err = network
            .add_layer(dense("out", LayerType::Output, array![[1.0, 2.0]], ActivationType::Sigmoid))
            .unwrap_err();
        assert!(matches!(err, NnError::DimensionMismatch { expected: 1, actual: 2, .. }));

        network
            .add_layer(dense("out", LayerType::Output, array![[1.0]], ActivationType::Sigmoid))
            .unwrap();
        assert!(network
            .add_layer(dense("out2", LayerType::Output, array![[1.0]], ActivationType::Sigmoid))
            .is_err());
        network.validate_topology().unwrap();
        assert_eq!(network.input_width(), Some(2));
        assert_eq!(network.output_width(), Some(1));
    }

    #[test]
    fn test_empty_network_is_rejected() {
        let mut network = sgd_network();
        assert!(network.validate_topology().is_err());
        assert!(network.forward(&array![1.0]).is_err());
    }

    #[test]
    fn test_output_bias_initialisation() {
        let mut network = sgd_network();
        network
            .add_layer(dense("hidden", LayerType::Hidden, array![[1.0], [1.0]], ActivationType::ReLU))
            .unwrap();
        assert!(matches!(
            network.optimize_output_layer_biases_for_binary_imbalances(0.1),
            Err(NnError::InvalidTopology(_))
        ));

        network
            .add_layer(dense("out", LayerType::Output, Array2::zeros((3, 2)), ActivationType::Sigmoid))
            .unwrap();
        network
            .optimize_output_layer_biases_for_binary_imbalances(0.1)
            .unwrap();
        let biases = &network.layers()[1].as_dense().unwrap().biases;
        for b in biases.iter() {
            assert_relative_eq!(*b, (0.1f64 / 0.9).ln(), epsilon = 1e-12);
        }

        // Output probabilities start at the prior
        let output = network.predict(&array![0.0]).unwrap();
        assert_relative_eq!(output[0], 0.1, epsilon = 1e-12);

        assert!(network
            .optimize_output_layer_biases_for_binary_imbalances(1.0)
            .is_err());
    }

    #[test]
    fn test_report_counts() {
        let mut network = sgd_network().with_thresholds(0.5, 0.5);
        network
            .add_layer(dense("out", LayerType::Output, Array2::zeros((3, 1)), ActivationType::Sigmoid))
            .unwrap();

        // Zero weights and biases give 0.5 everywhere, all predicted positive
        let report = network
            .train(1, &array![1.0], &array![1.0, 0.0, 1.0])
            .unwrap();
        assert_eq!(report.samples, 1);
        assert_eq!(report.target_positives, 2);
        assert_eq!(report.target_negatives, 1);
        assert_eq!(report.predicted_positives, 3);
        assert_eq!(report.predicted_negatives, 0);
        assert_eq!(report.matched_positives, 2);
        assert_eq!(report.matched_negatives, 0);
        assert_relative_eq!(report.accuracy(), 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(report.loss, 0.5f64.ln().abs(), epsilon = 1e-9);
        assert_eq!(network.epoch, 1);
        assert_eq!(network.loss, report.loss);
    }

    #[test]
    fn test_nan_target_is_fatal() {
        let mut network = sgd_network();
        network
            .add_layer(dense("out", LayerType::Output, array![[1.0]], ActivationType::Sigmoid))
            .unwrap();
        let err = network.train(1, &array![1.0], &array![f64::NAN]).unwrap_err();
        assert!(matches!(
            err,
            NnError::TargetCountMismatch { negatives: 0, positives: 0, total: 1 }
        ));
    }

    #[test]
    fn test_training_reduces_loss() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut network = sgd_network().with_learning_rate(2.0);
        network
            .add_layer(
                DenseLayer::with_init("hidden", LayerType::Hidden, 4, 2, ActivationType::Tanh, WeightInit::Xavier, &mut rng)
                    .unwrap(),
            )
            .unwrap();
        network
            .add_layer(
                DenseLayer::with_init("out", LayerType::Output, 1, 4, ActivationType::Sigmoid, WeightInit::Xavier, &mut rng)
                    .unwrap(),
            )
            .unwrap();

        let inputs = array![[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
        let targets = array![[0.0], [1.0], [1.0], [1.0]];

        let first = network.train_batch(1, &inputs, &targets).unwrap().loss;
        let mut last = first;
        for epoch in 2..=1000 {
            last = network.train_batch(epoch, &inputs, &targets).unwrap().loss;
        }
        assert!(last < first * 0.5, "loss went from {} to {}", first, last);

        for dense in network.layers().iter().filter_map(Layer::as_dense) {
            assert_eq!(dense.pending_backward_passes(), 0);
            assert!(dense.accumulated_weights().iter().all(|g| *g == 0.0));
        }
    }

    #[test]
    fn test_predict_disables_dropout() {
        let mut network = sgd_network();
        network
            .add_layer(dense("hidden", LayerType::Hidden, array![[1.0]], ActivationType::ReLU))
            .unwrap();
        network
            .add_layer(DropoutLayer::new("drop", 1.0).unwrap())
            .unwrap();
        network
            .add_layer(dense("out", LayerType::Output, array![[1.0]], ActivationType::ReLU))
            .unwrap();

        assert_eq!(network.forward(&array![2.0]).unwrap(), array![0.0]);
        assert_eq!(network.predict(&array![2.0]).unwrap(), array![2.0]);
        assert_eq!(
            network.predict_batch(&array![[2.0], [3.0]]).unwrap(),
            array![[2.0], [3.0]]
        );
    }

    #[test]
    fn test_from_config() {
        let config = NetworkConfig {
            positive_prior: Some(0.2),
            seed: Some(7),
            ..Default::default()
        };
        let specs = vec![
            LayerSpec::dense("hidden", LayerType::Hidden, 8, ActivationType::ReLU)
                .with_init(WeightInit::He),
            LayerSpec::dropout("drop", 0.2),
            LayerSpec::dense("out", LayerType::Output, 3, ActivationType::Sigmoid),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        let network = NeuralNetwork::from_config(&config, &specs, 5, &mut rng).unwrap();

        assert_eq!(network.layers().len(), 3);
        assert_eq!(network.input_width(), Some(5));
        assert_eq!(network.output_width(), Some(3));
        assert_eq!(network.num_parameters(), 5 * 8 + 8 + 8 * 3 + 3);
        assert_eq!(network.optimizer.optimizer_type(), OptimizerType::Adam);
        let out = network.layers()[2].as_dense().unwrap();
        assert_relative_eq!(out.biases[0], (0.2f64 / 0.8).ln(), epsilon = 1e-12);
        assert!(network.summary().contains("hidden"));

        assert!(NeuralNetwork::from_config(&config, &[], 5, &mut rng).is_err());
    }
}
