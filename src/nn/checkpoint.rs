//! Checkpoint file format
//!
//! A checkpoint is a JSON document holding the network hyperparameters, the
//! loss, optimizer and regularization identifiers and one record per layer.
//! Identifiers are stored as strings and resolved through the same lookup
//! tables the rest of the crate uses, so unknown names fail on restore.
//!
//! Adam moments are stored in the optional `optimizerState` block. Files
//! without it restore with fresh moments.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::activation::ActivationType;
use super::dense::DenseLayer;
use super::dropout::DropoutLayer;
use super::layer::{Layer, LayerType};
use super::loss::{LossFunction, LossFunctionType};
use super::network::NeuralNetwork;
use super::optimizer::{Adam, GradientClipping, Optimizer, OptimizerType};
use super::regularization::RegularizationType;
use crate::error::{NnError, Result};

/// Loss identifier plus its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LossFunctionRecord {
    pub loss_function_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positive_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_weight: Option<f64>,
}

impl LossFunctionRecord {
    fn capture(loss: &LossFunction) -> Self {
        let mut record = Self {
            loss_function_type: loss.loss_type().as_str().to_string(),
            threshold: None,
            gamma: None,
            positive_weight: None,
            negative_weight: None,
        };
        match *loss {
            LossFunction::FocalLoss { threshold, gamma } => {
                record.threshold = Some(threshold);
                record.gamma = Some(gamma);
            }
            LossFunction::WeightedBinaryCrossEntropy {
                positive_weight,
                negative_weight,
            } => {
                record.positive_weight = Some(positive_weight);
                record.negative_weight = Some(negative_weight);
            }
            _ => {}
        }
        record
    }

    fn restore(&self) -> Result<LossFunction> {
        let loss_type: LossFunctionType = self.loss_function_type.parse()?;
        Ok(match LossFunction::from_type(loss_type) {
            LossFunction::FocalLoss { threshold, gamma } => LossFunction::FocalLoss {
                threshold: self.threshold.unwrap_or(threshold),
                gamma: self.gamma.unwrap_or(gamma),
            },
            LossFunction::WeightedBinaryCrossEntropy {
                positive_weight,
                negative_weight,
            } => LossFunction::WeightedBinaryCrossEntropy {
                positive_weight: self.positive_weight.unwrap_or(positive_weight),
                negative_weight: self.negative_weight.unwrap_or(negative_weight),
            },
            other => other,
        })
    }
}

/// One layer of the stack. Dense layers fill the parameter fields, dropout
/// layers the `dropout*` fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerRecord {
    pub tag: String,
    #[serde(rename = "type")]
    pub layer_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biases: Option<Vec<f64>>,
    /// Outer list per neuron, inner list per input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<Vec<f64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activation_function_derivative: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer_learning_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l1_regularization_lambda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l2_regularization_lambda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropout_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropout_value: Option<f64>,
}

impl LayerRecord {
    fn capture(layer: &Layer) -> Self {
        let mut record = Self {
            tag: layer.tag().to_string(),
            layer_type: layer.layer_type().as_str().to_string(),
            biases: None,
            weights: None,
            activation_function: None,
            activation_function_derivative: None,
            layer_learning_rate: None,
            l1_regularization_lambda: None,
            l2_regularization_lambda: None,
            dropout_rate: None,
            dropout_value: None,
        };
        match layer {
            Layer::Dense(dense) => {
                record.biases = Some(dense.biases.to_vec());
                record.weights = Some(dense.weights.outer_iter().map(|row| row.to_vec()).collect());
                record.activation_function = Some(dense.activation.as_str().to_string());
                record.activation_function_derivative =
                    Some(dense.activation_derivative.as_str().to_string());
                record.layer_learning_rate = Some(dense.learning_rate);
                record.l1_regularization_lambda = Some(dense.l1_lambda);
                record.l2_regularization_lambda = Some(dense.l2_lambda);
            }
            Layer::Dropout(dropout) => {
                record.dropout_rate = Some(dropout.rate());
                record.dropout_value = Some(dropout.value());
            }
        }
        record
    }

    fn require<T: Copy>(&self, value: Option<T>, key: &str) -> Result<T> {
        value.ok_or_else(|| {
            NnError::InvalidParameter(format!("layer record '{}' has no {}", self.tag, key))
        })
    }

    fn restore(&self) -> Result<Layer> {
        let layer_type: LayerType = self.layer_type.parse()?;
        match layer_type {
            LayerType::Input => Err(NnError::UnsupportedLayer(format!(
                "cannot restore INPUT layer '{}'",
                self.tag
            ))),
            LayerType::Dropout => {
                let rate = self.require(self.dropout_rate, "dropoutRate")?;
                let value = self.require(self.dropout_value, "dropoutValue")?;
                Ok(DropoutLayer::new(self.tag.as_str(), rate)?
                    .with_value(value)
                    .into())
            }
            LayerType::Hidden | LayerType::Output => {
                let biases = self.biases.as_ref().ok_or_else(|| {
                    NnError::InvalidParameter(format!("layer record '{}' has no biases", self.tag))
                })?;
                let weights = self.weights.as_ref().ok_or_else(|| {
                    NnError::InvalidParameter(format!("layer record '{}' has no weights", self.tag))
                })?;
                let weights = self.weight_matrix(weights)?;

                let activation: ActivationType = self
                    .activation_function
                    .as_deref()
                    .ok_or_else(|| {
                        NnError::InvalidParameter(format!(
                            "layer record '{}' has no activationFunction",
                            self.tag
                        ))
                    })?
                    .parse()?;
                let derivative = match &self.activation_function_derivative {
                    Some(name) => name.parse()?,
                    None => activation,
                };

                let dense = DenseLayer::new(
                    self.tag.as_str(),
                    layer_type,
                    weights,
                    Array1::from(biases.clone()),
                    activation,
                )?
                .with_derivative(derivative)
                .with_learning_rate(self.require(self.layer_learning_rate, "layerLearningRate")?)
                .with_regularization(
                    self.require(self.l1_regularization_lambda, "l1RegularizationLambda")?,
                    self.require(self.l2_regularization_lambda, "l2RegularizationLambda")?,
                );
                Ok(dense.into())
            }
        }
    }

    fn weight_matrix(&self, rows: &[Vec<f64>]) -> Result<Array2<f64>> {
        let columns = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().find(|row| row.len() != columns) {
            return Err(NnError::dimension(
                format!("weight rows of layer record '{}'", self.tag),
                columns,
                row.len(),
            ));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), columns), flat).map_err(|e| {
            NnError::InvalidParameter(format!("weights of layer record '{}': {}", self.tag, e))
        })
    }
}

/// Full snapshot of a network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(default = "default_label")]
    pub label: String,
    pub learning_rate: f64,
    pub positive_target_threshold: f64,
    pub positive_output_threshold: f64,
    /// Last training loss; non-finite values are written as `"NaN"`,
    /// `"Infinity"` or `"-Infinity"` and `null` reads back as NaN
    #[serde(with = "loss_value")]
    pub loss: f64,
    pub loss_function: LossFunctionRecord,
    pub optimization_function: String,
    pub l_regularization_type: String,
    pub epoch: usize,
    pub layers: Vec<LayerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gradient_clipping: Option<GradientClipping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer_state: Option<Adam>,
}

fn default_label() -> String {
    String::from("network")
}

mod loss_value {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if *value > 0.0 {
            serializer.serialize_str("Infinity")
        } else {
            serializer.serialize_str("-Infinity")
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Option::<Encoded>::deserialize(deserializer)? {
            None => Ok(f64::NAN),
            Some(Encoded::Number(value)) => Ok(value),
            Some(Encoded::Text(text)) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "Infinity" => Ok(f64::INFINITY),
                "-Infinity" => Ok(f64::NEG_INFINITY),
                other => Err(D::Error::custom(format!("invalid loss value '{}'", other))),
            },
        }
    }
}

/// Error unless every value is finite
fn require_finite<'a>(values: impl IntoIterator<Item = &'a f64>, field: &str) -> Result<()> {
    match values.into_iter().find(|v| !v.is_finite()) {
        Some(value) => Err(NnError::InvalidParameter(format!(
            "{} holds the non-finite value {}",
            field, value
        ))),
        None => Ok(()),
    }
}

impl Checkpoint {
    /// Snapshot the configuration and trainable state of `network`
    pub fn capture(network: &NeuralNetwork) -> Self {
        let optimizer_state = match &network.optimizer {
            Optimizer::Adam(adam) => Some(adam.clone()),
            Optimizer::Sgd(_) => None,
        };
        let gradient_clipping = match network.gradient_clipping {
            GradientClipping::None => None,
            clipping => Some(clipping),
        };

        Self {
            label: network.label.clone(),
            learning_rate: network.learning_rate(),
            positive_target_threshold: network.positive_target_threshold,
            positive_output_threshold: network.positive_output_threshold,
            loss: network.loss,
            loss_function: LossFunctionRecord::capture(&network.loss_function),
            optimization_function: network.optimizer.optimizer_type().as_str().to_string(),
            l_regularization_type: network.regularization.as_str().to_string(),
            epoch: network.epoch,
            layers: network.layers().iter().map(LayerRecord::capture).collect(),
            gradient_clipping,
            optimizer_state,
        }
    }

    /// Rebuild the network. Layers keep their own learning rates.
    pub fn restore(&self) -> Result<NeuralNetwork> {
        let loss_function = self.loss_function.restore()?;
        let optimizer_type: OptimizerType = self.optimization_function.parse()?;
        let regularization: RegularizationType = self.l_regularization_type.parse()?;

        let optimizer = match (optimizer_type, &self.optimizer_state) {
            (OptimizerType::Adam, Some(state)) => Optimizer::Adam(state.clone()),
            (optimizer_type, _) => Optimizer::from_type(optimizer_type),
        };

        let mut network = NeuralNetwork::new(loss_function, optimizer, regularization)
            .with_label(self.label.as_str())
            .with_learning_rate(self.learning_rate)
            .with_thresholds(self.positive_target_threshold, self.positive_output_threshold)
            .with_gradient_clipping(self.gradient_clipping.unwrap_or_default());
        network.epoch = self.epoch;
        network.loss = self.loss;

        for record in &self.layers {
            network.push_layer(record.restore()?)?;
        }
        network.validate_topology()?;

        debug!(
            "Restored network '{}' with {} layers at epoch {}",
            network.label,
            network.layers().len(),
            network.epoch
        );
        Ok(network)
    }

    /// Check that every parameter JSON has to store is finite. The loss is
    /// exempt, it has its own encoding.
    pub fn validate(&self) -> Result<()> {
        require_finite(
            [
                &self.learning_rate,
                &self.positive_target_threshold,
                &self.positive_output_threshold,
            ],
            "network hyperparameters",
        )?;
        let loss = &self.loss_function;
        require_finite(
            [loss.threshold, loss.gamma, loss.positive_weight, loss.negative_weight]
                .iter()
                .flatten(),
            "lossFunction",
        )?;

        for layer in &self.layers {
            let field = format!("layer '{}'", layer.tag);
            require_finite(layer.biases.iter().flatten(), &field)?;
            require_finite(layer.weights.iter().flatten().flatten(), &field)?;
            require_finite(
                [
                    layer.layer_learning_rate,
                    layer.l1_regularization_lambda,
                    layer.l2_regularization_lambda,
                    layer.dropout_rate,
                    layer.dropout_value,
                ]
                .iter()
                .flatten(),
                &field,
            )?;
        }

        match self.gradient_clipping {
            Some(GradientClipping::Value { limit }) => {
                require_finite([&limit], "gradientClipping")?;
            }
            Some(GradientClipping::Norm { max_norm }) => {
                require_finite([&max_norm], "gradientClipping")?;
            }
            _ => {}
        }

        if let Some(adam) = &self.optimizer_state {
            require_finite([&adam.beta1, &adam.beta2, &adam.epsilon], "optimizerState")?;
            for (index, moments) in adam.layer_moments() {
                require_finite(
                    moments
                        .m_weights
                        .iter()
                        .chain(moments.v_weights.iter())
                        .chain(moments.m_biases.iter())
                        .chain(moments.v_biases.iter()),
                    &format!("optimizerState moments of layer {}", index),
                )?;
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        self.validate()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write to `<path>.tmp` and rename over `path`, creating parent
    /// directories. Nothing is written when [`validate`](Self::validate) fails.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = temporary_path(path);
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, self)?;
            writer.flush()?;
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        info!("Checkpoint saved to {} (epoch {})", path.display(), self.epoch);
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
