//! Layer roles and the layer stack element

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::dense::DenseLayer;
use super::dropout::DropoutLayer;
use crate::error::{NnError, Result};

/// Role of a layer inside the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayerType {
    Input,
    Hidden,
    Output,
    Dropout,
}

impl LayerType {
    /// Identifier written to checkpoints
    pub fn as_str(self) -> &'static str {
        match self {
            LayerType::Input => "INPUT",
            LayerType::Hidden => "HIDDEN",
            LayerType::Output => "OUTPUT",
            LayerType::Dropout => "DROPOUT",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = NnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "INPUT" => Ok(LayerType::Input),
            "HIDDEN" => Ok(LayerType::Hidden),
            "OUTPUT" => Ok(LayerType::Output),
            "DROPOUT" => Ok(LayerType::Dropout),
            other => Err(NnError::UnknownIdentifier {
                kind: "layer type",
                value: other.to_string(),
            }),
        }
    }
}

/// One entry of the network's layer stack
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(DenseLayer),
    Dropout(DropoutLayer),
}

impl Layer {
    pub fn tag(&self) -> &str {
        match self {
            Layer::Dense(layer) => &layer.tag,
            Layer::Dropout(layer) => &layer.tag,
        }
    }

    pub fn layer_type(&self) -> LayerType {
        match self {
            Layer::Dense(layer) => layer.layer_type,
            Layer::Dropout(_) => LayerType::Dropout,
        }
    }

    /// Expected input width, `None` for width-preserving layers
    pub fn input_width(&self) -> Option<usize> {
        match self {
            Layer::Dense(layer) => Some(layer.input_size()),
            Layer::Dropout(_) => None,
        }
    }

    /// Produced output width, `None` for width-preserving layers
    pub fn output_width(&self) -> Option<usize> {
        match self {
            Layer::Dense(layer) => Some(layer.output_size()),
            Layer::Dropout(_) => None,
        }
    }

    pub fn as_dense(&self) -> Option<&DenseLayer> {
        match self {
            Layer::Dense(layer) => Some(layer),
            Layer::Dropout(_) => None,
        }
    }

    pub fn as_dense_mut(&mut self) -> Option<&mut DenseLayer> {
        match self {
            Layer::Dense(layer) => Some(layer),
            Layer::Dropout(_) => None,
        }
    }

    /// Training forward pass; dropout layers draw a fresh mask
    pub fn forward(&mut self, input: &Array1<f64>) -> Result<Array1<f64>> {
        match self {
            Layer::Dense(layer) => layer.forward(input),
            Layer::Dropout(layer) => Ok(layer.forward(input)),
        }
    }

    pub fn forward_batch(&mut self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Layer::Dense(layer) => layer.forward_batch(inputs),
            Layer::Dropout(layer) => Ok(layer.forward_batch(inputs)),
        }
    }

    /// Inference forward pass; dropout layers pass values through and no
    /// backward cache is touched
    pub fn predict(&self, input: &Array1<f64>) -> Result<Array1<f64>> {
        match self {
            Layer::Dense(layer) => layer.infer(input),
            Layer::Dropout(_) => Ok(input.clone()),
        }
    }

    pub fn predict_batch(&self, inputs: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Layer::Dense(layer) => layer.infer_batch(inputs),
            Layer::Dropout(_) => Ok(inputs.clone()),
        }
    }

    pub fn backward(&mut self, gradient: &Array1<f64>) -> Result<Array1<f64>> {
        match self {
            Layer::Dense(layer) => layer.backward(gradient),
            Layer::Dropout(layer) => layer.backward(gradient),
        }
    }

    pub fn backward_batch(&mut self, gradients: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            Layer::Dense(layer) => layer.backward_batch(gradients),
            Layer::Dropout(layer) => layer.backward_batch(gradients),
        }
    }
}

impl From<DenseLayer> for Layer {
    fn from(layer: DenseLayer) -> Self {
        Layer::Dense(layer)
    }
}

impl From<DropoutLayer> for Layer {
    fn from(layer: DropoutLayer) -> Self {
        Layer::Dropout(layer)
    }
}
