//! Activation Functions for Neural Networks
//!
//! Every activation is a variant of [`ActivationType`] backed by a static
//! table of function pointers (forward transform and its derivative). The same
//! identifier is what checkpoints store, so restoring a layer is a plain
//! lookup.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::NnError;

/// Negative slope of [`ActivationType::LeakyReLU`]
pub const LEAKY_RELU_ALPHA: f64 = 0.01;

/// Types of activation functions available
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ActivationType {
    /// Rectified Linear Unit: max(0, x)
    ReLU,
    /// Leaky ReLU: x if x > 0 else 0.01x
    LeakyReLU,
    /// Sigmoid: 1 / (1 + exp(-x))
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Softmax: exp(x_i - max) / sum(exp(x_j - max))
    Softmax,
}

/// Forward and derivative functions of one activation variant
pub struct ActivationFns {
    /// Transform applied to a pre-activation vector
    pub forward: fn(ArrayView1<f64>) -> Array1<f64>,
    /// Element-wise derivative evaluated at a pre-activation vector
    pub derivative: fn(ArrayView1<f64>) -> Array1<f64>,
}

static RELU: ActivationFns = ActivationFns {
    forward: relu,
    derivative: relu_derivative,
};

static LEAKY_RELU: ActivationFns = ActivationFns {
    forward: leaky_relu,
    derivative: leaky_relu_derivative,
};

static SIGMOID: ActivationFns = ActivationFns {
    forward: sigmoid,
    derivative: sigmoid_derivative,
};

static TANH: ActivationFns = ActivationFns {
    forward: tanh,
    derivative: tanh_derivative,
};

// The element-wise derivative of softmax is the diagonal of its Jacobian.
static SOFTMAX: ActivationFns = ActivationFns {
    forward: softmax,
    derivative: softmax_jacobian_diagonal,
};

impl ActivationType {
    /// All variants, in lookup-table order
    pub const ALL: [ActivationType; 5] = [
        ActivationType::ReLU,
        ActivationType::LeakyReLU,
        ActivationType::Sigmoid,
        ActivationType::Tanh,
        ActivationType::Softmax,
    ];

    /// Dispatch table entry for this variant
    pub fn functions(self) -> &'static ActivationFns {
        match self {
            ActivationType::ReLU => &RELU,
            ActivationType::LeakyReLU => &LEAKY_RELU,
            ActivationType::Sigmoid => &SIGMOID,
            ActivationType::Tanh => &TANH,
            ActivationType::Softmax => &SOFTMAX,
        }
    }

    /// Identifier written to checkpoints
    pub fn as_str(self) -> &'static str {
        match self {
            ActivationType::ReLU => "ReLU",
            ActivationType::LeakyReLU => "LeakyReLU",
            ActivationType::Sigmoid => "Sigmoid",
            ActivationType::Tanh => "Tanh",
            ActivationType::Softmax => "Softmax",
        }
    }

    /// Apply the activation function
    pub fn forward(self, x: &Array1<f64>) -> Array1<f64> {
        (self.functions().forward)(x.view())
    }

    /// Compute the derivative for backpropagation
    pub fn backward(self, x: &Array1<f64>) -> Array1<f64> {
        (self.functions().derivative)(x.view())
    }

    /// Apply to 2D array (batch), row by row
    pub fn forward_batch(self, x: &Array2<f64>) -> Array2<f64> {
        map_rows(x, self.functions().forward)
    }

    /// Derivative for batch, row by row
    pub fn backward_batch(self, x: &Array2<f64>) -> Array2<f64> {
        map_rows(x, self.functions().derivative)
    }
}

impl fmt::Display for ActivationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivationType {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ReLU" => Ok(ActivationType::ReLU),
            "LeakyReLU" => Ok(ActivationType::LeakyReLU),
            "Sigmoid" => Ok(ActivationType::Sigmoid),
            // "Tahn" is the spelling used by older checkpoint files
            "Tanh" | "Tahn" => Ok(ActivationType::Tanh),
            "Softmax" => Ok(ActivationType::Softmax),
            other => Err(NnError::UnknownIdentifier {
                kind: "activation",
                value: other.to_string(),
            }),
        }
    }
}

fn map_rows(x: &Array2<f64>, f: fn(ArrayView1<f64>) -> Array1<f64>) -> Array2<f64> {
    let mut out = Array2::zeros(x.dim());
    for (mut out_row, row) in out.outer_iter_mut().zip(x.outer_iter()) {
        out_row.assign(&f(row));
    }
    out
}

fn relu(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(|v| v.max(0.0))
}

fn relu_derivative(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 })
}

fn leaky_relu(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(|v| if v > 0.0 { v } else { LEAKY_RELU_ALPHA * v })
}

fn leaky_relu_derivative(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(|v| if v > 0.0 { 1.0 } else { LEAKY_RELU_ALPHA })
}

/// Logistic function split on the sign of `v` so `exp` never overflows
pub fn sigmoid_scalar(v: f64) -> f64 {
    if v >= 0.0 {
        1.0 / (1.0 + (-v).exp())
    } else {
        let e = v.exp();
        e / (1.0 + e)
    }
}

fn sigmoid(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(sigmoid_scalar)
}

fn sigmoid_derivative(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(|v| {
        let s = sigmoid_scalar(v);
        s * (1.0 - s)
    })
}

fn tanh(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(f64::tanh)
}

fn tanh_derivative(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(|v| {
        let t = v.tanh();
        1.0 - t * t
    })
}

fn softmax(x: ArrayView1<f64>) -> Array1<f64> {
    // Shift by the row maximum so the largest exponent is exp(0).
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exp = x.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

fn softmax_jacobian_diagonal(x: ArrayView1<f64>) -> Array1<f64> {
    softmax(x).mapv(|s| s * (1.0 - s))
}

/// Full softmax Jacobian `J[i][j] = s_i * (delta_ij - s_j)` of one vector
pub fn softmax_jacobian(x: &Array1<f64>) -> Array2<f64> {
    let s = softmax(x.view());
    let n = s.len();
    Array2::from_shape_fn((n, n), |(i, j)| {
        if i == j {
            s[i] * (1.0 - s[i])
        } else {
            -s[i] * s[j]
        }
    })
}
