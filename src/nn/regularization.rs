//! Weight regularization applied right before an optimizer step

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::layer::Layer;
use crate::error::NnError;

/// Regularization family used by the network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegularizationType {
    #[default]
    None,
    L1,
    L2,
}

impl RegularizationType {
    pub fn as_str(self) -> &'static str {
        match self {
            RegularizationType::None => "NONE",
            RegularizationType::L1 => "L1",
            RegularizationType::L2 => "L2",
        }
    }

    /// Shrink the weights of every dense layer with its own lambda
    pub fn apply(self, layers: &mut [Layer]) {
        for layer in layers.iter_mut().filter_map(Layer::as_dense_mut) {
            match self {
                RegularizationType::None => {}
                RegularizationType::L1 => apply_l1(&mut layer.weights, layer.l1_lambda),
                RegularizationType::L2 => apply_l2(&mut layer.weights, layer.l2_lambda),
            }
        }
    }
}

impl fmt::Display for RegularizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegularizationType {
    type Err = NnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(RegularizationType::None),
            "L1" => Ok(RegularizationType::L1),
            "L2" => Ok(RegularizationType::L2),
            other => Err(NnError::UnknownIdentifier {
                kind: "regularization",
                value: other.to_string(),
            }),
        }
    }
}

/// `w -= lambda * sign(w)`, with sign(0) = 0. No-op when `lambda <= 0`.
pub fn apply_l1(weights: &mut Array2<f64>, lambda: f64) {
    if lambda <= 0.0 {
        return;
    }
    weights.mapv_inplace(|w| {
        if w > 0.0 {
            w - lambda
        } else if w < 0.0 {
            w + lambda
        } else {
            w
        }
    });
}

/// `w -= lambda * w`. No-op when `lambda <= 0`.
pub fn apply_l2(weights: &mut Array2<f64>, lambda: f64) {
    if lambda <= 0.0 {
        return;
    }
    weights.mapv_inplace(|w| w - lambda * w);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::activation::ActivationType;
    use crate::nn::dense::DenseLayer;
    use crate::nn::layer::LayerType;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_l1_shrinks_toward_zero() {
        let mut weights = array![[0.5, -0.5, 0.0]];
        apply_l1(&mut weights, 0.1);
        assert_relative_eq!(weights[[0, 0]], 0.4, epsilon = 1e-12);
        assert_relative_eq!(weights[[0, 1]], -0.4, epsilon = 1e-12);
        assert_eq!(weights[[0, 2]], 0.0);
    }

    #[test]
    fn test_l2_scales_weights() {
        let mut weights = array![[2.0, -1.0]];
        apply_l2(&mut weights, 0.1);
        assert_relative_eq!(weights[[0, 0]], 1.8, epsilon = 1e-12);
        assert_relative_eq!(weights[[0, 1]], -0.9, epsilon = 1e-12);
    }

    #[test]
    fn test_non_positive_lambda_is_skipped() {
        let original = array![[0.3, -0.7]];
        let mut weights = original.clone();
        apply_l1(&mut weights, 0.0);
        apply_l2(&mut weights, -1.0);
        assert_eq!(weights, original);
    }

    #[test]
    fn test_apply_uses_per_layer_lambda() {
        let dense = DenseLayer::new(
            "h",
            LayerType::Hidden,
            array![[1.0]],
            array![0.0],
            ActivationType::ReLU,
        )
        .unwrap()
        .with_regularization(0.25, 0.5);
        let mut layers = vec![Layer::from(dense)];

        RegularizationType::L2.apply(&mut layers);
        assert_relative_eq!(layers[0].as_dense().unwrap().weights[[0, 0]], 0.5, epsilon = 1e-12);

        RegularizationType::L1.apply(&mut layers);
        assert_relative_eq!(layers[0].as_dense().unwrap().weights[[0, 0]], 0.25, epsilon = 1e-12);

        RegularizationType::None.apply(&mut layers);
        assert_relative_eq!(layers[0].as_dense().unwrap().weights[[0, 0]], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_identifiers() {
        assert_eq!("L1".parse::<RegularizationType>().unwrap(), RegularizationType::L1);
        assert_eq!(RegularizationType::None.to_string(), "NONE");
        assert!("L3".parse::<RegularizationType>().is_err());
    }
}
