//! Loss Functions
//!
//! Scalar loss and gradient of predictions against targets. The single-sample
//! forms work on one vector; the batch forms average the per-sample loss over
//! the rows and return one gradient row per sample.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{NnError, Result};

/// Clamp applied to probabilities before taking logarithms
pub const EPSILON: f64 = 1e-7;

/// Lower bound for categorical cross-entropy probabilities
pub const CATEGORICAL_EPSILON: f64 = 1e-15;

/// Default weight of positive targets in weighted binary cross-entropy
pub const DEFAULT_POSITIVE_WEIGHT: f64 = 10.0;

/// Default weight of negative targets in weighted binary cross-entropy
pub const DEFAULT_NEGATIVE_WEIGHT: f64 = 1.0;

/// Identifier of a loss function, as stored in checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LossFunctionType {
    BinaryCrossEntropy,
    WeightedBinaryCrossEntropy,
    CategoricalCrossEntropy,
    MeanSquaredError,
    FocalLoss,
}

impl LossFunctionType {
    pub fn as_str(self) -> &'static str {
        match self {
            LossFunctionType::BinaryCrossEntropy => "BinaryCrossEntropy",
            LossFunctionType::WeightedBinaryCrossEntropy => "WeightedBinaryCrossEntropy",
            LossFunctionType::CategoricalCrossEntropy => "CategoricalCrossEntropy",
            LossFunctionType::MeanSquaredError => "MeanSquaredError",
            LossFunctionType::FocalLoss => "FocalLoss",
        }
    }
}

impl fmt::Display for LossFunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LossFunctionType {
    type Err = NnError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BinaryCrossEntropy" => Ok(LossFunctionType::BinaryCrossEntropy),
            "WeightedBinaryCrossEntropy" => Ok(LossFunctionType::WeightedBinaryCrossEntropy),
            "CategoricalCrossEntropy" => Ok(LossFunctionType::CategoricalCrossEntropy),
            "MeanSquaredError" => Ok(LossFunctionType::MeanSquaredError),
            "FocalLoss" => Ok(LossFunctionType::FocalLoss),
            other => Err(NnError::UnknownIdentifier {
                kind: "loss function",
                value: other.to_string(),
            }),
        }
    }
}

/// Loss function together with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LossFunction {
    /// Binary cross-entropy, gradient in the combined sigmoid + BCE form `p - t`
    BinaryCrossEntropy,
    /// Binary cross-entropy with every element scaled by a class weight
    WeightedBinaryCrossEntropy {
        positive_weight: f64,
        negative_weight: f64,
    },
    /// Categorical cross-entropy for one-hot targets
    CategoricalCrossEntropy,
    /// Mean squared error (for regression)
    MeanSquaredError,
    /// Focal loss, down-weights well classified elements
    FocalLoss { threshold: f64, gamma: f64 },
}

impl Default for LossFunction {
    fn default() -> Self {
        LossFunction::BinaryCrossEntropy
    }
}

impl LossFunction {
    /// Weighted BCE with the default class weights
    pub fn weighted_binary_cross_entropy() -> Self {
        LossFunction::WeightedBinaryCrossEntropy {
            positive_weight: DEFAULT_POSITIVE_WEIGHT,
            negative_weight: DEFAULT_NEGATIVE_WEIGHT,
        }
    }

    /// Focal loss with threshold 1.0 and gamma 2.0
    pub fn focal() -> Self {
        LossFunction::FocalLoss {
            threshold: 1.0,
            gamma: 2.0,
        }
    }

    /// Default-parameter instance for an identifier
    pub fn from_type(loss_type: LossFunctionType) -> Self {
        match loss_type {
            LossFunctionType::BinaryCrossEntropy => LossFunction::BinaryCrossEntropy,
            LossFunctionType::WeightedBinaryCrossEntropy => Self::weighted_binary_cross_entropy(),
            LossFunctionType::CategoricalCrossEntropy => LossFunction::CategoricalCrossEntropy,
            LossFunctionType::MeanSquaredError => LossFunction::MeanSquaredError,
            LossFunctionType::FocalLoss => Self::focal(),
        }
    }

    pub fn loss_type(&self) -> LossFunctionType {
        match self {
            LossFunction::BinaryCrossEntropy => LossFunctionType::BinaryCrossEntropy,
            LossFunction::WeightedBinaryCrossEntropy { .. } => {
                LossFunctionType::WeightedBinaryCrossEntropy
            }
            LossFunction::CategoricalCrossEntropy => LossFunctionType::CategoricalCrossEntropy,
            LossFunction::MeanSquaredError => LossFunctionType::MeanSquaredError,
            LossFunction::FocalLoss { .. } => LossFunctionType::FocalLoss,
        }
    }

    /// Loss of one sample.
    ///
    /// `target_threshold` classifies targets as positive (`>=`) when building
    /// the weighted BCE element weights; other variants ignore it.
    pub fn calculate_loss(
        &self,
        predictions: &Array1<f64>,
        targets: &Array1<f64>,
        target_threshold: f64,
    ) -> Result<f64> {
        check_lengths(predictions.len(), targets.len())?;
        Ok(self.sample_loss(predictions.view(), targets.view(), target_threshold))
    }

    /// Gradient of one sample's loss with respect to the predictions
    pub fn calculate_gradient(
        &self,
        predictions: &Array1<f64>,
        targets: &Array1<f64>,
        target_threshold: f64,
    ) -> Result<Array1<f64>> {
        check_lengths(predictions.len(), targets.len())?;
        Ok(self.sample_gradient(predictions.view(), targets.view(), target_threshold))
    }

    /// Mean of the per-sample losses over the batch rows
    pub fn calculate_loss_batch(
        &self,
        predictions: &Array2<f64>,
        targets: &Array2<f64>,
        target_threshold: f64,
    ) -> Result<f64> {
        check_batch_shapes(predictions, targets)?;
        let total: f64 = predictions
            .outer_iter()
            .zip(targets.outer_iter())
            .map(|(p, t)| self.sample_loss(p, t, target_threshold))
            .sum();
        Ok(total / predictions.nrows() as f64)
    }

    /// Per-sample gradients, one row per batch row
    pub fn calculate_gradient_batch(
        &self,
        predictions: &Array2<f64>,
        targets: &Array2<f64>,
        target_threshold: f64,
    ) -> Result<Array2<f64>> {
        check_batch_shapes(predictions, targets)?;
        let mut gradients = Array2::zeros(predictions.dim());
        for ((mut row, p), t) in gradients
            .outer_iter_mut()
            .zip(predictions.outer_iter())
            .zip(targets.outer_iter())
        {
            row.assign(&self.sample_gradient(p, t, target_threshold));
        }
        Ok(gradients)
    }

    fn sample_loss(&self, p: ArrayView1<f64>, t: ArrayView1<f64>, target_threshold: f64) -> f64 {
        match *self {
            LossFunction::BinaryCrossEntropy => binary_cross_entropy(p, t),
            LossFunction::WeightedBinaryCrossEntropy {
                positive_weight,
                negative_weight,
            } => {
                let w = class_weights(t, target_threshold, positive_weight, negative_weight);
                weighted_binary_cross_entropy(p, t, w.view())
            }
            LossFunction::CategoricalCrossEntropy => categorical_cross_entropy(p, t),
            LossFunction::MeanSquaredError => mean_squared_error(p, t),
            LossFunction::FocalLoss { threshold, gamma } => focal_loss(p, t, threshold, gamma),
        }
    }

    fn sample_gradient(
        &self,
        p: ArrayView1<f64>,
        t: ArrayView1<f64>,
        target_threshold: f64,
    ) -> Array1<f64> {
        match *self {
            LossFunction::BinaryCrossEntropy => binary_cross_entropy_gradient(p, t),
            LossFunction::WeightedBinaryCrossEntropy {
                positive_weight,
                negative_weight,
            } => {
                let w = class_weights(t, target_threshold, positive_weight, negative_weight);
                weighted_binary_cross_entropy_gradient(p, t, w.view())
            }
            LossFunction::CategoricalCrossEntropy => categorical_cross_entropy_gradient(p, t),
            LossFunction::MeanSquaredError => mean_squared_error_gradient(p, t),
            LossFunction::FocalLoss { threshold, gamma } => {
                focal_loss_gradient(p, t, threshold, gamma)
            }
        }
    }
}

fn check_lengths(predictions: usize, targets: usize) -> Result<()> {
    if predictions != targets {
        return Err(NnError::dimension("loss targets", predictions, targets));
    }
    if predictions == 0 {
        return Err(NnError::EmptyInput("loss predictions".to_string()));
    }
    Ok(())
}

fn check_batch_shapes(predictions: &Array2<f64>, targets: &Array2<f64>) -> Result<()> {
    if predictions.nrows() != targets.nrows() {
        return Err(NnError::dimension(
            "loss batch size",
            predictions.nrows(),
            targets.nrows(),
        ));
    }
    if predictions.nrows() == 0 {
        return Err(NnError::EmptyInput("loss batch".to_string()));
    }
    check_lengths(predictions.ncols(), targets.ncols())
}

#[inline]
fn clamp_probability(p: f64) -> f64 {
    p.clamp(EPSILON, 1.0 - EPSILON)
}

/// Per-element weights: `positive` where `target >= threshold`, `negative` elsewhere
pub fn class_weights(
    targets: ArrayView1<f64>,
    threshold: f64,
    positive: f64,
    negative: f64,
) -> Array1<f64> {
    targets.mapv(|t| if t >= threshold { positive } else { negative })
}

/// Mean binary cross-entropy over the elements
pub fn binary_cross_entropy(predictions: ArrayView1<f64>, targets: ArrayView1<f64>) -> f64 {
    let total: f64 = predictions
        .iter()
        .zip(targets.iter())
        .map(|(&p, &t)| {
            let p = clamp_probability(p);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    total / predictions.len() as f64
}

/// `p - t`: gradient of BCE through a sigmoid output
pub fn binary_cross_entropy_gradient(
    predictions: ArrayView1<f64>,
    targets: ArrayView1<f64>,
) -> Array1<f64> {
    &predictions - &targets
}

pub fn weighted_binary_cross_entropy(
    predictions: ArrayView1<f64>,
    targets: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> f64 {
    let total: f64 = predictions
        .iter()
        .zip(targets.iter())
        .zip(weights.iter())
        .map(|((&p, &t), &w)| {
            let p = clamp_probability(p);
            -w * (t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    total / predictions.len() as f64
}

/// `w * (p - t) / (p * (1 - p))` with `p` clamped
pub fn weighted_binary_cross_entropy_gradient(
    predictions: ArrayView1<f64>,
    targets: ArrayView1<f64>,
    weights: ArrayView1<f64>,
) -> Array1<f64> {
    let mut gradient = Array1::zeros(predictions.len());
    for (i, ((&p, &t), &w)) in predictions
        .iter()
        .zip(targets.iter())
        .zip(weights.iter())
        .enumerate()
    {
        let p = clamp_probability(p);
        gradient[i] = w * (p - t) / (p * (1.0 - p));
    }
    gradient
}

/// `-sum(t * ln(p))`
pub fn categorical_cross_entropy(predictions: ArrayView1<f64>, targets: ArrayView1<f64>) -> f64 {
    -predictions
        .iter()
        .zip(targets.iter())
        .map(|(&p, &t)| t * p.max(CATEGORICAL_EPSILON).ln())
        .sum::<f64>()
}

pub fn categorical_cross_entropy_gradient(
    predictions: ArrayView1<f64>,
    targets: ArrayView1<f64>,
) -> Array1<f64> {
    let mut gradient = Array1::zeros(predictions.len());
    for (i, (&p, &t)) in predictions.iter().zip(targets.iter()).enumerate() {
        gradient[i] = -t / p.max(CATEGORICAL_EPSILON);
    }
    gradient
}

pub fn mean_squared_error(predictions: ArrayView1<f64>, targets: ArrayView1<f64>) -> f64 {
    let diff = &targets - &predictions;
    diff.mapv(|d| d * d).sum() / predictions.len() as f64
}

/// `-2 * (t - p)`
pub fn mean_squared_error_gradient(
    predictions: ArrayView1<f64>,
    targets: ArrayView1<f64>,
) -> Array1<f64> {
    (&targets - &predictions) * -2.0
}

#[inline]
fn focal_weight(p: f64, t: f64, threshold: f64, gamma: f64) -> f64 {
    let p_t = if t >= threshold { p } else { 1.0 - p };
    (1.0 - p_t).powf(gamma)
}

/// BCE with every element scaled by `(1 - p_t)^gamma`
pub fn focal_loss(
    predictions: ArrayView1<f64>,
    targets: ArrayView1<f64>,
    threshold: f64,
    gamma: f64,
) -> f64 {
    let total: f64 = predictions
        .iter()
        .zip(targets.iter())
        .map(|(&p, &t)| {
            let p = clamp_probability(p);
            -focal_weight(p, t, threshold, gamma) * (t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    total / predictions.len() as f64
}

pub fn focal_loss_gradient(
    predictions: ArrayView1<f64>,
    targets: ArrayView1<f64>,
    threshold: f64,
    gamma: f64,
) -> Array1<f64> {
    let mut gradient = Array1::zeros(predictions.len());
    for (i, (&p, &t)) in predictions.iter().zip(targets.iter()).enumerate() {
        let p = clamp_probability(p);
        gradient[i] = focal_weight(p, t, threshold, gamma) * (p - t);
    }
    gradient
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    const THRESHOLD: f64 = 0.5;

    #[test]
    fn test_binary_cross_entropy_half() {
        let loss = LossFunction::BinaryCrossEntropy
            .calculate_loss(&array![0.5], &array![1.0], THRESHOLD)
            .unwrap();
        assert_relative_eq!(loss, 0.5f64.ln().abs(), epsilon = 1e-12);
        assert_relative_eq!(loss, 0.6931, epsilon = 1e-4);
    }

    #[test]
    fn test_binary_cross_entropy_clamps_logarithms() {
        let loss = LossFunction::BinaryCrossEntropy
            .calculate_loss(&array![0.0, 1.0], &array![1.0, 0.0], THRESHOLD)
            .unwrap();
        assert!(loss.is_finite());
        assert_relative_eq!(loss, -(EPSILON.ln()), epsilon = 1e-6);
    }

    #[test]
    fn test_binary_cross_entropy_gradient() {
        let gradient = LossFunction::BinaryCrossEntropy
            .calculate_gradient(&array![0.8, 0.3], &array![1.0, 0.0], THRESHOLD)
            .unwrap();
        assert_relative_eq!(gradient[0], -0.2, epsilon = 1e-12);
        assert_relative_eq!(gradient[1], 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_mean_squared_error() {
        let mse = LossFunction::MeanSquaredError;
        let zero = mse
            .calculate_loss(&array![1.0, 2.0, 3.0], &array![1.0, 2.0, 3.0], THRESHOLD)
            .unwrap();
        assert_eq!(zero, 0.0);

        let one = mse
            .calculate_loss(&array![0.0, 0.0, 0.0], &array![1.0, 1.0, 1.0], THRESHOLD)
            .unwrap();
        assert_relative_eq!(one, 1.0, epsilon = 1e-12);

        let gradient = mse
            .calculate_gradient(&array![0.0, 2.0], &array![1.0, 1.0], THRESHOLD)
            .unwrap();
        assert_eq!(gradient, array![-2.0, 2.0]);
    }

    #[test]
    fn test_weighted_binary_cross_entropy_uses_class_weights() {
        let loss = LossFunction::WeightedBinaryCrossEntropy {
            positive_weight: 10.0,
            negative_weight: 1.0,
        };
        let p = array![0.5, 0.5];
        let t = array![1.0, 0.0];

        let value = loss.calculate_loss(&p, &t, THRESHOLD).unwrap();
        // (10 * ln2 + 1 * ln2) / 2
        assert_relative_eq!(value, 5.5 * 2.0f64.ln(), epsilon = 1e-12);

        let gradient = loss.calculate_gradient(&p, &t, THRESHOLD).unwrap();
        assert_relative_eq!(gradient[0], 10.0 * -0.5 / 0.25, epsilon = 1e-9);
        assert_relative_eq!(gradient[1], 0.5 / 0.25, epsilon = 1e-9);
    }

    #[test]
    fn test_categorical_cross_entropy() {
        let cce = LossFunction::CategoricalCrossEntropy;
        let p = array![0.7, 0.2, 0.1];
        let t = array![1.0, 0.0, 0.0];

        let loss = cce.calculate_loss(&p, &t, THRESHOLD).unwrap();
        assert_relative_eq!(loss, -(0.7f64.ln()), epsilon = 1e-12);

        let gradient = cce.calculate_gradient(&p, &t, THRESHOLD).unwrap();
        assert_relative_eq!(gradient[0], -1.0 / 0.7, epsilon = 1e-12);
        assert_eq!(gradient[1], 0.0);

        let zero_p = cce.calculate_loss(&array![0.0, 1.0], &array![1.0, 0.0], THRESHOLD).unwrap();
        assert!(zero_p.is_finite());
    }

    #[test]
    fn test_focal_loss_down_weights_easy_elements() {
        let focal = LossFunction::FocalLoss {
            threshold: 1.0,
            gamma: 2.0,
        };
        let p = array![0.9, 0.1];
        let t = array![1.0, 0.0];

        let bce = LossFunction::BinaryCrossEntropy.calculate_loss(&p, &t, THRESHOLD).unwrap();
        let fl = focal.calculate_loss(&p, &t, THRESHOLD).unwrap();
        assert!(fl < bce);
        assert_relative_eq!(fl, 0.01 * bce, epsilon = 1e-9);

        let gradient = focal.calculate_gradient(&p, &t, THRESHOLD).unwrap();
        assert_relative_eq!(gradient[0], 0.01 * -0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_focal_loss_gamma_zero_matches_bce() {
        let focal = LossFunction::FocalLoss {
            threshold: 0.5,
            gamma: 0.0,
        };
        let p = array![0.3, 0.6];
        let t = array![1.0, 0.0];
        let bce = LossFunction::BinaryCrossEntropy.calculate_loss(&p, &t, THRESHOLD).unwrap();
        let fl = focal.calculate_loss(&p, &t, THRESHOLD).unwrap();
        assert_relative_eq!(fl, bce, epsilon = 1e-12);
    }

    #[test]
    fn test_batch_loss_is_mean_of_samples() {
        let mse = LossFunction::MeanSquaredError;
        let p = array![[0.0, 0.0], [1.0, 1.0]];
        let t = array![[1.0, 1.0], [1.0, 1.0]];
        let loss = mse.calculate_loss_batch(&p, &t, THRESHOLD).unwrap();
        assert_relative_eq!(loss, 0.5, epsilon = 1e-12);

        let gradients = mse.calculate_gradient_batch(&p, &t, THRESHOLD).unwrap();
        assert_eq!(gradients, array![[-2.0, -2.0], [0.0, 0.0]]);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let err = LossFunction::BinaryCrossEntropy
            .calculate_loss(&array![0.5, 0.5], &array![1.0], THRESHOLD)
            .unwrap_err();
        assert!(matches!(err, NnError::DimensionMismatch { .. }));

        let err = LossFunction::MeanSquaredError
            .calculate_loss_batch(&array![[0.5]], &array![[1.0], [0.0]], THRESHOLD)
            .unwrap_err();
        assert!(matches!(err, NnError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_identifier_lookup() {
        for name in [
            "BinaryCrossEntropy",
            "WeightedBinaryCrossEntropy",
            "CategoricalCrossEntropy",
            "MeanSquaredError",
            "FocalLoss",
        ] {
            let loss_type: LossFunctionType = name.parse().unwrap();
            assert_eq!(loss_type.as_str(), name);
            assert_eq!(LossFunction::from_type(loss_type).loss_type(), loss_type);
        }
        assert!("Hinge".parse::<LossFunctionType>().is_err());
    }
}
