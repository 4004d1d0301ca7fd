//! Dropout layer
//!
//! During training each input position is kept with probability `1 - rate`
//! and replaced by the drop value otherwise. Kept values pass through
//! unscaled. At inference the layer is the identity.

use ndarray::{Array1, Array2, Zip};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution};

use crate::error::{NnError, Result};

/// Dropout layer with its own mask generator
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    pub tag: String,
    rate: f64,
    value: f64,
    keep: Bernoulli,
    rng: StdRng,
    mask: Option<Array1<bool>>,
    mask_batch: Option<Array2<bool>>,
}

impl DropoutLayer {
    /// Create a dropout layer. `rate` is the drop probability in [0, 1].
    pub fn new(tag: impl Into<String>, rate: f64) -> Result<Self> {
        let tag = tag.into();
        let keep = Bernoulli::new(1.0 - rate).map_err(|_| {
            NnError::InvalidParameter(format!(
                "dropout rate of layer '{}' must be in [0, 1], got {}",
                tag, rate
            ))
        })?;

        Ok(Self {
            tag,
            rate,
            value: 0.0,
            keep,
            rng: StdRng::from_entropy(),
            mask: None,
            mask_batch: None,
        })
    }

    /// Value written to dropped positions
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Seed the mask generator for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Last single-sample mask, `true` where the input was kept
    pub fn mask(&self) -> Option<&Array1<bool>> {
        self.mask.as_ref()
    }

    /// Training forward pass
    pub fn forward(&mut self, input: &Array1<f64>) -> Array1<f64> {
        if self.rate == 0.0 {
            return input.clone();
        }

        let keep = self.keep;
        let rng = &mut self.rng;
        let mask = Array1::from_shape_fn(input.len(), |_| keep.sample(rng));
        let value = self.value;
        let output = Zip::from(input)
            .and(&mask)
            .map_collect(|&x, &kept| if kept { x } else { value });

        self.mask = Some(mask);
        output
    }

    /// Training forward pass over a batch, one mask row per sample
    pub fn forward_batch(&mut self, inputs: &Array2<f64>) -> Array2<f64> {
        if self.rate == 0.0 {
            return inputs.clone();
        }

        let keep = self.keep;
        let rng = &mut self.rng;
        let mask = Array2::from_shape_fn(inputs.dim(), |_| keep.sample(rng));
        let value = self.value;
        let output = Zip::from(inputs)
            .and(&mask)
            .map_collect(|&x, &kept| if kept { x } else { value });

        self.mask_batch = Some(mask);
        output
    }

    /// Gradient flows through kept positions only
    pub fn backward(&self, gradient: &Array1<f64>) -> Result<Array1<f64>> {
        if self.rate == 0.0 {
            return Ok(gradient.clone());
        }
        let mask = self
            .mask
            .as_ref()
            .ok_or_else(|| NnError::BackwardBeforeForward(self.tag.clone()))?;
        if mask.len() != gradient.len() {
            return Err(NnError::dimension(
                format!("gradient of dropout layer '{}'", self.tag),
                mask.len(),
                gradient.len(),
            ));
        }

        Ok(Zip::from(gradient)
            .and(mask)
            .map_collect(|&g, &kept| if kept { g } else { 0.0 }))
    }

    pub fn backward_batch(&self, gradients: &Array2<f64>) -> Result<Array2<f64>> {
        if self.rate == 0.0 {
            return Ok(gradients.clone());
        }
        let mask = self
            .mask_batch
            .as_ref()
            .ok_or_else(|| NnError::BackwardBeforeForward(self.tag.clone()))?;
        if mask.dim() != gradients.dim() {
            return Err(NnError::dimension(
                format!("gradient batch of dropout layer '{}'", self.tag),
                mask.len(),
                gradients.len(),
            ));
        }

        Ok(Zip::from(gradients)
            .and(mask)
            .map_collect(|&g, &kept| if kept { g } else { 0.0 }))
    }
}
