//! Weight initialisation schemes
//!
//! Weights should start small and random so activations neither explode nor
//! all die on the first pass; biases start at zero.

use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How a dense layer's weight matrix is filled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightInit {
    /// Uniform in [-1, 1)
    #[default]
    Uniform,
    /// Uniform in [-1, 1) scaled by sqrt(2 / inputs), suits ReLU layers
    He,
    /// Glorot uniform in [-limit, limit), limit = sqrt(6 / (inputs + neurons)),
    /// suits Sigmoid and Tanh layers
    Xavier,
}

impl WeightInit {
    /// Weight matrix of shape (neurons, inputs). Both sizes must be non-zero.
    pub fn generate<R: Rng + ?Sized>(
        self,
        neurons: usize,
        inputs: usize,
        rng: &mut R,
    ) -> Array2<f64> {
        match self {
            WeightInit::Uniform => {
                Array2::random_using((neurons, inputs), Uniform::new(-1.0, 1.0), rng)
            }
            WeightInit::He => {
                let std_dev = (2.0 / inputs as f64).sqrt();
                Array2::random_using((neurons, inputs), Uniform::new(-1.0, 1.0), rng) * std_dev
            }
            WeightInit::Xavier => {
                let limit = (6.0 / (inputs + neurons) as f64).sqrt();
                Array2::random_using((neurons, inputs), Uniform::new(-limit, limit), rng)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_shapes_and_ranges() {
        let mut rng = StdRng::seed_from_u64(42);

        let uniform = WeightInit::Uniform.generate(8, 4, &mut rng);
        assert_eq!(uniform.dim(), (8, 4));
        assert!(uniform.iter().all(|w| (-1.0..1.0).contains(w)));

        let he = WeightInit::He.generate(8, 50, &mut rng);
        let he_bound = (2.0f64 / 50.0).sqrt();
        assert!(he.iter().all(|w| w.abs() <= he_bound));

        let xavier = WeightInit::Xavier.generate(10, 20, &mut rng);
        let limit = (6.0f64 / 30.0).sqrt();
        assert!(xavier.iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let a = WeightInit::Xavier.generate(3, 3, &mut StdRng::seed_from_u64(7));
        let b = WeightInit::Xavier.generate(3, 3, &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }
}
