//! Sliding-window encoding of draw histories
//!
//! A draw is a list of 1-based numbers out of `total_numbers`. One encoded
//! draw is a vector of `total_numbers` values: [`ENCODED_HIGH`] at the drawn
//! positions and [`ENCODED_LOW`] elsewhere. An input concatenates `window`
//! consecutive draws; its target is the draw that follows them.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::dataset::TrainingSample;
use crate::error::{NnError, Result};

/// Value of positions that were not drawn
pub const ENCODED_LOW: f64 = 0.1;

/// Value of drawn positions
pub const ENCODED_HIGH: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawWindowEncoder {
    pub total_numbers: usize,
    pub window: usize,
}

impl DrawWindowEncoder {
    pub fn new(total_numbers: usize, window: usize) -> Result<Self> {
        if total_numbers == 0 || window == 0 {
            return Err(NnError::InvalidParameter(format!(
                "total numbers ({}) and window ({}) must be positive",
                total_numbers, window
            )));
        }
        Ok(Self {
            total_numbers,
            window,
        })
    }

    pub fn input_width(&self) -> usize {
        self.total_numbers * self.window
    }

    pub fn target_width(&self) -> usize {
        self.total_numbers
    }

    /// Fraction of positions drawn in one draw of `numbers_per_draw` numbers
    pub fn positive_prior(&self, numbers_per_draw: usize) -> f64 {
        numbers_per_draw as f64 / self.total_numbers as f64
    }

    fn mark(&self, encoded: &mut [f64], offset: usize, draw: &[usize]) -> Result<()> {
        for &number in draw {
            if number == 0 || number > self.total_numbers {
                return Err(NnError::InvalidParameter(format!(
                    "drawn number {} outside 1..={}",
                    number, self.total_numbers
                )));
            }
            encoded[offset + number - 1] = ENCODED_HIGH;
        }
        Ok(())
    }

    fn encode_window(&self, draws: &[Vec<usize>]) -> Result<Vec<f64>> {
        let mut input = vec![ENCODED_LOW; self.input_width()];
        for (w, draw) in draws.iter().enumerate() {
            self.mark(&mut input, w * self.total_numbers, draw)?;
        }
        Ok(input)
    }

    /// Encode a single draw as a target vector
    pub fn encode_draw(&self, draw: &[usize]) -> Result<Vec<f64>> {
        let mut target = vec![ENCODED_LOW; self.total_numbers];
        self.mark(&mut target, 0, draw)?;
        Ok(target)
    }

    fn require_draws(&self, available: usize, needed: usize) -> Result<()> {
        if available < needed {
            return Err(NnError::EmptyInput(format!(
                "{} draws given, window of {} needs at least {}",
                available, self.window, needed
            )));
        }
        Ok(())
    }

    /// One sample per window position, oldest first
    pub fn encode_samples(&self, draws: &[Vec<usize>]) -> Result<Vec<TrainingSample>> {
        self.require_draws(draws.len(), self.window + 1)?;
        (0..draws.len() - self.window)
            .map(|start| {
                let input = self.encode_window(&draws[start..start + self.window])?;
                let target = self.encode_draw(&draws[start + self.window])?;
                Ok(TrainingSample::new(input, target))
            })
            .collect()
    }

    /// Sample whose target is the most recent draw
    pub fn latest_sample(&self, draws: &[Vec<usize>]) -> Result<TrainingSample> {
        self.require_draws(draws.len(), self.window + 1)?;
        let end = draws.len() - 1;
        let input = self.encode_window(&draws[end - self.window..end])?;
        let target = self.encode_draw(&draws[end])?;
        Ok(TrainingSample::new(input, target))
    }

    /// Input built from the most recent `window` draws, for predicting the next one
    pub fn latest_input(&self, draws: &[Vec<usize>]) -> Result<Array1<f64>> {
        self.require_draws(draws.len(), self.window)?;
        let input = self.encode_window(&draws[draws.len() - self.window..])?;
        Ok(Array1::from(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Vec<usize>> {
        vec![vec![1, 2], vec![3, 4], vec![5, 1], vec![2, 3]]
    }

    #[test]
    fn test_encode_samples() {
        let encoder = DrawWindowEncoder::new(5, 2).unwrap();
        let samples = encoder.encode_samples(&history()).unwrap();
        assert_eq!(samples.len(), 2);

        let first = &samples[0];
        assert_eq!(first.input.len(), 10);
        assert_eq!(
            first.input,
            vec![0.9, 0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.9, 0.9, 0.1]
        );
        assert_eq!(first.target, vec![0.9, 0.1, 0.1, 0.1, 0.9]);
    }

    #[test]
    fn test_latest_sample_and_input() {
        let encoder = DrawWindowEncoder::new(5, 2).unwrap();
        let draws = history();

        let latest = encoder.latest_sample(&draws).unwrap();
        assert_eq!(latest, encoder.encode_samples(&draws).unwrap()[1]);

        let input = encoder.latest_input(&draws).unwrap();
        assert_eq!(
            input.to_vec(),
            vec![0.9, 0.1, 0.1, 0.1, 0.9, 0.1, 0.9, 0.9, 0.1, 0.1]
        );
    }

    #[test]
    fn test_rejects_bad_draws() {
        let encoder = DrawWindowEncoder::new(5, 2).unwrap();
        assert!(matches!(
            encoder.encode_samples(&[vec![1], vec![2]]),
            Err(NnError::EmptyInput(_))
        ));
        assert!(matches!(
            encoder.encode_draw(&[6]),
            Err(NnError::InvalidParameter(_))
        ));
        assert!(encoder.encode_draw(&[0]).is_err());
        assert!(DrawWindowEncoder::new(0, 2).is_err());
    }

    #[test]
    fn test_positive_prior() {
        let encoder = DrawWindowEncoder::new(49, 3).unwrap();
        assert_eq!(encoder.positive_prior(7), 7.0 / 49.0);
    }
}
