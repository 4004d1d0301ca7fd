//! Samples and datasets

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NnError, Result};

/// One input vector with its target vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub input: Vec<f64>,
    pub target: Vec<f64>,
}

impl TrainingSample {
    pub fn new(input: Vec<f64>, target: Vec<f64>) -> Self {
        Self { input, target }
    }

    pub fn input_array(&self) -> Array1<f64> {
        Array1::from(self.input.clone())
    }

    pub fn target_array(&self) -> Array1<f64> {
        Array1::from(self.target.clone())
    }
}

/// Non-empty list of samples sharing one input width and one target width
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    samples: Vec<TrainingSample>,
    input_width: usize,
    target_width: usize,
}

impl Dataset {
    pub fn new(samples: Vec<TrainingSample>) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| NnError::EmptyInput("dataset has no samples".to_string()))?;
        let input_width = first.input.len();
        let target_width = first.target.len();
        if input_width == 0 || target_width == 0 {
            return Err(NnError::EmptyInput(
                "samples need non-empty input and target vectors".to_string(),
            ));
        }

        for (i, sample) in samples.iter().enumerate() {
            if sample.input.len() != input_width {
                return Err(NnError::dimension(
                    format!("input of sample {}", i),
                    input_width,
                    sample.input.len(),
                ));
            }
            if sample.target.len() != target_width {
                return Err(NnError::dimension(
                    format!("target of sample {}", i),
                    target_width,
                    sample.target.len(),
                ));
            }
        }

        Ok(Self {
            samples,
            input_width,
            target_width,
        })
    }

    /// Load a JSON array of `{ "input": [...], "target": [...] }` objects
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let samples: Vec<TrainingSample> = serde_json::from_reader(BufReader::new(file))?;
        let dataset = Self::new(samples)?;
        info!(
            "Loaded {} samples ({} inputs, {} targets) from {}",
            dataset.len(),
            dataset.input_width,
            dataset.target_width,
            path.as_ref().display()
        );
        Ok(dataset)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &self.samples)?;
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn target_width(&self) -> usize {
        self.target_width
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    /// Stack the selected samples into (inputs, targets) matrices
    pub fn batch(&self, indices: &[usize]) -> Result<(Array2<f64>, Array2<f64>)> {
        if indices.is_empty() {
            return Err(NnError::EmptyInput("batch selects no samples".to_string()));
        }
        let mut inputs = Array2::zeros((indices.len(), self.input_width));
        let mut targets = Array2::zeros((indices.len(), self.target_width));

        for (row, &index) in indices.iter().enumerate() {
            let sample = self.samples.get(index).ok_or_else(|| {
                NnError::InvalidParameter(format!(
                    "sample index {} out of range for {} samples",
                    index,
                    self.samples.len()
                ))
            })?;
            inputs
                .row_mut(row)
                .assign(&Array1::from(sample.input.clone()));
            targets
                .row_mut(row)
                .assign(&Array1::from(sample.target.clone()));
        }
        Ok((inputs, targets))
    }

    /// All samples as (inputs, targets) matrices
    pub fn to_arrays(&self) -> (Array2<f64>, Array2<f64>) {
        let inputs = Array2::from_shape_fn((self.len(), self.input_width), |(i, j)| {
            self.samples[i].input[j]
        });
        let targets = Array2::from_shape_fn((self.len(), self.target_width), |(i, j)| {
            self.samples[i].target[j]
        });
        (inputs, targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn samples() -> Vec<TrainingSample> {
        vec![
            TrainingSample::new(vec![0.1, 0.9], vec![1.0]),
            TrainingSample::new(vec![0.9, 0.1], vec![0.0]),
            TrainingSample::new(vec![0.5, 0.5], vec![0.5]),
        ]
    }

    #[test]
    fn test_width_validation() {
        assert!(matches!(Dataset::new(vec![]), Err(NnError::EmptyInput(_))));

        let mut ragged = samples();
        ragged.push(TrainingSample::new(vec![1.0], vec![1.0]));
        assert!(matches!(
            Dataset::new(ragged),
            Err(NnError::DimensionMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_batch() {
        let dataset = Dataset::new(samples()).unwrap();
        let (inputs, targets) = dataset.batch(&[2, 0]).unwrap();
        assert_eq!(inputs, array![[0.5, 0.5], [0.1, 0.9]]);
        assert_eq!(targets, array![[0.5], [1.0]]);

        assert!(dataset.batch(&[]).is_err());
        assert!(dataset.batch(&[3]).is_err());

        let (all_inputs, all_targets) = dataset.to_arrays();
        assert_eq!(all_inputs.dim(), (3, 2));
        assert_eq!(all_targets.column(0).to_vec(), vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_json_round_trip() {
        let dataset = Dataset::new(samples()).unwrap();
        let file = NamedTempFile::new().unwrap();
        dataset.save_json(file.path()).unwrap();

        let loaded = Dataset::load_json(file.path()).unwrap();
        assert_eq!(loaded, dataset);
        assert_eq!(loaded.input_width(), 2);
        assert_eq!(loaded.target_width(), 1);
    }
}
