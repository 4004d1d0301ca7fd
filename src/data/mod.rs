//! Training data
//!
//! - `dataset` - input/target samples, JSON storage and mini-batch assembly
//! - `window` - sliding-window one-hot encoding of draw histories

mod dataset;
mod window;

pub use dataset::{Dataset, TrainingSample};
pub use window::{DrawWindowEncoder, ENCODED_HIGH, ENCODED_LOW};
