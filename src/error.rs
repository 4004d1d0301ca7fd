//! Error types for the lotto_nn library

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, NnError>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum NnError {
    /// Vector or matrix shapes do not line up
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Layer stack violates the network layout rules
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// Identifier not present in the lookup table
    #[error("Unknown {kind} identifier: {value}")]
    UnknownIdentifier { kind: &'static str, value: String },

    /// Layer kind that cannot be built or restored
    #[error("Unsupported layer: {0}")]
    UnsupportedLayer(String),

    /// Backward pass requested without a cached forward pass
    #[error("Layer '{0}' has no cached forward pass")]
    BackwardBeforeForward(String),

    /// Positive and negative target counts do not add up
    #[error("Incorrect target negative ({negatives}), positive ({positives}) and total ({total}) count")]
    TargetCountMismatch {
        negatives: usize,
        positives: usize,
        total: usize,
    },

    /// Invalid hyperparameter or argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Empty batch or dataset
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl NnError {
    /// Shorthand for a [`NnError::DimensionMismatch`]
    pub fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        NnError::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}
