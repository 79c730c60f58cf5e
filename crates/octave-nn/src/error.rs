//! Error types for octave-nn.

use thiserror::Error;

/// Model error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Model name that no architecture answers to.
    #[error("unknown model: {0} (expected one of QMult, OMult, ConvQ, ConvO)")]
    UnknownModel(String),

    /// Invalid hyperparameters.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A loss evaluated to NaN or infinity.
    #[error("loss is not finite: {0}")]
    NonFiniteLoss(f64),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
