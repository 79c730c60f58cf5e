use thiserror::Error;

/// Errors from training, evaluation and experiment orchestration.
#[derive(Error, Debug)]
pub enum Error {
    /// Unsupported or inconsistent run configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The model failed during a training epoch (1-based).
    #[error("Training failed in epoch {epoch}: {source}")]
    Training {
        epoch: usize,
        #[source]
        source: octave_nn::Error,
    },
    /// Vocabulary lookup or dataset error.
    #[error(transparent)]
    Core(#[from] octave_core::Error),
    /// Model construction or scoring error.
    #[error(transparent)]
    Model(#[from] octave_nn::Error),
    /// Tensor error outside a model call.
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for octave-kge.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn training(epoch: usize) -> impl FnOnce(octave_nn::Error) -> Self {
        move |source| Self::Training { epoch, source }
    }
}
