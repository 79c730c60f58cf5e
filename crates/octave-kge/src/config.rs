//! Run configuration.
//!
//! Defaults reproduce the usual K-vs-All setup for the hypercomplex models:
//! 2000 epochs, batches of 1024, Adam at 0.001, label smoothing 0.1, training
//! on train + validation and filtering against every split.

use std::str::FromStr;

use octave_core::{DatasetOptions, FilterPolicy};
use octave_nn::{ModelKind, ModelParams};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How training targets are formed.
///
/// Only [`ScoringTechnique::KvsAll`] is trainable; the others are recognised
/// so a configuration naming them fails with a clear error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScoringTechnique {
    /// One forward pass per (head, relation), scored against all tails.
    #[default]
    KvsAll,
    /// Every (head, relation) pair against every tail, known or not.
    AllvsAll,
    /// Corrupted triples as negatives.
    NegativeSampling,
}

impl ScoringTechnique {
    pub const fn name(self) -> &'static str {
        match self {
            Self::KvsAll => "KvsAll",
            Self::AllvsAll => "AllvsAll",
            Self::NegativeSampling => "NegativeSampling",
        }
    }

    /// `Ok` for K-vs-All, [`Error::Configuration`] otherwise.
    pub fn ensure_trainable(self) -> Result<()> {
        match self {
            Self::KvsAll => Ok(()),
            other => Err(Error::Configuration(format!(
                "{other} training is not supported, use KvsAll"
            ))),
        }
    }
}

impl FromStr for ScoringTechnique {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "KvsAll" | "K-vs-All" | "kvsall" => Ok(Self::KvsAll),
            "AllvsAll" | "All-vs-All" | "allvsall" => Ok(Self::AllvsAll),
            "NegativeSampling" | "NegSample" | "negative-sampling" => Ok(Self::NegativeSampling),
            other => Err(Error::Configuration(format!(
                "unknown scoring technique: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for ScoringTechnique {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Training loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of passes over the training pairs (default: 2000).
    pub epochs: usize,
    /// (head, relation) pairs per batch (default: 1024).
    pub batch_size: usize,
    /// Adam learning rate (default: 0.001).
    pub learning_rate: f64,
    /// Label smoothing rate ε in (0, 1]; `None` disables it (default: Some(0.1)).
    pub label_smoothing: Option<f64>,
    /// Exponential learning-rate decay per epoch (default: None).
    pub decay_rate: Option<f64>,
    /// Target construction (default: KvsAll).
    pub scoring_technique: ScoringTechnique,
    /// Batch-building threads; 0 builds batches inline (default: 0).
    pub num_workers: usize,
    /// Batches queued per worker (default: 2).
    pub prefetch_factor: usize,
    /// Seed for shuffling and embedding init (default: 1).
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 2000,
            batch_size: 1024,
            learning_rate: 0.001,
            label_smoothing: Some(0.1),
            decay_rate: None,
            scoring_technique: ScoringTechnique::KvsAll,
            num_workers: 0,
            prefetch_factor: 2,
            seed: 1,
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_label_smoothing(mut self, epsilon: Option<f64>) -> Self {
        self.label_smoothing = epsilon;
        self
    }

    pub fn with_decay_rate(mut self, decay_rate: Option<f64>) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    pub fn with_scoring_technique(mut self, technique: ScoringTechnique) -> Self {
        self.scoring_technique = technique;
        self
    }

    pub fn with_num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn with_prefetch_factor(mut self, factor: usize) -> Self {
        self.prefetch_factor = factor;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check values the loop cannot run with.
    ///
    /// The scoring technique is checked separately, by the trainer, so that a
    /// non-K-vs-All run fails before any batch is built.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Configuration("batch_size must be > 0".into()));
        }
        if self.learning_rate.is_nan() || self.learning_rate <= 0.0 {
            return Err(Error::Configuration(format!(
                "learning_rate must be > 0, got {}",
                self.learning_rate
            )));
        }
        if let Some(eps) = self.label_smoothing {
            if eps.is_nan() || eps <= 0.0 || eps > 1.0 {
                return Err(Error::Configuration(format!(
                    "label_smoothing must be in (0, 1] or unset, got {eps}"
                )));
            }
        }
        if let Some(gamma) = self.decay_rate {
            if gamma.is_nan() || gamma <= 0.0 || gamma > 1.0 {
                return Err(Error::Configuration(format!(
                    "decay_rate must be in (0, 1], got {gamma}"
                )));
            }
        }
        if self.num_workers > 0 && self.prefetch_factor == 0 {
            return Err(Error::Configuration(
                "prefetch_factor must be > 0 when workers are used".into(),
            ));
        }
        Ok(())
    }
}

/// Everything needed to run one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Architecture to train.
    pub model: ModelKind,
    /// Loop settings.
    pub training: TrainingConfig,
    /// Architecture hyperparameters.
    pub model_params: ModelParams,
    /// Splits whose answers are masked during evaluation (default: All).
    pub filter: FilterPolicy,
    /// Train on train + validation (default: true).
    pub train_plus_valid: bool,
}

impl ExperimentConfig {
    pub fn new(model: ModelKind) -> Self {
        Self {
            model,
            training: TrainingConfig::default(),
            model_params: ModelParams::default(),
            filter: FilterPolicy::All,
            train_plus_valid: true,
        }
    }

    /// Configuration for the architecture called `name` (case-insensitive).
    ///
    /// An unrecognised name is an [`Error::Configuration`].
    pub fn for_model(name: &str) -> Result<Self> {
        name.parse::<ModelKind>()
            .map(Self::new)
            .map_err(|e| Error::Configuration(e.to_string()))
    }

    pub fn with_training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }

    pub fn with_model_params(mut self, params: ModelParams) -> Self {
        self.model_params = params;
        self
    }

    pub fn with_filter(mut self, filter: FilterPolicy) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_train_plus_valid(mut self, train_plus_valid: bool) -> Self {
        self.train_plus_valid = train_plus_valid;
        self
    }

    /// Loader options matching this configuration.
    pub fn dataset_options(&self, reciprocal: bool) -> DatasetOptions {
        DatasetOptions {
            train_plus_valid: self.train_plus_valid,
            reciprocal,
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::new(ModelKind::QMult)
    }
}
