//! K-vs-All training loop.
//!
//! ```text
//! for epoch in 1..=epochs:
//!     for batch in shuffle(pairs):          # see crate::batch
//!         y   = (1 - ε)·y + 1/N             # label smoothing, if set
//!         L   = BCE(sigmoid(f(h, r, ·)), y)
//!         θ  ← Adam(θ, ∇L)
//!     lr ← lr · γ                           # exponential decay, if set
//! ```
//!
//! The smoothing term is the flat `1/N`, added to every entry, positives
//! included. It is not the `ε/N` of the usual formulation.
//!
//! Adam is candle's `AdamW` with weight decay 0. Gradients are computed from
//! scratch for every batch.
//!
//! # References
//!
//! - Dettmers et al. (2018). "Convolutional 2D Knowledge Graph Embeddings."
//!   AAAI. (K-vs-All / 1-N scoring)
//! - Szegedy et al. (2016). "Rethinking the Inception Architecture."
//!   (label smoothing)

use candle_core::Tensor;
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW};
use octave_core::ErVocabulary;
use octave_nn::KgeModel;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batch::{BatchLoader, KvsAllBatch, TargetLabels};
use crate::config::TrainingConfig;
use crate::error::{Error, Result};

/// `(1 - ε)·targets + 1/N`, element-wise.
pub fn smooth_targets(
    targets: &Tensor,
    epsilon: f64,
    num_entities: usize,
) -> candle_core::Result<Tensor> {
    targets.affine(1.0 - epsilon, 1.0 / num_entities as f64)
}

/// Running loss of one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochAccumulator {
    /// Sum of batch losses.
    pub loss: f64,
    /// Batches seen.
    pub batches: usize,
}

impl EpochAccumulator {
    pub fn add(self, batch_loss: f64) -> Self {
        Self {
            loss: self.loss + batch_loss,
            batches: self.batches + 1,
        }
    }
}

/// What a training run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// Summed batch loss per epoch, in epoch order.
    pub loss_per_epoch: Vec<f64>,
    /// Number (1-based) of the last completed epoch; -1 when no epoch ran.
    pub last_epoch: i64,
    /// Loss of the last completed epoch; -1.0 when no epoch ran.
    pub last_loss: f64,
    /// Learning rate after the last decay step.
    pub final_learning_rate: f64,
}

impl TrainingOutcome {
    fn untrained(learning_rate: f64) -> Self {
        Self {
            loss_per_epoch: Vec::new(),
            last_epoch: -1,
            last_loss: -1.0,
            final_learning_rate: learning_rate,
        }
    }
}

/// Drives a [`KgeModel`] through K-vs-All epochs.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainingConfig,
    labels: TargetLabels,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            labels: TargetLabels::default(),
        }
    }

    pub fn with_labels(mut self, labels: TargetLabels) -> Self {
        self.labels = labels;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model` on the (head, relation) -> tails map `er`.
    ///
    /// Only K-vs-All is supported; any other scoring technique fails with
    /// [`Error::Configuration`] before a batch is built. A batch whose loss is
    /// not finite stops training with [`Error::Training`] before the update.
    /// The model is left in eval mode, including when `epochs` is 0.
    pub fn train(&self, model: &mut dyn KgeModel, er: &ErVocabulary) -> Result<TrainingOutcome> {
        let cfg = &self.config;
        cfg.scoring_technique.ensure_trainable()?;
        cfg.validate()?;

        if cfg.epochs == 0 {
            info!("epochs = 0, returning untrained model");
            model.set_training(false);
            return Ok(TrainingOutcome::untrained(cfg.learning_rate));
        }

        let num_entities = model.num_entities();
        let params = ParamsAdamW {
            lr: cfg.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(model.varmap().all_vars(), params)?;
        let mut loader = BatchLoader::new(er, num_entities, cfg.batch_size, cfg.seed)
            .with_labels(self.labels)
            .with_workers(cfg.num_workers, cfg.prefetch_factor);

        info!(
            model = model.name(),
            pairs = loader.num_pairs(),
            batches = loader.num_batches(),
            epochs = cfg.epochs,
            "starting K-vs-All training"
        );

        model.set_training(true);
        let mut lr = cfg.learning_rate;
        let mut losses = Vec::with_capacity(cfg.epochs);
        let report_every = (cfg.epochs / 10).max(1);

        for epoch in 1..=cfg.epochs {
            let scorer: &dyn KgeModel = model;
            let epoch_acc = loader.try_fold_epoch(EpochAccumulator::default(), |acc, batch| {
                self.step(scorer, &mut optimizer, &batch, num_entities)
                    .map(|loss| acc.add(loss))
                    .map_err(Error::training(epoch))
            });
            let epoch_acc = match epoch_acc {
                Ok(acc) => acc,
                Err(e) => {
                    model.set_training(false);
                    return Err(e);
                }
            };
            losses.push(epoch_acc.loss);

            if epoch % report_every == 0 || epoch == cfg.epochs {
                info!(epoch, loss = epoch_acc.loss, lr, "epoch done");
            } else {
                debug!(epoch, loss = epoch_acc.loss, batches = epoch_acc.batches);
            }

            if let Some(gamma) = cfg.decay_rate {
                lr *= gamma;
                optimizer.set_learning_rate(lr);
            }
        }

        model.set_training(false);
        let last_loss = losses.last().copied().unwrap_or(-1.0);
        Ok(TrainingOutcome {
            last_epoch: losses.len() as i64,
            last_loss,
            loss_per_epoch: losses,
            final_learning_rate: lr,
        })
    }

    fn step(
        &self,
        model: &dyn KgeModel,
        optimizer: &mut AdamW,
        batch: &KvsAllBatch,
        num_entities: usize,
    ) -> octave_nn::Result<f64> {
        let (heads, relations, targets) = batch.to_tensors(model.device())?;
        let targets = match self.config.label_smoothing {
            Some(eps) => smooth_targets(&targets, eps, num_entities)?,
            None => targets,
        };
        let loss = model.forward_head_and_loss(&heads, &relations, &targets)?;
        let value = f64::from(loss.to_scalar::<f32>()?);
        // A NaN/inf loss would poison every parameter on the update.
        if !value.is_finite() {
            return Err(octave_nn::Error::NonFiniteLoss(value));
        }
        optimizer.backward_step(&loss)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_smoothing_formula() {
        let t = Tensor::new(&[[1.0f32, 0.0, 0.0, 1.0]], &Device::Cpu).unwrap();
        let s = smooth_targets(&t, 0.1, 4).unwrap().to_vec2::<f32>().unwrap();
        assert!((s[0][0] - (0.9 + 0.25)).abs() < 1e-6);
        assert!((s[0][1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_full_smoothing_is_flat() {
        let t = Tensor::new(&[[1.0f32, 0.0]], &Device::Cpu).unwrap();
        let s = smooth_targets(&t, 1.0, 2).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(s[0], vec![0.5, 0.5]);
    }

    #[test]
    fn test_accumulator() {
        let acc = [0.5, 0.25, 1.0]
            .into_iter()
            .fold(EpochAccumulator::default(), EpochAccumulator::add);
        assert_eq!(acc.batches, 3);
        assert!((acc.loss - 1.75).abs() < 1e-12);
    }
}
