//! The model capability interface and architecture selection.
//!
//! Training and evaluation only ever talk to a model through [`KgeModel`]:
//! score every entity as a tail for a batch of (head, relation) queries,
//! compute the K-vs-All loss against dense targets, enumerate parameters,
//! toggle train/eval mode, and save or restore state. What happens inside
//! is the architecture's business.
//!
//! Architectures are chosen with [`ModelKind`]. Adding one means adding a
//! variant and a [`KgeModel`] implementation; callers do not change.

use std::path::Path;
use std::str::FromStr;
use std::sync::PoisonError;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::hypercomplex::Algebra;
use crate::models::{HypercomplexConv, HypercomplexMult};

/// A link-prediction model scored K-vs-All.
pub trait KgeModel: Send + Sync {
    /// Architecture name (e.g. "QMult").
    fn name(&self) -> &'static str;

    /// Scores of every entity as the tail of each (head, relation) query.
    ///
    /// `heads` and `relations` are `u32` tensors of shape `(B,)`; the result
    /// has shape `(B, N)`. Scores are in `[0, 1]`.
    fn forward_head_batch(&self, heads: &Tensor, relations: &Tensor) -> Result<Tensor>;

    /// Scalar loss of the scores for `(heads, relations)` against `targets`
    /// of shape `(B, N)`.
    fn forward_head_and_loss(
        &self,
        heads: &Tensor,
        relations: &Tensor,
        targets: &Tensor,
    ) -> Result<Tensor>;

    /// Every variable the model owns.
    fn varmap(&self) -> &VarMap;

    /// Mutable access to the variables, for restoring state.
    fn varmap_mut(&mut self) -> &mut VarMap;

    /// Device the parameters live on.
    fn device(&self) -> &Device;

    /// Number of candidate tails (N).
    fn num_entities(&self) -> usize;

    /// Switch between training (dropout, batch statistics) and inference.
    fn set_training(&mut self, training: bool);

    /// Whether the model is in training mode.
    fn is_training(&self) -> bool;

    /// Number of trainable scalars. Batch-norm running statistics are state,
    /// not parameters, and are not counted.
    fn num_parameters(&self) -> usize {
        let data = self
            .varmap()
            .data()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        data.iter()
            .filter(|(name, _)| !name.contains("running_"))
            .map(|(_, var)| var.elem_count())
            .sum()
    }

    /// Write all variables as safetensors.
    fn save(&self, path: &Path) -> Result<()> {
        self.varmap().save(path)?;
        Ok(())
    }

    /// Restore variables written by [`KgeModel::save`].
    fn load(&mut self, path: &Path) -> Result<()> {
        self.varmap_mut().load(path)?;
        Ok(())
    }
}

/// Architecture hyperparameters.
///
/// Not every field applies to every architecture: the convolutional fields
/// are ignored by the multiplicative models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Size of each hypercomplex component (default: 100).
    pub embedding_dim: usize,
    /// Dropout on head and relation embeddings (default: 0.3).
    pub input_dropout: f32,
    /// Dropout on the head-relation product (default: 0.3).
    pub hidden_dropout: f32,
    /// Dropout on convolution feature maps (default: 0.4).
    pub feature_map_dropout: f32,
    /// Convolution output channels (default: 16).
    pub num_of_output_channels: usize,
    /// Square convolution kernel size (default: 3).
    pub kernel_size: usize,
    /// Normalise relations to unit norm and bypass batch norm and dropout.
    pub norm_flag: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            embedding_dim: 100,
            input_dropout: 0.3,
            hidden_dropout: 0.3,
            feature_map_dropout: 0.4,
            num_of_output_channels: 16,
            kernel_size: 3,
            norm_flag: false,
        }
    }
}

impl ModelParams {
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn with_input_dropout(mut self, p: f32) -> Self {
        self.input_dropout = p;
        self
    }

    pub fn with_hidden_dropout(mut self, p: f32) -> Self {
        self.hidden_dropout = p;
        self
    }

    pub fn with_feature_map_dropout(mut self, p: f32) -> Self {
        self.feature_map_dropout = p;
        self
    }

    pub fn with_output_channels(mut self, channels: usize) -> Self {
        self.num_of_output_channels = channels;
        self
    }

    pub fn with_kernel_size(mut self, kernel_size: usize) -> Self {
        self.kernel_size = kernel_size;
        self
    }

    pub fn with_norm_flag(mut self, norm_flag: bool) -> Self {
        self.norm_flag = norm_flag;
        self
    }

    /// Reject values no architecture can be built with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(Error::InvalidConfig("embedding_dim must be > 0".into()));
        }
        for (name, p) in [
            ("input_dropout", self.input_dropout),
            ("hidden_dropout", self.hidden_dropout),
            ("feature_map_dropout", self.feature_map_dropout),
        ] {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!("{name} must be in [0, 1), got {p}")));
            }
        }
        Ok(())
    }
}

/// Supported architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    /// Quaternion multiplicative embeddings.
    QMult,
    /// Octonion multiplicative embeddings.
    OMult,
    /// Convolutional quaternion embeddings.
    ConvQ,
    /// Convolutional octonion embeddings.
    ConvO,
}

impl ModelKind {
    /// All supported architectures.
    pub const ALL: [Self; 4] = [Self::QMult, Self::OMult, Self::ConvQ, Self::ConvO];

    /// Architecture name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::QMult => "QMult",
            Self::OMult => "OMult",
            Self::ConvQ => "ConvQ",
            Self::ConvO => "ConvO",
        }
    }

    /// Number system of the embeddings.
    pub const fn algebra(self) -> Algebra {
        match self {
            Self::QMult | Self::ConvQ => Algebra::Quaternion,
            Self::OMult | Self::ConvO => Algebra::Octonion,
        }
    }

    /// Construct a freshly initialised model. `seed` drives embedding init.
    pub fn build(
        self,
        params: &ModelParams,
        num_entities: usize,
        num_relations: usize,
        device: &Device,
        seed: u64,
    ) -> Result<Box<dyn KgeModel>> {
        params.validate()?;
        if num_entities == 0 || num_relations == 0 {
            return Err(Error::InvalidConfig(format!(
                "need at least one entity and one relation, got {num_entities} and {num_relations}"
            )));
        }
        let model: Box<dyn KgeModel> = match self {
            Self::QMult | Self::OMult => Box::new(HypercomplexMult::new(
                self.name(),
                self.algebra(),
                params,
                num_entities,
                num_relations,
                device,
                seed,
            )?),
            Self::ConvQ | Self::ConvO => Box::new(HypercomplexConv::new(
                self.name(),
                self.algebra(),
                params,
                num_entities,
                num_relations,
                device,
                seed,
            )?),
        };
        debug!(
            model = self.name(),
            num_entities,
            num_relations,
            params = model.num_parameters(),
            "built model"
        );
        Ok(model)
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownModel(s.to_string()))
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_from_str() {
        assert_eq!("QMult".parse::<ModelKind>().unwrap(), ModelKind::QMult);
        assert_eq!("convo".parse::<ModelKind>().unwrap(), ModelKind::ConvO);
        let err = "TuckER".parse::<ModelKind>().unwrap_err();
        assert!(matches!(err, Error::UnknownModel(ref n) if n == "TuckER"));
    }

    #[test]
    fn test_algebra_per_kind() {
        assert_eq!(ModelKind::ConvQ.algebra().components(), 4);
        assert_eq!(ModelKind::OMult.algebra().components(), 8);
    }

    #[test]
    fn test_params_validate() {
        assert!(ModelParams::default().validate().is_ok());
        assert!(ModelParams::default().with_embedding_dim(0).validate().is_err());
        assert!(ModelParams::default().with_hidden_dropout(1.0).validate().is_err());
    }

    #[test]
    fn test_build_rejects_empty_vocab() {
        let err = ModelKind::QMult
            .build(&ModelParams::default(), 0, 3, &Device::Cpu, 1)
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
