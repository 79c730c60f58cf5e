//! ConvQ / ConvO: convolutional hypercomplex embeddings.
//!
//! The head and relation components are stacked into a single-channel image
//! and passed through a small convolutional block whose output, split back
//! into C components, gates the hypercomplex product:
//!
//! ```text
//! img  = stack(h_0..h_C, r_0..r_C)                (B, 1, 2C, d)
//! f    = relu(bn(fc(flatten(drop_f(relu(bn(conv(img))))))))
//! x_c  = drop_h( f_c ∘ (h ⊗ r)_c )
//! ```

use candle_core::{Device, Tensor};
use candle_nn::{
    batch_norm, conv2d, linear, ops, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig,
    Dropout, Linear, Module, ModuleT, VarMap,
};

use super::{bce_with_logits, check_batch, new_varmap, xavier_init, ComponentEmbeddings};
use crate::error::{Error, Result};
use crate::hypercomplex::Algebra;
use crate::model::{KgeModel, ModelParams};

struct ConvBlock {
    conv: Conv2d,
    bn_conv: BatchNorm,
    feature_map_dropout: Dropout,
    fc: Linear,
    bn_fc: BatchNorm,
    components: usize,
}

impl ConvBlock {
    fn forward(&self, parts: &[Tensor], norm_flag: bool, train: bool) -> Result<Vec<Tensor>> {
        let img = Tensor::stack(parts, 1)?.unsqueeze(1)?;
        let mut x = self.conv.forward(&img)?;
        if !norm_flag {
            x = self.bn_conv.forward_t(&x, train)?;
        }
        x = x.relu()?;
        if !norm_flag {
            x = self.feature_map_dropout.forward(&x, train)?;
        }
        let mut x = self.fc.forward(&x.flatten_from(1)?)?;
        if !norm_flag {
            x = self.bn_fc.forward_t(&x, train)?;
        }
        Ok(x.relu()?.chunk(self.components, 1)?)
    }
}

/// Convolutional model over quaternions (`ConvQ`) or octonions (`ConvO`).
pub struct HypercomplexConv {
    name: &'static str,
    embeddings: ComponentEmbeddings,
    block: ConvBlock,
    input_dropout: Dropout,
    hidden_dropout: Dropout,
    norm_flag: bool,
    varmap: VarMap,
    device: Device,
    training: bool,
}

impl HypercomplexConv {
    /// Build and initialise. Starts in training mode.
    pub fn new(
        name: &'static str,
        algebra: Algebra,
        params: &ModelParams,
        num_entities: usize,
        num_relations: usize,
        device: &Device,
        seed: u64,
    ) -> Result<Self> {
        let k = params.kernel_size;
        let channels = params.num_of_output_channels;
        if k == 0 || channels == 0 {
            return Err(Error::InvalidConfig(format!(
                "kernel_size and num_of_output_channels must be > 0, got {k} and {channels}"
            )));
        }
        let c = algebra.components();
        let d = params.embedding_dim;
        let padding = k / 2;
        let height = 2 * c + 2 * padding + 1;
        let width = d + 2 * padding + 1;
        if height <= k || width <= k {
            return Err(Error::InvalidConfig(format!(
                "kernel_size {k} is too large for a {}x{d} input",
                2 * c
            )));
        }
        let (height, width) = (height - k, width - k);

        let (mut varmap, vb) = new_varmap(device);
        let embeddings = ComponentEmbeddings::new(algebra, num_entities, num_relations, d, &vb)?;
        let conv_cfg = Conv2dConfig {
            padding,
            ..Default::default()
        };
        let block = ConvBlock {
            conv: conv2d(1, channels, k, conv_cfg, vb.pp("conv1"))?,
            bn_conv: batch_norm(channels, BatchNormConfig::default(), vb.pp("bn_conv1"))?,
            feature_map_dropout: Dropout::new(params.feature_map_dropout),
            fc: linear(channels * height * width, c * d, vb.pp("fc1"))?,
            bn_fc: batch_norm(c * d, BatchNormConfig::default(), vb.pp("bn_conv2"))?,
            components: c,
        };
        xavier_init(&mut varmap, device, seed)?;

        Ok(Self {
            name,
            embeddings,
            block,
            input_dropout: Dropout::new(params.input_dropout),
            hidden_dropout: Dropout::new(params.hidden_dropout),
            norm_flag: params.norm_flag,
            varmap,
            device: device.clone(),
            training: true,
        })
    }

    fn logits(&self, heads: &Tensor, relations: &Tensor) -> Result<Tensor> {
        check_batch(heads, relations)?;
        let algebra = self.embeddings.algebra();
        let h = self.embeddings.heads(heads)?;
        let r = self.embeddings.relations(relations)?;

        let (product, image) = if self.norm_flag {
            let product = algebra.mul_unit(&h, &r)?;
            (product, [h, r].concat())
        } else {
            let h = self
                .embeddings
                .prepare_heads(&h, &self.input_dropout, self.training)?;
            let r = self
                .embeddings
                .prepare_relations(&r, &self.input_dropout, self.training)?;
            (algebra.mul(&h, &r)?, [h, r].concat())
        };
        let gates = self.block.forward(&image, self.norm_flag, self.training)?;

        let x = product
            .iter()
            .zip(&gates)
            .map(|(p, g)| -> Result<Tensor> {
                let x = (p * g)?;
                if self.norm_flag {
                    Ok(x)
                } else {
                    Ok(self.hidden_dropout.forward(&x, self.training)?)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        self.embeddings.score_all(&x)
    }
}

impl KgeModel for HypercomplexConv {
    fn name(&self) -> &'static str {
        self.name
    }

    fn forward_head_batch(&self, heads: &Tensor, relations: &Tensor) -> Result<Tensor> {
        Ok(ops::sigmoid(&self.logits(heads, relations)?)?)
    }

    fn forward_head_and_loss(
        &self,
        heads: &Tensor,
        relations: &Tensor,
        targets: &Tensor,
    ) -> Result<Tensor> {
        let logits = self.logits(heads, relations)?;
        bce_with_logits(&logits, targets)
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn num_entities(&self) -> usize {
        self.embeddings.num_entities()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelKind;
    use candle_core::DType;

    fn ids(v: &[u32]) -> Tensor {
        Tensor::from_slice(v, v.len(), &Device::Cpu).unwrap()
    }

    fn params() -> ModelParams {
        ModelParams::default()
            .with_embedding_dim(4)
            .with_output_channels(2)
    }

    #[test]
    fn test_conv_scores() {
        for kind in [ModelKind::ConvQ, ModelKind::ConvO] {
            let mut model = kind.build(&params(), 6, 2, &Device::Cpu, 5).unwrap();
            model.set_training(false);
            let scores = model.forward_head_batch(&ids(&[0, 5]), &ids(&[1, 1])).unwrap();
            assert_eq!(scores.dims(), &[2, 6]);
            let values = scores.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(values.iter().all(|&s| (0.0..=1.0).contains(&s)));
        }
    }

    #[test]
    fn test_conv_loss_in_training_mode() {
        let model = ModelKind::ConvQ.build(&params(), 6, 2, &Device::Cpu, 5).unwrap();
        assert!(model.is_training());
        let targets = Tensor::ones((3, 6), DType::F32, &Device::Cpu).unwrap();
        let loss = model
            .forward_head_and_loss(&ids(&[0, 1, 2]), &ids(&[0, 1, 0]), &targets)
            .unwrap();
        assert!(loss.to_scalar::<f32>().unwrap().is_finite());
    }

    #[test]
    fn test_conv_parameter_count() {
        // ConvQ, d = 4, 2 channels, kernel 3 (padding 1): image 8x4
        let model = ModelKind::ConvQ.build(&params(), 6, 2, &Device::Cpu, 5).unwrap();
        let embeddings = 4 * (6 * 4 + 2 * 4) + 8 * (2 * 4);
        let conv = 2 * 9 + 2 + 2 * 2;
        let fc = (2 * 8 * 4) * 16 + 16 + 2 * 16;
        assert_eq!(model.num_parameters(), embeddings + conv + fc);
    }

    #[test]
    fn test_zero_kernel_rejected() {
        let p = params().with_kernel_size(0);
        assert!(ModelKind::ConvQ.build(&p, 6, 2, &Device::Cpu, 5).is_err());
    }
}
