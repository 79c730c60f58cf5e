//! QMult / OMult: multiplicative hypercomplex embeddings.
//!
//! ```text
//! x = dropout_h( dropout_i(bn(h)) ⊗ dropout_i(bn(r)) )
//! score(h, r, ·) = sigmoid( Σ_c x_c · E_cᵀ )
//! ```
//!
//! With `norm_flag`, batch norm and dropout are skipped and the relation is
//! scaled to unit norm, so `h ⊗ r` rotates the head.

use candle_core::{Device, Tensor};
use candle_nn::{ops, Dropout, VarMap};

use super::{bce_with_logits, check_batch, new_varmap, xavier_init, ComponentEmbeddings};
use crate::error::Result;
use crate::hypercomplex::Algebra;
use crate::model::{KgeModel, ModelParams};

/// Multiplicative model over quaternions (`QMult`) or octonions (`OMult`).
pub struct HypercomplexMult {
    name: &'static str,
    embeddings: ComponentEmbeddings,
    input_dropout: Dropout,
    hidden_dropout: Dropout,
    norm_flag: bool,
    varmap: VarMap,
    device: Device,
    training: bool,
}

impl HypercomplexMult {
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
        let (mut varmap, vb) = new_varmap(device);
        let embeddings = ComponentEmbeddings::new(
            algebra,
            num_entities,
            num_relations,
            params.embedding_dim,
            &vb,
        )?;
        xavier_init(&mut varmap, device, seed)?;

        Ok(Self {
            name,
            embeddings,
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

        let x = if self.norm_flag {
            algebra.mul_unit(&h, &r)?
        } else {
            let h = self
                .embeddings
                .prepare_heads(&h, &self.input_dropout, self.training)?;
            let r = self
                .embeddings
                .prepare_relations(&r, &self.input_dropout, self.training)?;
            algebra
                .mul(&h, &r)?
                .iter()
                .map(|x| -> Result<Tensor> { Ok(self.hidden_dropout.forward(x, self.training)?) })
                .collect::<Result<Vec<_>>>()?
        };
        self.embeddings.score_all(&x)
    }
}

impl KgeModel for HypercomplexMult {
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
