//! Hypercomplex KGE architectures.
//!
//! | Model | Algebra | Interaction |
//! |-------|---------|-------------|
//! | `QMult` | quaternion | h ⊗ r |
//! | `OMult` | octonion | h ⊗ r |
//! | `ConvQ` | quaternion | conv(h, r) ∘ (h ⊗ r) |
//! | `ConvO` | octonion | conv(h, r) ∘ (h ⊗ r) |
//!
//! In every case the per-component interaction vectors `x_c` are scored
//! against all entities at once, `Σ_c x_c · E_cᵀ`, and squashed with a
//! sigmoid. Loss is binary cross entropy against the K-vs-All targets,
//! computed from the logits in the form that stays finite when they saturate
//! (see [`bce_with_logits`]).
//!
//! # References
//!
//! - Zhang et al. (2019). "Quaternion Knowledge Graph Embeddings." NeurIPS.
//! - Demir et al. (2021). "Convolutional Hypercomplex Embeddings for Link
//!   Prediction." ACML.

mod conv;
mod mult;

pub use conv::HypercomplexConv;
pub use mult::HypercomplexMult;

use candle_core::{DType, Device, Tensor};
use candle_nn::{
    batch_norm, embedding, BatchNorm, BatchNormConfig, Dropout, Embedding, Module, ModuleT,
    VarBuilder, VarMap,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};
use crate::hypercomplex::Algebra;

/// Per-component entity and relation tables with their input batch norms.
pub(crate) struct ComponentEmbeddings {
    algebra: Algebra,
    entities: Vec<Embedding>,
    relations: Vec<Embedding>,
    bn_entities: Vec<BatchNorm>,
    bn_relations: Vec<BatchNorm>,
}

impl ComponentEmbeddings {
    pub(crate) fn new(
        algebra: Algebra,
        num_entities: usize,
        num_relations: usize,
        dim: usize,
        vb: &VarBuilder,
    ) -> Result<Self> {
        let n = algebra.components();
        let mut entities = Vec::with_capacity(n);
        let mut relations = Vec::with_capacity(n);
        let mut bn_entities = Vec::with_capacity(n);
        let mut bn_relations = Vec::with_capacity(n);
        for c in 0..n {
            entities.push(embedding(num_entities, dim, vb.pp("entity").pp(c))?);
            relations.push(embedding(num_relations, dim, vb.pp("relation").pp(c))?);
            bn_entities.push(batch_norm(dim, BatchNormConfig::default(), vb.pp("bn_entity").pp(c))?);
            bn_relations.push(batch_norm(dim, BatchNormConfig::default(), vb.pp("bn_relation").pp(c))?);
        }
        Ok(Self {
            algebra,
            entities,
            relations,
            bn_entities,
            bn_relations,
        })
    }

    pub(crate) fn algebra(&self) -> Algebra {
        self.algebra
    }

    pub(crate) fn num_entities(&self) -> usize {
        self.entities[0].embeddings().dim(0).unwrap_or(0)
    }

    /// Head components, each `(B, d)`.
    pub(crate) fn heads(&self, ids: &Tensor) -> Result<Vec<Tensor>> {
        self.entities
            .iter()
            .map(|e| -> Result<Tensor> { Ok(e.forward(ids)?) })
            .collect()
    }

    /// Relation components, each `(B, d)`.
    pub(crate) fn relations(&self, ids: &Tensor) -> Result<Vec<Tensor>> {
        self.relations
            .iter()
            .map(|r| -> Result<Tensor> { Ok(r.forward(ids)?) })
            .collect()
    }

    /// Batch norm then dropout on head components.
    pub(crate) fn prepare_heads(
        &self,
        parts: &[Tensor],
        dropout: &Dropout,
        train: bool,
    ) -> Result<Vec<Tensor>> {
        prepare(parts, &self.bn_entities, dropout, train)
    }

    /// Batch norm then dropout on relation components.
    pub(crate) fn prepare_relations(
        &self,
        parts: &[Tensor],
        dropout: &Dropout,
        train: bool,
    ) -> Result<Vec<Tensor>> {
        prepare(parts, &self.bn_relations, dropout, train)
    }

    /// `Σ_c parts[c] · E_cᵀ`, shape `(B, N)`.
    pub(crate) fn score_all(&self, parts: &[Tensor]) -> Result<Tensor> {
        let mut scores: Option<Tensor> = None;
        for (x, table) in parts.iter().zip(&self.entities) {
            let s = x.matmul(&table.embeddings().t()?)?;
            scores = Some(match scores {
                Some(acc) => (acc + s)?,
                None => s,
            });
        }
        scores.ok_or_else(|| Error::InvalidConfig("no components to score".into()))
    }
}

fn prepare(
    parts: &[Tensor],
    norms: &[BatchNorm],
    dropout: &Dropout,
    train: bool,
) -> Result<Vec<Tensor>> {
    parts
        .iter()
        .zip(norms)
        .map(|(x, bn)| -> Result<Tensor> {
            let x = bn.forward_t(x, train)?;
            Ok(dropout.forward(&x, train)?)
        })
        .collect()
}

/// Overwrite every `entity.*` and `relation.*` table with Xavier-normal
/// values drawn from `seed`.
///
/// Tables are visited in name order so the draw sequence does not depend on
/// hash-map iteration.
pub(crate) fn xavier_init(varmap: &mut VarMap, device: &Device, seed: u64) -> Result<()> {
    let mut tables: Vec<(String, (usize, usize))> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| Error::InvalidConfig("variable map lock poisoned".into()))?;
        data.iter()
            .filter(|(name, _)| name.starts_with("entity.") || name.starts_with("relation."))
            .map(|(name, var)| -> Result<(String, (usize, usize))> {
                Ok((name.clone(), var.dims2()?))
            })
            .collect::<Result<_>>()?
    };
    tables.sort_by(|a, b| a.0.cmp(&b.0));

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for (name, (rows, cols)) in tables {
        let std = (2.0 / (rows + cols) as f64).sqrt();
        let normal = Normal::new(0.0, std)
            .map_err(|e| Error::InvalidConfig(format!("xavier init for {name}: {e}")))?;
        let values: Vec<f32> = (0..rows * cols)
            .map(|_| normal.sample(&mut rng) as f32)
            .collect();
        let init = Tensor::from_vec(values, (rows, cols), device)?;
        varmap.set_one(&name, &init)?;
    }
    Ok(())
}

/// Mean binary cross entropy between `sigmoid(logits)` and `targets`.
///
/// ```text
/// ℓ(x, y) = max(x, 0) - x·y + ln(1 + e^(-|x|))
/// ```
///
/// Exact for any real target, including the `> 1` values flat label
/// smoothing produces, and finite for any finite logit.
pub fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let targets = targets.to_dtype(logits.dtype())?;
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    let loss = logits
        .relu()?
        .sub(&logits.mul(&targets)?)?
        .add(&softplus)?;
    Ok(loss.mean_all()?)
}

/// Fresh variable map and builder on `device`.
pub(crate) fn new_varmap(device: &Device) -> (VarMap, VarBuilder<'static>) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    (varmap, vb)
}

/// `u32` id tensor check shared by the architectures.
pub(crate) fn check_batch(heads: &Tensor, relations: &Tensor) -> Result<()> {
    let (h, r) = (heads.dims1()?, relations.dims1()?);
    if h != r {
        return Err(Error::InvalidConfig(format!(
            "head batch has {h} ids but relation batch has {r}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bce(logits: &[f32], targets: &[f32]) -> f32 {
        let n = logits.len();
        let x = Tensor::from_slice(logits, (1, n), &Device::Cpu).unwrap();
        let y = Tensor::from_slice(targets, (1, n), &Device::Cpu).unwrap();
        bce_with_logits(&x, &y).unwrap().to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_bce_matches_direct_formula() {
        let (x, y) = (0.5f32, 1.0f32);
        let p = 1.0 / (1.0 + (-x).exp());
        let direct = -(y * p.ln() + (1.0 - y) * (1.0 - p).ln());
        assert!((bce(&[x], &[y]) - direct).abs() < 1e-6);
    }

    #[test]
    fn test_bce_saturated_logits_stay_finite() {
        // Confidently wrong on both entries: 40 per entry, no overflow to inf.
        let loss = bce(&[40.0, -40.0], &[0.0, 1.0]);
        assert!(loss.is_finite());
        assert!((loss - 40.0).abs() < 1e-4);

        let loss = bce(&[40.0, -40.0], &[1.0, 0.0]);
        assert!(loss.is_finite() && loss < 1e-6);
    }

    #[test]
    fn test_bce_accepts_smoothed_targets_above_one() {
        // (1 - 0.1)·1 + 1/2 = 1.4
        let loss = bce(&[3.0, -3.0], &[1.4, 0.5]);
        assert!(loss.is_finite());
    }

    #[test]
    fn test_bce_gradient_is_finite_when_saturated() {
        let x = candle_core::Var::from_slice(&[60.0f32, -60.0], (1, 2), &Device::Cpu).unwrap();
        let y = Tensor::from_slice(&[0.0f32, 1.0], (1, 2), &Device::Cpu).unwrap();
        let loss = bce_with_logits(x.as_tensor(), &y).unwrap();
        let grads = loss.backward().unwrap();
        let g = grads.get(x.as_tensor()).unwrap().to_vec2::<f32>().unwrap();
        assert!(g[0].iter().all(|v| v.is_finite()));
        // d/dx = (sigmoid(x) - y) / n
        assert!((g[0][0] - 0.5).abs() < 1e-4);
        assert!((g[0][1] + 0.5).abs() < 1e-4);
    }
}
