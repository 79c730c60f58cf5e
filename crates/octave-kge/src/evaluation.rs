//! Filtered ranking evaluation for tail prediction.
//!
//! For each test triple (h, r, t) every entity is scored as a tail of
//! (h, r). Other known answers of (h, r) are masked before ranking so a model
//! is not penalised for ranking true facts above the one being tested.
//!
//! # Protocol
//!
//! ```text
//! s        = f(h, r, ·)                  # (N,) scores
//! keep     = s[t]
//! s[known] = mask                        # known = filter tails of (h, r)
//! s[t]     = keep
//! rank     = #{ e : s[e] > s[t] } + #{ e < t : s[e] = s[t] }   # 0-based
//! ```
//!
//! The tie rule is the position `t` would get in a stable descending sort.
//!
//! # Metrics
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | MRR | (0, 1] | mean of 1 / (rank + 1) |
//! | MR | [1, N] | mean of rank + 1 |
//! | Hits@k | [0, 1] | fraction with rank < k |
//!
//! # References
//!
//! - Bordes et al. (2013): filtered setting for link prediction
//! - Ruffinelli et al. (2020): "You CAN Teach an Old Dog New Tricks"

use candle_core::Tensor;
use octave_core::{ErVocabulary, IdTriple};
use octave_nn::KgeModel;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::batch::{KvsAllBatch, TargetLabels};
use crate::error::Result;

/// Value written over known answers before ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterMask {
    /// Overwrite with 0.0. Enough for sigmoid scores, which are never negative.
    #[default]
    Zero,
    /// Overwrite with negative infinity.
    NegInfinity,
    /// Leave scores untouched (raw ranking).
    None,
}

impl FilterMask {
    fn value(self) -> Option<f32> {
        match self {
            Self::Zero => Some(0.0),
            Self::NegInfinity => Some(f32::NEG_INFINITY),
            Self::None => None,
        }
    }

    /// Mask every `known` column of `row` except `target`.
    pub fn apply(self, row: &mut [f32], target: usize, known: &[u32]) {
        let Some(mask) = self.value() else {
            return;
        };
        let keep = row[target];
        for &e in known {
            row[e as usize] = mask;
        }
        row[target] = keep;
    }
}

/// 0-based rank of `target` in `row` sorted by descending score, ties broken
/// by column index.
///
/// A NaN target ranks last. A NaN candidate outranks any finite target.
pub fn filtered_rank(row: &[f32], target: usize) -> usize {
    let score = row[target];
    if score.is_nan() {
        return row.len() - 1;
    }
    row.iter()
        .enumerate()
        .filter(|&(e, &s)| s.is_nan() || s > score || (s == score && e < target))
        .count()
}

/// Hit levels tracked: ranks 1 through 10.
const HIT_LEVELS: usize = 10;

/// Running rank statistics, folded over test triples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankAccumulator {
    /// `hits[k]` counts ranks with 0-based rank ≤ k.
    hits: [usize; HIT_LEVELS],
    rank_sum: f64,
    reciprocal_sum: f64,
    count: usize,
}

impl RankAccumulator {
    /// Record one 0-based rank.
    pub fn add(mut self, rank: usize) -> Self {
        for (level, hit) in self.hits.iter_mut().enumerate() {
            if rank <= level {
                *hit += 1;
            }
        }
        let r = (rank + 1) as f64;
        self.rank_sum += r;
        self.reciprocal_sum += 1.0 / r;
        self.count += 1;
        self
    }

    /// Number of ranks recorded.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Fraction of ranks within the top `k` (1 ≤ k ≤ 10).
    pub fn hits_at(&self, k: usize) -> f64 {
        if self.count == 0 || k == 0 {
            return 0.0;
        }
        self.hits[k.min(HIT_LEVELS) - 1] as f64 / self.count as f64
    }

    pub fn finish(self, test_loss: f64, num_params: usize) -> EvaluationResult {
        if self.count == 0 {
            return EvaluationResult {
                test_loss,
                num_params,
                ..EvaluationResult::default()
            };
        }
        let n = self.count as f64;
        EvaluationResult {
            hits_at_1: self.hits_at(1),
            hits_at_3: self.hits_at(3),
            hits_at_10: self.hits_at(10),
            mean_rank: self.rank_sum / n,
            mean_reciprocal_rank: self.reciprocal_sum / n,
            test_loss,
            num_params,
            num_triples: self.count,
        }
    }
}

/// Link prediction metrics for one split.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub hits_at_1: f64,
    pub hits_at_3: f64,
    pub hits_at_10: f64,
    pub mean_rank: f64,
    pub mean_reciprocal_rank: f64,
    /// Mean K-vs-All loss of the split against its filter targets.
    pub test_loss: f64,
    pub num_params: usize,
    pub num_triples: usize,
}

impl EvaluationResult {
    /// Format as summary string.
    pub fn summary(&self) -> String {
        format!(
            "MRR: {:.4} | MR: {:.1} | H@1: {:.3} | H@3: {:.3} | H@10: {:.3} (n={})",
            self.mean_reciprocal_rank,
            self.mean_rank,
            self.hits_at_1,
            self.hits_at_3,
            self.hits_at_10,
            self.num_triples
        )
    }

    /// The persisted results record.
    pub fn to_record(&self) -> Map<String, Value> {
        let record = json!({
            "H@1": self.hits_at_1,
            "H@3": self.hits_at_3,
            "H@10": self.hits_at_10,
            "MR": self.mean_rank,
            "MRR": self.mean_reciprocal_rank,
            "TestLoss": self.test_loss,
            "Number_param": self.num_params,
        });
        match record {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Filtered tail-prediction evaluator.
///
/// # Example
///
/// ```rust,ignore
/// let filter = ErVocabulary::from_triples(&all_known);
/// let result = Evaluator::new(&filter, 1024).evaluate(model.as_ref(), &test)?;
/// println!("{}", result.summary());
/// ```
pub struct Evaluator<'a> {
    filter: &'a ErVocabulary,
    batch_size: usize,
    mask: FilterMask,
}

impl<'a> Evaluator<'a> {
    /// Evaluate in batches of `batch_size`, masking answers known to `filter`.
    pub fn new(filter: &'a ErVocabulary, batch_size: usize) -> Self {
        Self {
            filter,
            batch_size: batch_size.max(1),
            mask: FilterMask::default(),
        }
    }

    pub fn with_mask(mut self, mask: FilterMask) -> Self {
        self.mask = mask;
        self
    }

    /// Rank the tail of every triple, in order. The model should be in eval
    /// mode.
    pub fn evaluate(&self, model: &dyn KgeModel, triples: &[IdTriple]) -> Result<EvaluationResult> {
        let num_params = model.num_parameters();
        if triples.is_empty() {
            return Ok(RankAccumulator::default().finish(0.0, num_params));
        }

        let num_entities = model.num_entities();
        let device = model.device();
        let mut loss_sum = 0.0;
        let mut batches = 0usize;
        let mut acc = RankAccumulator::default();

        for chunk in triples.chunks(self.batch_size) {
            let heads: Vec<u32> = chunk.iter().map(|t| t.head).collect();
            let relations: Vec<u32> = chunk.iter().map(|t| t.relation).collect();
            let h = Tensor::from_slice(&heads, heads.len(), device)?;
            let r = Tensor::from_slice(&relations, relations.len(), device)?;

            let scores = model.forward_head_batch(&h, &r)?.to_vec2::<f32>()?;
            acc = chunk
                .iter()
                .zip(scores)
                .fold(acc, |acc, (triple, mut row)| {
                    let known = self
                        .filter
                        .tails(triple.head, triple.relation)
                        .unwrap_or_default();
                    let target = triple.tail as usize;
                    self.mask.apply(&mut row, target, known);
                    acc.add(filtered_rank(&row, target))
                });

            let pairs: Vec<(u32, u32)> = heads.into_iter().zip(relations).collect();
            let targets = KvsAllBatch::build(&pairs, self.filter, num_entities, TargetLabels::default());
            let (_, _, targets) = targets.to_tensors(device)?;
            let loss = model.forward_head_and_loss(&h, &r, &targets)?;
            loss_sum += f64::from(loss.to_scalar::<f32>()?);
            batches += 1;
        }

        let result = acc.finish(loss_sum / batches as f64, num_params);
        info!(
            triples = result.num_triples,
            mrr = result.mean_reciprocal_rank,
            mr = result.mean_rank,
            hits_at_1 = result.hits_at_1,
            hits_at_3 = result.hits_at_3,
            hits_at_10 = result.hits_at_10,
            "evaluation done"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_with_filter() {
        // entities {a, b, c, d}; query (a, r, b); filter {b, c}
        let mut row = vec![0.1, 0.9, 0.05, 0.95];
        FilterMask::Zero.apply(&mut row, 1, &[1, 2]);
        assert_eq!(row, vec![0.1, 0.9, 0.0, 0.95]);
        assert_eq!(filtered_rank(&row, 1), 1);
    }

    #[test]
    fn test_ties_break_by_index() {
        let row = [0.5, 0.5, 0.5];
        assert_eq!(filtered_rank(&row, 0), 0);
        assert_eq!(filtered_rank(&row, 2), 2);
    }

    #[test]
    fn test_nan_scores_rank_last() {
        let mut row = vec![f32::NAN; 5];
        FilterMask::Zero.apply(&mut row, 3, &[3]);
        assert_eq!(filtered_rank(&row, 3), 4);

        let result = RankAccumulator::default()
            .add(filtered_rank(&row, 3))
            .finish(0.0, 0);
        assert_eq!(result.hits_at_1, 0.0);
        assert!((result.mean_reciprocal_rank - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_nan_candidate_outranks_target() {
        let row = [0.9, f32::NAN, 0.1];
        assert_eq!(filtered_rank(&row, 0), 1);
        assert_eq!(filtered_rank(&row, 2), 2);
    }

    #[test]
    fn test_raw_mask_leaves_row() {
        let mut row = vec![0.3, 0.7];
        FilterMask::None.apply(&mut row, 0, &[0, 1]);
        assert_eq!(row, vec![0.3, 0.7]);
    }

    #[test]
    fn test_neg_infinity_mask() {
        let mut row = vec![-0.5, 0.2, 0.7];
        FilterMask::NegInfinity.apply(&mut row, 0, &[0, 2]);
        assert_eq!(filtered_rank(&row, 0), 1);
        assert_eq!(row[2], f32::NEG_INFINITY);
    }

    #[test]
    fn test_accumulator_metrics() {
        let result = [1usize, 0, 4, 12]
            .into_iter()
            .fold(RankAccumulator::default(), RankAccumulator::add)
            .finish(0.0, 7);
        assert_eq!(result.num_triples, 4);
        assert!((result.hits_at_1 - 0.25).abs() < 1e-12);
        assert!((result.hits_at_3 - 0.5).abs() < 1e-12);
        assert!((result.hits_at_10 - 0.75).abs() < 1e-12);
        assert!((result.mean_rank - 5.25).abs() < 1e-12);
        let mrr = (0.5 + 1.0 + 0.2 + 1.0 / 13.0) / 4.0;
        assert!((result.mean_reciprocal_rank - mrr).abs() < 1e-12);
        assert_eq!(result.num_params, 7);
    }

    #[test]
    fn test_empty_is_all_zero() {
        let result = RankAccumulator::default().finish(0.0, 3);
        assert_eq!(result.num_triples, 0);
        assert_eq!(result.mean_rank, 0.0);
        assert_eq!(result.hits_at_10, 0.0);
    }

    #[test]
    fn test_record_keys() {
        let record = EvaluationResult::default().to_record();
        for key in ["H@1", "H@3", "H@10", "MR", "MRR", "TestLoss", "Number_param"] {
            assert!(record.contains_key(key), "missing {key}");
        }
    }
}
