//! K-vs-All batches.
//!
//! Each training example is a unique (head, relation) pair of the training
//! [`ErVocabulary`]; its target is a dense row over all N entities with the
//! positive label at every known tail.
//!
//! ```text
//! pair (h, r)   tails {2, 5}     N = 7
//! target        [0, 0, 1, 0, 0, 1, 0]
//! ```
//!
//! [`BatchLoader`] reshuffles the pairs every epoch and either builds the
//! batches inline or on a pool of worker threads that feed a bounded queue.

use candle_core::{Device, Tensor};
use crossbeam_channel::{bounded, unbounded};
use octave_core::ErVocabulary;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Values written into dense targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetLabels {
    /// Value at known tails (default: 1.0).
    pub positive: f32,
    /// Value everywhere else (default: 0.0).
    pub negative: f32,
}

impl Default for TargetLabels {
    fn default() -> Self {
        Self {
            positive: 1.0,
            negative: 0.0,
        }
    }
}

/// One batch of (head, relation) queries with their dense targets.
#[derive(Debug, Clone, PartialEq)]
pub struct KvsAllBatch {
    /// Head ids, one per row.
    pub heads: Vec<u32>,
    /// Relation ids, one per row.
    pub relations: Vec<u32>,
    /// Row-major targets of shape (rows, num_entities).
    pub targets: Vec<f32>,
    /// Row width.
    pub num_entities: usize,
}

impl KvsAllBatch {
    /// Build the targets for `pairs` from the training answers in `er`.
    pub fn build(
        pairs: &[(u32, u32)],
        er: &ErVocabulary,
        num_entities: usize,
        labels: TargetLabels,
    ) -> Self {
        let mut heads = Vec::with_capacity(pairs.len());
        let mut relations = Vec::with_capacity(pairs.len());
        let mut targets = vec![labels.negative; pairs.len() * num_entities];
        for (row, &(h, r)) in pairs.iter().enumerate() {
            heads.push(h);
            relations.push(r);
            let offset = row * num_entities;
            for &t in er.tails(h, r).unwrap_or_default() {
                targets[offset + t as usize] = labels.positive;
            }
        }
        Self {
            heads,
            relations,
            targets,
            num_entities,
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Target row `i`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.targets[i * self.num_entities..(i + 1) * self.num_entities]
    }

    /// `(heads, relations, targets)` as `u32 (B,)`, `u32 (B,)`, `f32 (B, N)`.
    pub fn to_tensors(&self, device: &Device) -> candle_core::Result<(Tensor, Tensor, Tensor)> {
        let b = self.len();
        Ok((
            Tensor::from_slice(&self.heads, b, device)?,
            Tensor::from_slice(&self.relations, b, device)?,
            Tensor::from_slice(&self.targets, (b, self.num_entities), device)?,
        ))
    }
}

/// Shuffled, batched enumeration of the training pairs.
pub struct BatchLoader<'a> {
    er: &'a ErVocabulary,
    pairs: Vec<(u32, u32)>,
    num_entities: usize,
    batch_size: usize,
    labels: TargetLabels,
    num_workers: usize,
    prefetch_factor: usize,
    rng: ChaCha8Rng,
}

impl<'a> BatchLoader<'a> {
    /// Loader over every pair of `er`, building batches inline.
    ///
    /// `batch_size` must be non-zero.
    pub fn new(er: &'a ErVocabulary, num_entities: usize, batch_size: usize, seed: u64) -> Self {
        Self {
            er,
            pairs: er.pairs(),
            num_entities,
            batch_size: batch_size.max(1),
            labels: TargetLabels::default(),
            num_workers: 0,
            prefetch_factor: 2,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn with_labels(mut self, labels: TargetLabels) -> Self {
        self.labels = labels;
        self
    }

    /// Build batches on `num_workers` threads, keeping at most
    /// `prefetch_factor * num_workers` finished batches queued.
    pub fn with_workers(mut self, num_workers: usize, prefetch_factor: usize) -> Self {
        self.num_workers = num_workers;
        self.prefetch_factor = prefetch_factor.max(1);
        self
    }

    /// Number of unique (head, relation) pairs.
    pub fn num_pairs(&self) -> usize {
        self.pairs.len()
    }

    /// Batches per epoch.
    pub fn num_batches(&self) -> usize {
        self.pairs.len().div_ceil(self.batch_size)
    }

    /// Reshuffle for a new epoch and fold `f` over its batches.
    ///
    /// Every pair lands in exactly one batch. With workers the batch order is
    /// unspecified. The first error from `f` stops the epoch; workers see the
    /// queue close and are joined before it is returned.
    pub fn try_fold_epoch<B, E, F>(&mut self, init: B, mut f: F) -> Result<B, E>
    where
        F: FnMut(B, KvsAllBatch) -> Result<B, E>,
    {
        self.pairs.shuffle(&mut self.rng);
        let (er, n, labels) = (self.er, self.num_entities, self.labels);
        let chunks = self.pairs.chunks(self.batch_size);

        if self.num_workers == 0 {
            return chunks
                .map(|pairs| KvsAllBatch::build(pairs, er, n, labels))
                .try_fold(init, f);
        }

        let workers = self.num_workers;
        let capacity = self.prefetch_factor * workers;
        std::thread::scope(|scope| {
            let (job_tx, job_rx) = unbounded::<&[(u32, u32)]>();
            for pairs in chunks {
                // `job_rx` is alive, so the send cannot fail
                let _ = job_tx.send(pairs);
            }
            drop(job_tx);

            let (batch_tx, batch_rx) = bounded::<KvsAllBatch>(capacity);
            for _ in 0..workers {
                let jobs = job_rx.clone();
                let out = batch_tx.clone();
                scope.spawn(move || {
                    for pairs in jobs {
                        if out.send(KvsAllBatch::build(pairs, er, n, labels)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(batch_tx);

            let mut acc = init;
            for batch in batch_rx {
                acc = f(acc, batch)?;
            }
            Ok(acc)
        })
    }
}
