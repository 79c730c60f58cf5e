#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::doc_markdown)]

//! K-vs-All training and filtered evaluation of knowledge graph embeddings.
//!
//! ## K-vs-All
//!
//! Instead of scoring one (h, r, t) triple at a time against a handful of
//! sampled negatives, K-vs-All scores a (head, relation) query against
//! **every** entity in one pass and compares the result with a multi-hot
//! target over all tails known for that query:
//!
//! ```text
//! (alice, knows, ·)  →  scores over N entities
//!                       target: 1 at {bob, carol}, 0 elsewhere
//! ```
//!
//! Unknown tails act as negatives, so no sampler is needed.
//!
//! ## Filtered evaluation
//!
//! A test query (alice, knows, ?) may have several true answers. When ranking
//! the one under test, the others are masked so the model is not penalised
//! for ranking true facts highly. See [`evaluation`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use octave_core::Dataset;
//! use octave_kge::{ArtifactStore, Experiment, ExperimentConfig, TrainingConfig};
//! use octave_nn::ModelKind;
//!
//! let config = ExperimentConfig::new(ModelKind::QMult)
//!     .with_training(TrainingConfig::default().with_epochs(100));
//! let dataset = Dataset::from_dir("KGs/UMLS", config.dataset_options(false)).unwrap();
//! let store = ArtifactStore::create("runs/umls-qmult").unwrap();
//!
//! let report = Experiment::new(config).run(&dataset, &store).unwrap();
//! if let Some(test) = report.test {
//!     println!("{}", test.summary());
//! }
//! ```

pub mod batch;
pub mod config;
mod error;
pub mod evaluation;
pub mod experiment;
pub mod store;
pub mod training;

pub use batch::{BatchLoader, KvsAllBatch, TargetLabels};
pub use config::{ExperimentConfig, ScoringTechnique, TrainingConfig};
pub use error::{Error, Result};
pub use evaluation::{filtered_rank, EvaluationResult, Evaluator, FilterMask, RankAccumulator};
pub use experiment::{Experiment, ExperimentReport};
pub use store::ArtifactStore;
pub use training::{smooth_targets, EpochAccumulator, Trainer, TrainingOutcome};
