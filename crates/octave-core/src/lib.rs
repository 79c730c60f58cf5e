#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::doc_markdown)]

//! Core data types for K-vs-All knowledge graph embedding training.
//!
//! - [`Triple`] / [`IdTriple`] - a fact by name and by dense id
//! - [`VocabularyIndex`] - entity and relation name <-> id bijections
//! - [`ErVocabulary`] - tails grouped by (head, relation) query
//! - [`Dataset`] - train / validation / test splits loaded from disk
//!
//! # Example
//!
//! ```rust
//! use octave_core::{ErVocabulary, Triple, VocabularyIndex};
//!
//! let index = VocabularyIndex::new(["alice", "bob", "carol"], ["knows"]).unwrap();
//! let ids = index
//!     .index_triples(&[
//!         Triple::new("alice", "knows", "bob"),
//!         Triple::new("alice", "knows", "carol"),
//!     ])
//!     .unwrap();
//!
//! let er = ErVocabulary::from_triples(&ids);
//! assert_eq!(er.tails(0, 0), Some(&[1, 2][..]));
//! ```

pub mod dataset;
mod er_vocab;
mod error;
mod triple;
mod vocab;

pub use dataset::{Dataset, DatasetInfo, DatasetOptions, FilterPolicy};
pub use er_vocab::{ErVocabulary, ReVocabulary};
pub use error::{Error, Result};
pub use triple::{IdTriple, Triple};
pub use vocab::{Vocabulary, VocabularyIndex};
