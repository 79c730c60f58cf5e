#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]

//! Hypercomplex knowledge graph embedding models on candle.
//!
//! Every model scores a (head, relation) query against **all** entities at
//! once (K-vs-All), returning a `(B, N)` matrix of plausibilities in `[0, 1]`.
//!
//! ## Why hypercomplex?
//!
//! Complex embeddings (ComplEx, RotatE) show that multiplication in a richer
//! number system can express asymmetric and compositional relations.
//! Quaternions (4 components) and octonions (8 components) go further:
//!
//! - quaternion multiplication is non-commutative, so `h ⊗ r ≠ r ⊗ h`;
//! - octonion multiplication is also non-associative;
//! - both are normed, so a unit relation acts as a rotation.
//!
//! ```text
//! q = a + b·i + c·j + d·k        i² = j² = k² = ijk = -1
//! ```
//!
//! ## Models
//!
//! | Kind | Interaction |
//! |------|-------------|
//! | `QMult`, `OMult` | `h ⊗ r`, scored against every entity |
//! | `ConvQ`, `ConvO` | `conv(h, r) ∘ (h ⊗ r)` |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use candle_core::{Device, Tensor};
//! use octave_nn::{ModelKind, ModelParams};
//!
//! let mut model = ModelKind::QMult
//!     .build(&ModelParams::default(), 100, 10, &Device::Cpu, 1)
//!     .unwrap();
//! model.set_training(false);
//!
//! let heads = Tensor::new(&[0u32, 1], &Device::Cpu).unwrap();
//! let rels = Tensor::new(&[3u32, 3], &Device::Cpu).unwrap();
//! let scores = model.forward_head_batch(&heads, &rels).unwrap(); // (2, 100)
//! ```
//!
//! # References
//!
//! - Zhang et al. (2019). "Quaternion Knowledge Graph Embeddings." NeurIPS.
//! - Demir et al. (2021). "Convolutional Hypercomplex Embeddings for Link
//!   Prediction." ACML.

mod error;
pub mod hypercomplex;
pub mod model;
pub mod models;

pub use error::{Error, Result};
pub use hypercomplex::Algebra;
pub use model::{KgeModel, ModelKind, ModelParams};
