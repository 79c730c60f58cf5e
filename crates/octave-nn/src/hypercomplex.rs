//! Hypercomplex products over component tensors.
//!
//! A quaternion (octonion) embedding of dimension `d` is stored as 4 (8)
//! real tensors of shape `(batch, d)`, one per basis element. Products are
//! taken element-wise along `d`.
//!
//! Each algebra is described by its multiplication table: output component
//! `c` is `Σ sign · lhs[a] · rhs[b]` over the listed `(a, b, sign)` terms.
//!
//! ```text
//! quaternion basis: 1, i, j, k          i·j = k, j·k = i, k·i = j
//! octonion basis:   e0 .. e7            Cayley-Dickson doubling of H
//! ```
//!
//! Both algebras are normed: |xy| = |x||y|. Normalising the relation to unit
//! norm therefore makes the product a pure rotation of the head.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

type Table = &'static [&'static [(usize, usize, f64)]];

const QUATERNION: Table = &[
    &[(0, 0, 1.0), (1, 1, -1.0), (2, 2, -1.0), (3, 3, -1.0)],
    &[(0, 1, 1.0), (1, 0, 1.0), (2, 3, 1.0), (3, 2, -1.0)],
    &[(0, 2, 1.0), (1, 3, -1.0), (2, 0, 1.0), (3, 1, 1.0)],
    &[(0, 3, 1.0), (1, 2, 1.0), (2, 1, -1.0), (3, 0, 1.0)],
];

const OCTONION: Table = &[
    &[(0, 0, 1.0), (1, 1, -1.0), (2, 2, -1.0), (3, 3, -1.0), (4, 4, -1.0), (5, 5, -1.0), (6, 6, -1.0), (7, 7, -1.0)],
    &[(0, 1, 1.0), (1, 0, 1.0), (2, 3, 1.0), (3, 2, -1.0), (4, 5, 1.0), (5, 4, -1.0), (6, 7, -1.0), (7, 6, 1.0)],
    &[(0, 2, 1.0), (1, 3, -1.0), (2, 0, 1.0), (3, 1, 1.0), (4, 6, 1.0), (5, 7, 1.0), (6, 4, -1.0), (7, 5, -1.0)],
    &[(0, 3, 1.0), (1, 2, 1.0), (2, 1, -1.0), (3, 0, 1.0), (4, 7, 1.0), (5, 6, -1.0), (6, 5, 1.0), (7, 4, -1.0)],
    &[(0, 4, 1.0), (1, 5, -1.0), (2, 6, -1.0), (3, 7, -1.0), (4, 0, 1.0), (5, 1, 1.0), (6, 2, 1.0), (7, 3, 1.0)],
    &[(0, 5, 1.0), (1, 4, 1.0), (2, 7, -1.0), (3, 6, 1.0), (4, 1, -1.0), (5, 0, 1.0), (6, 3, -1.0), (7, 2, 1.0)],
    &[(0, 6, 1.0), (1, 7, 1.0), (2, 4, 1.0), (3, 5, -1.0), (4, 2, -1.0), (5, 3, 1.0), (6, 0, 1.0), (7, 1, -1.0)],
    &[(0, 7, 1.0), (1, 6, -1.0), (2, 5, 1.0), (3, 4, 1.0), (4, 3, -1.0), (5, 2, -1.0), (6, 1, 1.0), (7, 0, 1.0)],
];

/// The number system embeddings live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algebra {
    /// Quaternions (4 components).
    Quaternion,
    /// Octonions (8 components).
    Octonion,
}

impl Algebra {
    /// Number of real components per element.
    pub const fn components(self) -> usize {
        match self {
            Self::Quaternion => 4,
            Self::Octonion => 8,
        }
    }

    fn table(self) -> Table {
        match self {
            Self::Quaternion => QUATERNION,
            Self::Octonion => OCTONION,
        }
    }

    /// Component-wise hypercomplex product `lhs · rhs`.
    pub fn mul(self, lhs: &[Tensor], rhs: &[Tensor]) -> Result<Vec<Tensor>> {
        self.check_arity(lhs)?;
        self.check_arity(rhs)?;

        let mut out = Vec::with_capacity(self.components());
        for terms in self.table() {
            let mut acc: Option<Tensor> = None;
            for &(a, b, sign) in terms.iter() {
                let prod = (&lhs[a] * &rhs[b])?;
                acc = Some(match acc {
                    None if sign > 0.0 => prod,
                    None => prod.neg()?,
                    Some(acc) if sign > 0.0 => (acc + prod)?,
                    Some(acc) => (acc - prod)?,
                });
            }
            // every table row is non-empty
            out.push(acc.ok_or_else(|| Error::InvalidConfig("empty product row".into()))?);
        }
        Ok(out)
    }

    /// `lhs · (rhs / |rhs|)`.
    pub fn mul_unit(self, lhs: &[Tensor], rhs: &[Tensor]) -> Result<Vec<Tensor>> {
        let rhs = self.normalize(rhs)?;
        self.mul(lhs, &rhs)
    }

    /// Scale every element to unit norm, element-wise along the embedding.
    pub fn normalize(self, parts: &[Tensor]) -> Result<Vec<Tensor>> {
        self.check_arity(parts)?;
        let mut sq = parts[0].sqr()?;
        for p in &parts[1..] {
            sq = (sq + p.sqr()?)?;
        }
        let norm = sq.sqrt()?;
        parts
            .iter()
            .map(|p| -> Result<Tensor> { Ok((p / &norm)?) })
            .collect()
    }

    fn check_arity(self, parts: &[Tensor]) -> Result<()> {
        if parts.len() == self.components() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(format!(
                "{:?} needs {} components, got {}",
                self,
                self.components(),
                parts.len()
            )))
        }
    }
}
