//! Label vocabularies: answers grouped by query.
//!
//! [`ErVocabulary`] maps each (head, relation) pair to every tail observed
//! with it. It is built twice per run from different collections: once from
//! the training triples to produce K-vs-All targets, and once from the filter
//! split to mask other known answers during evaluation. The two instances are
//! independent values; nothing is shared between them.
//!
//! [`ReVocabulary`] is the head-side mirror, (relation, tail) -> heads.
//!
//! Both keep insertion order for keys and for answers, so enumeration is
//! deterministic for a given input.

use std::collections::HashMap;

use crate::triple::IdTriple;

/// Ordered multimap from a query key to its answers.
#[derive(Debug, Clone, Default)]
struct Grouped {
    slots: HashMap<(u32, u32), usize>,
    entries: Vec<((u32, u32), Vec<u32>)>,
}

impl Grouped {
    fn push(&mut self, key: (u32, u32), answer: u32) {
        match self.slots.get(&key) {
            Some(&slot) => self.entries[slot].1.push(answer),
            None => {
                self.slots.insert(key, self.entries.len());
                self.entries.push((key, vec![answer]));
            }
        }
    }

    fn get(&self, key: (u32, u32)) -> Option<&[u32]> {
        self.slots
            .get(&key)
            .map(|&slot| self.entries[slot].1.as_slice())
    }
}

/// (head, relation) -> tails.
#[derive(Debug, Clone, Default)]
pub struct ErVocabulary {
    inner: Grouped,
}

impl ErVocabulary {
    /// Group tails by (head, relation) over `triples`.
    pub fn from_triples(triples: &[IdTriple]) -> Self {
        let mut inner = Grouped::default();
        for t in triples {
            inner.push((t.head, t.relation), t.tail);
        }
        Self { inner }
    }

    /// Tails observed for (head, relation), in insertion order.
    pub fn tails(&self, head: u32, relation: u32) -> Option<&[u32]> {
        self.inner.get((head, relation))
    }

    /// Distinct (head, relation) pairs, in first-seen order.
    pub fn pairs(&self) -> Vec<(u32, u32)> {
        self.inner.entries.iter().map(|(k, _)| *k).collect()
    }

    /// Iterate `((head, relation), tails)`.
    pub fn iter(&self) -> impl Iterator<Item = ((u32, u32), &[u32])> {
        self.inner.entries.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Number of distinct (head, relation) pairs.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether no pair was observed.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Total number of (pair, tail) entries, counting repeats.
    pub fn num_answers(&self) -> usize {
        self.inner.entries.iter().map(|(_, v)| v.len()).sum()
    }
}

/// (relation, tail) -> heads.
#[derive(Debug, Clone, Default)]
pub struct ReVocabulary {
    inner: Grouped,
}

impl ReVocabulary {
    /// Group heads by (relation, tail) over `triples`.
    pub fn from_triples(triples: &[IdTriple]) -> Self {
        let mut inner = Grouped::default();
        for t in triples {
            inner.push((t.relation, t.tail), t.head);
        }
        Self { inner }
    }

    /// Heads observed for (relation, tail).
    pub fn heads(&self, relation: u32, tail: u32) -> Option<&[u32]> {
        self.inner.get((relation, tail))
    }

    /// Number of distinct (relation, tail) pairs.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether no pair was observed.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}
