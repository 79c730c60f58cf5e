//! Triple types: named facts as read from disk, and their id-encoded form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A (head, relation, tail) fact over entity and relation names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Triple {
    /// Head entity (subject).
    pub head: String,
    /// Relation (predicate).
    pub relation: String,
    /// Tail entity (object).
    pub tail: String,
}

impl Triple {
    /// Create a new triple.
    pub fn new(
        head: impl Into<String>,
        relation: impl Into<String>,
        tail: impl Into<String>,
    ) -> Self {
        Self {
            head: head.into(),
            relation: relation.into(),
            tail: tail.into(),
        }
    }

    /// The reciprocal fact `(tail, relation_reverse, head)`.
    pub fn reciprocal(&self) -> Self {
        Self {
            head: self.tail.clone(),
            relation: format!("{}_reverse", self.relation),
            tail: self.head.clone(),
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.head, self.relation, self.tail)
    }
}

/// A triple encoded as dense vocabulary ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdTriple {
    /// Head entity id.
    pub head: u32,
    /// Relation id.
    pub relation: u32,
    /// Tail entity id.
    pub tail: u32,
}

impl IdTriple {
    /// Create a new id triple.
    pub const fn new(head: u32, relation: u32, tail: u32) -> Self {
        Self {
            head,
            relation,
            tail,
        }
    }

    /// The (head, relation) query this triple answers.
    pub const fn query(&self) -> (u32, u32) {
        (self.head, self.relation)
    }
}

impl From<(u32, u32, u32)> for IdTriple {
    fn from((head, relation, tail): (u32, u32, u32)) -> Self {
        Self::new(head, relation, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reciprocal() {
        let t = Triple::new("paris", "capital_of", "france");
        let r = t.reciprocal();
        assert_eq!(r.head, "france");
        assert_eq!(r.relation, "capital_of_reverse");
        assert_eq!(r.tail, "paris");
    }

    #[test]
    fn test_id_triple_query() {
        let t = IdTriple::from((3, 1, 7));
        assert_eq!(t.query(), (3, 1));
        assert_eq!(t.tail, 7);
    }
}
