//! Entity and relation vocabularies.
//!
//! A [`Vocabulary`] is a bijection between names and dense ids `0..len`,
//! assigned in the order the names are supplied. [`VocabularyIndex`] pairs
//! the entity and relation vocabularies of one dataset and turns named
//! [`Triple`]s into [`IdTriple`]s.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::triple::{IdTriple, Triple};

/// Dense id assignment for one kind of name.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Vocabulary {
    /// Build from distinct names; ids follow iteration order.
    ///
    /// `kind` is only used in the error message for a repeated name.
    pub fn from_names<I, S>(kind: &'static str, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self::default();
        for name in names {
            let name = name.into();
            if vocab.ids.contains_key(&name) {
                return Err(Error::DuplicateName { kind, name });
            }
            vocab.ids.insert(name.clone(), vocab.names.len() as u32);
            vocab.names.push(name);
        }
        Ok(vocab)
    }

    /// Id of `name`, if present.
    pub fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Name of `id`, if in range.
    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    /// Names in id order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the vocabulary is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Entity and relation vocabularies of one dataset. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct VocabularyIndex {
    entities: Vocabulary,
    relations: Vocabulary,
}

impl VocabularyIndex {
    /// Build from ordered, distinct entity and relation names.
    pub fn new<E, R>(entities: E, relations: R) -> Result<Self>
    where
        E: IntoIterator,
        E::Item: Into<String>,
        R: IntoIterator,
        R::Item: Into<String>,
    {
        Ok(Self {
            entities: Vocabulary::from_names("entity", entities)?,
            relations: Vocabulary::from_names("relation", relations)?,
        })
    }

    /// Entity count (N).
    pub fn num_entities(&self) -> usize {
        self.entities.len()
    }

    /// Relation count (R).
    pub fn num_relations(&self) -> usize {
        self.relations.len()
    }

    /// The entity vocabulary.
    pub fn entities(&self) -> &Vocabulary {
        &self.entities
    }

    /// The relation vocabulary.
    pub fn relations(&self) -> &Vocabulary {
        &self.relations
    }

    /// Id of an entity name.
    pub fn entity_id(&self, name: &str) -> Result<u32> {
        self.entities
            .id(name)
            .ok_or_else(|| Error::EntityNotFound(name.to_string()))
    }

    /// Id of a relation name.
    pub fn relation_id(&self, name: &str) -> Result<u32> {
        self.relations
            .id(name)
            .ok_or_else(|| Error::RelationNotFound(name.to_string()))
    }

    /// Name of an entity id.
    pub fn entity_name(&self, id: u32) -> Option<&str> {
        self.entities.name(id)
    }

    /// Name of a relation id.
    pub fn relation_name(&self, id: u32) -> Option<&str> {
        self.relations.name(id)
    }

    /// Encode one triple.
    pub fn index_triple(&self, triple: &Triple) -> Result<IdTriple> {
        Ok(IdTriple::new(
            self.entity_id(&triple.head)?,
            self.relation_id(&triple.relation)?,
            self.entity_id(&triple.tail)?,
        ))
    }

    /// Encode a sequence of triples, preserving order.
    ///
    /// Fails on the first name missing from the index.
    pub fn index_triples(&self, triples: &[Triple]) -> Result<Vec<IdTriple>> {
        triples.iter().map(|t| self.index_triple(t)).collect()
    }
}
