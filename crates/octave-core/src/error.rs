use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in octave-core.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Entity name not present in the vocabulary.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),
    /// Relation name not present in the vocabulary.
    #[error("Relation not found: {0}")]
    RelationNotFound(String),
    /// The same name appeared twice while building a vocabulary.
    #[error("Duplicate {kind} name: {name}")]
    DuplicateName {
        /// "entity" or "relation".
        kind: &'static str,
        /// The repeated name.
        name: String,
    },
    /// A triple file contained a malformed line.
    #[error("{}:{line}: {reason}", file.display())]
    Parse {
        /// File being read.
        file: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        reason: String,
    },
}

/// Result type alias for octave-core.
pub type Result<T> = std::result::Result<T, Error>;
