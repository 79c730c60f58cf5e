//! Link-prediction datasets split into train / validation / test.
//!
//! The on-disk layout is the one used by the common benchmarks (FB15k-237,
//! WN18RR, UMLS, Kinship, ...): a directory holding `train.txt`, `valid.txt`
//! and `test.txt`, one whitespace-separated `head relation tail` per line.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::triple::Triple;

/// Which splits make up the collection used to filter known answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterPolicy {
    /// Training and validation triples.
    TrainValid,
    /// Training, validation and test triples.
    #[default]
    All,
}

impl std::str::FromStr for FilterPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "train-valid" | "TrainValid" => Ok(Self::TrainValid),
            "all" | "All" => Ok(Self::All),
            other => Err(format!("unknown filter policy: {other}")),
        }
    }
}

/// Loading options.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DatasetOptions {
    /// Train on the union of training and validation triples.
    pub train_plus_valid: bool,
    /// Add `(t, r_reverse, h)` for every `(h, r, t)` in every split.
    pub reciprocal: bool,
}

/// Dataset metadata merged into the recorded run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Dataset name (directory name when loaded from disk).
    pub dataset: String,
    /// Whether validation triples are trained on.
    pub train_plus_valid: bool,
    /// Whether reciprocal triples were added.
    pub reciprocal: bool,
    /// Training triples (after any merge).
    pub num_train: usize,
    /// Validation triples.
    pub num_valid: usize,
    /// Test triples.
    pub num_test: usize,
}

/// A dataset with its entity and relation name lists.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    options: DatasetOptions,
    entities: Vec<String>,
    relations: Vec<String>,
    train: Vec<Triple>,
    valid: Vec<Triple>,
    test: Vec<Triple>,
}

impl Dataset {
    /// Build from in-memory splits.
    ///
    /// Entity and relation lists are the sorted, deduplicated names used
    /// across all three splits.
    pub fn from_splits(
        name: impl Into<String>,
        train: Vec<Triple>,
        valid: Vec<Triple>,
        test: Vec<Triple>,
        options: DatasetOptions,
    ) -> Self {
        let (train, valid, test) = if options.reciprocal {
            (with_reciprocals(train), with_reciprocals(valid), with_reciprocals(test))
        } else {
            (train, valid, test)
        };

        let mut entities = BTreeSet::new();
        let mut relations = BTreeSet::new();
        for t in train.iter().chain(&valid).chain(&test) {
            entities.insert(t.head.as_str());
            entities.insert(t.tail.as_str());
            relations.insert(t.relation.as_str());
        }
        let entities = entities.into_iter().map(str::to_string).collect();
        let relations = relations.into_iter().map(str::to_string).collect();

        Self {
            name: name.into(),
            options,
            entities,
            relations,
            train,
            valid,
            test,
        }
    }

    /// Load `train.txt`, `valid.txt` and `test.txt` from `dir`.
    ///
    /// `train.txt` is required; a missing validation or test file is an
    /// empty split.
    pub fn from_dir(dir: impl AsRef<Path>, options: DatasetOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let train = read_triples(&dir.join("train.txt"))?;
        let valid = read_optional(&dir.join("valid.txt"))?;
        let test = read_optional(&dir.join("test.txt"))?;
        debug!(
            dir = %dir.display(),
            train = train.len(),
            valid = valid.len(),
            test = test.len(),
            "loaded splits"
        );

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Ok(Self::from_splits(name, train, valid, test, options))
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted entity names.
    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Sorted relation names.
    pub fn relations(&self) -> &[String] {
        &self.relations
    }

    /// Triples to train on: train, plus validation when merged.
    pub fn train(&self) -> Vec<Triple> {
        if self.options.train_plus_valid {
            self.train.iter().chain(&self.valid).cloned().collect()
        } else {
            self.train.clone()
        }
    }

    /// Validation split.
    pub fn valid(&self) -> &[Triple] {
        &self.valid
    }

    /// Test split.
    pub fn test(&self) -> &[Triple] {
        &self.test
    }

    /// Loading options.
    pub fn options(&self) -> DatasetOptions {
        self.options
    }

    /// The collection whose answers are masked during filtered evaluation.
    pub fn filter_triples(&self, policy: FilterPolicy) -> Vec<Triple> {
        let base = self.train.iter().chain(&self.valid);
        match policy {
            FilterPolicy::TrainValid => base.cloned().collect(),
            FilterPolicy::All => base.chain(&self.test).cloned().collect(),
        }
    }

    /// Metadata for the run record.
    pub fn info(&self) -> DatasetInfo {
        let num_train = if self.options.train_plus_valid {
            self.train.len() + self.valid.len()
        } else {
            self.train.len()
        };
        DatasetInfo {
            dataset: self.name.clone(),
            train_plus_valid: self.options.train_plus_valid,
            reciprocal: self.options.reciprocal,
            num_train,
            num_valid: self.valid.len(),
            num_test: self.test.len(),
        }
    }
}

fn with_reciprocals(triples: Vec<Triple>) -> Vec<Triple> {
    let reversed: Vec<Triple> = triples.iter().map(Triple::reciprocal).collect();
    triples.into_iter().chain(reversed).collect()
}

fn read_optional(path: &Path) -> Result<Vec<Triple>> {
    if path.exists() {
        read_triples(path)
    } else {
        Ok(Vec::new())
    }
}

/// Read one whitespace-separated triple per line. Blank lines are skipped.
pub fn read_triples(path: &Path) -> Result<Vec<Triple>> {
    let content = fs::read_to_string(path)?;
    parse_triples(&content, path)
}

fn parse_triples(content: &str, path: &Path) -> Result<Vec<Triple>> {
    let mut triples = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [] => continue,
            [h, r, t] => triples.push(Triple::new(*h, *r, *t)),
            other => {
                return Err(Error::Parse {
                    file: PathBuf::from(path),
                    line: i + 1,
                    reason: format!("expected 3 fields, found {}", other.len()),
                })
            }
        }
    }
    Ok(triples)
}
