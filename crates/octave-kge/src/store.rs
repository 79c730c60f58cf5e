//! On-disk run artifacts.
//!
//! A run directory holds:
//!
//! | File | Content |
//! |------|---------|
//! | `settings.json` | run configuration and dataset metadata |
//! | `loss_per_epoch.csv` | one summed epoch loss per line |
//! | `model.safetensors` | model variables |
//! | `results.json` | test metrics merged with the settings |

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use octave_nn::KgeModel;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;

pub const SETTINGS_FILE: &str = "settings.json";
pub const LOSS_FILE: &str = "loss_per_epoch.csv";
pub const MODEL_FILE: &str = "model.safetensors";
pub const RESULTS_FILE: &str = "results.json";

/// Writes the artifacts of one run into a directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Use `dir`, creating it if needed.
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of an artifact in the run directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn write_settings(&self, settings: &Map<String, Value>) -> Result<PathBuf> {
        self.write_json(SETTINGS_FILE, settings)
    }

    pub fn write_results(&self, results: &Map<String, Value>) -> Result<PathBuf> {
        self.write_json(RESULTS_FILE, results)
    }

    /// One loss per line; an empty sequence writes an empty file.
    pub fn write_losses(&self, losses: &[f64]) -> Result<PathBuf> {
        let path = self.path(LOSS_FILE);
        let mut w = BufWriter::new(File::create(&path)?);
        for loss in losses {
            writeln!(w, "{loss}")?;
        }
        w.flush()?;
        debug!(path = %path.display(), epochs = losses.len(), "wrote losses");
        Ok(path)
    }

    pub fn save_model(&self, model: &dyn KgeModel) -> Result<PathBuf> {
        let path = self.path(MODEL_FILE);
        model.save(&path)?;
        debug!(path = %path.display(), model = model.name(), "saved model");
        Ok(path)
    }

    /// Read back a loss file written by [`ArtifactStore::write_losses`].
    pub fn read_losses(&self) -> Result<Vec<f64>> {
        let content = fs::read_to_string(self.path(LOSS_FILE))?;
        Ok(content
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    fn write_json(&self, name: &str, record: &Map<String, Value>) -> Result<PathBuf> {
        let path = self.path(name);
        let json = serde_json::to_string_pretty(record)?;
        let mut w = BufWriter::new(File::create(&path)?);
        w.write_all(json.as_bytes())?;
        w.flush()?;
        debug!(path = %path.display(), "wrote record");
        Ok(path)
    }
}
