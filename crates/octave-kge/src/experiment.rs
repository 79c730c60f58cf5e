//! One end-to-end run: index, train, evaluate, persist.
//!
//! ```text
//! Dataset ─► VocabularyIndex ─► ErVocabulary(train) ─► Trainer ─► model
//!                       └─────► ErVocabulary(filter) ─► Evaluator ─► metrics
//! ```
//!
//! Artifacts are written through an [`ArtifactStore`] as the run progresses,
//! so a failed evaluation still leaves the settings, losses and model behind.
//! `results.json` is written when either split was evaluated: test metrics at
//! the top level, validation metrics under `"validation"`.

use std::path::PathBuf;

use candle_core::Device;
use octave_core::{Dataset, ErVocabulary, VocabularyIndex};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::evaluation::{EvaluationResult, Evaluator, FilterMask};
use crate::store::ArtifactStore;
use crate::training::{Trainer, TrainingOutcome};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    /// The recorded run configuration.
    pub settings: Map<String, Value>,
    pub training: TrainingOutcome,
    /// Trainable parameter count.
    pub num_params: usize,
    /// Test metrics; `None` when the test split is empty.
    pub test: Option<EvaluationResult>,
    /// Validation metrics, when validation was held out and non-empty.
    pub validation: Option<EvaluationResult>,
    /// Directory the artifacts were written to.
    pub run_dir: PathBuf,
}

/// A configured experiment.
#[derive(Debug, Clone)]
pub struct Experiment {
    config: ExperimentConfig,
    device: Device,
    mask: FilterMask,
}

impl Experiment {
    /// Run `config` on the CPU with the default filter mask.
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            config,
            device: Device::Cpu,
            mask: FilterMask::default(),
        }
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_mask(mut self, mask: FilterMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Train and evaluate on `dataset`, writing artifacts to `store`.
    pub fn run(&self, dataset: &Dataset, store: &ArtifactStore) -> Result<ExperimentReport> {
        let cfg = &self.config;
        cfg.training.scoring_technique.ensure_trainable()?;
        cfg.training.validate()?;
        if dataset.options().train_plus_valid != cfg.train_plus_valid {
            warn!(
                configured = cfg.train_plus_valid,
                loaded = dataset.options().train_plus_valid,
                "dataset was loaded with a different train_plus_valid setting; using the dataset's"
            );
        }

        let index = VocabularyIndex::new(dataset.entities(), dataset.relations())?;

        let mut params = cfg.model_params.clone();
        if params.norm_flag && (params.input_dropout != 0.0 || params.hidden_dropout != 0.0) {
            warn!(
                input_dropout = params.input_dropout,
                hidden_dropout = params.hidden_dropout,
                "dropout is not used with unit-norm relations; setting it to 0"
            );
            params = params.with_input_dropout(0.0).with_hidden_dropout(0.0);
        }

        let mut settings = Map::new();
        settings.insert("model".into(), json!(cfg.model.name()));
        merge(&mut settings, &cfg.training)?;
        merge(&mut settings, &params)?;
        settings.insert("filter".into(), serde_json::to_value(cfg.filter)?);
        settings.insert("num_entities".into(), json!(index.num_entities()));
        settings.insert("num_relations".into(), json!(index.num_relations()));
        merge(&mut settings, &dataset.info())?;

        let mut model = cfg.model.build(
            &params,
            index.num_entities(),
            index.num_relations(),
            &self.device,
            cfg.training.seed,
        )?;
        let num_params = model.num_parameters();
        let info = dataset.info();
        info!(
            dataset = %info.dataset,
            train = info.num_train,
            valid = info.num_valid,
            test = info.num_test,
            entities = index.num_entities(),
            relations = index.num_relations(),
            "dataset"
        );
        info!(model = model.name(), num_params, "model ready");
        store.write_settings(&settings)?;

        let train = index.index_triples(&dataset.train())?;
        let train_er = ErVocabulary::from_triples(&train);
        let training = Trainer::new(cfg.training.clone()).train(model.as_mut(), &train_er)?;
        store.write_losses(&training.loss_per_epoch)?;
        store.save_model(model.as_ref())?;

        let filter_triples = index.index_triples(&dataset.filter_triples(cfg.filter))?;
        let filter_er = ErVocabulary::from_triples(&filter_triples);
        let evaluator = Evaluator::new(&filter_er, cfg.training.batch_size).with_mask(self.mask);

        let validation = if !dataset.valid().is_empty() && !dataset.options().train_plus_valid {
            info!("evaluating validation split");
            let valid = index.index_triples(dataset.valid())?;
            Some(evaluator.evaluate(model.as_ref(), &valid)?)
        } else {
            None
        };

        let test = if dataset.test().is_empty() {
            info!("test split is empty, skipping evaluation");
            None
        } else {
            info!("evaluating test split");
            let test = index.index_triples(dataset.test())?;
            Some(evaluator.evaluate(model.as_ref(), &test)?)
        };

        if test.is_some() || validation.is_some() {
            let mut record = test.as_ref().map(EvaluationResult::to_record).unwrap_or_default();
            if let Some(v) = &validation {
                record.insert("validation".into(), Value::Object(v.to_record()));
            }
            record.extend(settings.clone());
            store.write_results(&record)?;
        }

        Ok(ExperimentReport {
            settings,
            training,
            num_params,
            test,
            validation,
            run_dir: store.dir().to_path_buf(),
        })
    }
}

/// Copy the fields of `value`, which must serialize to an object, into `map`.
fn merge(map: &mut Map<String, Value>, value: &impl Serialize) -> Result<()> {
    if let Value::Object(fields) = serde_json::to_value(value)? {
        map.extend(fields);
    }
    Ok(())
}
