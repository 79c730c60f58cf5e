//! End-to-end behaviour of training, evaluation and experiment runs.
//!
//! Ranking scenarios use a model with fixed scores so ranks are exact;
//! training runs use a small QMult on a toy graph.

#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use octave_core::{Dataset, DatasetOptions, ErVocabulary, FilterPolicy, IdTriple, Triple};
use octave_kge::{
    ArtifactStore, Error, Evaluator, Experiment, ExperimentConfig, FilterMask, ScoringTechnique,
    Trainer, TrainingConfig,
};
use octave_nn::{KgeModel, ModelKind, ModelParams};

/// Returns `rows[head]` as the score row of every query on `head`.
struct FixedScores {
    rows: Vec<Vec<f32>>,
    varmap: VarMap,
    device: Device,
    training: bool,
    loss_calls: AtomicUsize,
}

impl FixedScores {
    fn new(rows: Vec<Vec<f32>>) -> Self {
        Self {
            rows,
            varmap: VarMap::new(),
            device: Device::Cpu,
            training: false,
            loss_calls: AtomicUsize::new(0),
        }
    }
}

impl KgeModel for FixedScores {
    fn name(&self) -> &'static str {
        "Fixed"
    }

    fn forward_head_batch(&self, heads: &Tensor, _relations: &Tensor) -> octave_nn::Result<Tensor> {
        let ids = heads.to_vec1::<u32>()?;
        let n = self.rows[0].len();
        let flat: Vec<f32> = ids
            .iter()
            .flat_map(|&h| self.rows[h as usize].iter().copied())
            .collect();
        Ok(Tensor::from_vec(flat, (ids.len(), n), &self.device)?)
    }

    fn forward_head_and_loss(
        &self,
        heads: &Tensor,
        relations: &Tensor,
        targets: &Tensor,
    ) -> octave_nn::Result<Tensor> {
        self.loss_calls.fetch_add(1, Ordering::SeqCst);
        let scores = self.forward_head_batch(heads, relations)?;
        Ok((scores - targets)?.sqr()?.mean_all()?)
    }

    fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    fn varmap_mut(&mut self) -> &mut VarMap {
        &mut self.varmap
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn num_entities(&self) -> usize {
        self.rows[0].len()
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

fn run_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from("target/tmp/tests").join(name);
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn toy_dataset(options: DatasetOptions) -> Dataset {
    let t = |h: &str, r: &str, tail: &str| Triple::new(h, r, tail);
    let train = vec![
        t("alice", "knows", "bob"),
        t("alice", "knows", "carol"),
        t("bob", "knows", "carol"),
        t("carol", "likes", "dave"),
        t("dave", "likes", "alice"),
        t("bob", "likes", "erin"),
        t("erin", "knows", "alice"),
    ];
    let valid = vec![t("dave", "knows", "erin")];
    let test = vec![t("carol", "knows", "alice"), t("erin", "likes", "bob")];
    Dataset::from_splits("toy", train, valid, test, options)
}

fn small_params() -> ModelParams {
    ModelParams::default()
        .with_embedding_dim(4)
        .with_input_dropout(0.0)
        .with_hidden_dropout(0.0)
}

// entities {a=0, b=1, c=2, d=3}; test (a, r, b); filter answers {b, c}
#[test]
fn filtered_rank_example() {
    let model = FixedScores::new(vec![vec![0.1, 0.9, 0.05, 0.95]]);
    let filter = ErVocabulary::from_triples(&[IdTriple::new(0, 0, 1), IdTriple::new(0, 0, 2)]);

    let result = Evaluator::new(&filter, 4)
        .evaluate(&model, &[IdTriple::new(0, 0, 1)])
        .unwrap();

    assert_eq!(result.num_triples, 1);
    assert_eq!(result.hits_at_1, 0.0);
    assert_eq!(result.hits_at_3, 1.0);
    assert_eq!(result.hits_at_10, 1.0);
    assert_eq!(result.mean_rank, 2.0);
    assert_eq!(result.mean_reciprocal_rank, 0.5);
}

#[test]
fn filtering_never_worsens_rank() {
    // the other answer (column 3) outranks the target unless filtered
    let model = FixedScores::new(vec![vec![0.2, 0.6, 0.1, 0.9]]);
    let filter = ErVocabulary::from_triples(&[IdTriple::new(0, 0, 1), IdTriple::new(0, 0, 3)]);
    let test = [IdTriple::new(0, 0, 1)];

    let filtered = Evaluator::new(&filter, 8).evaluate(&model, &test).unwrap();
    let raw = Evaluator::new(&filter, 8)
        .with_mask(FilterMask::None)
        .evaluate(&model, &test)
        .unwrap();

    assert_eq!(filtered.mean_rank, 1.0);
    assert_eq!(raw.mean_rank, 2.0);
}

#[test]
fn missing_filter_entry_masks_nothing() {
    let model = FixedScores::new(vec![vec![0.3, 0.1, 0.8]]);
    let filter = ErVocabulary::default();
    let result = Evaluator::new(&filter, 2)
        .evaluate(&model, &[IdTriple::new(0, 0, 1)])
        .unwrap();
    assert_eq!(result.mean_rank, 3.0);
}

#[test]
fn evaluation_is_batched_in_order() {
    let rows = vec![
        vec![0.9, 0.1, 0.2],
        vec![0.1, 0.9, 0.2],
        vec![0.3, 0.2, 0.1],
    ];
    let model = FixedScores::new(rows);
    let filter = ErVocabulary::default();
    let test = [
        IdTriple::new(0, 0, 0),
        IdTriple::new(1, 0, 1),
        IdTriple::new(2, 0, 2),
    ];
    // batch size 2 splits the set into [2, 1]
    let result = Evaluator::new(&filter, 2).evaluate(&model, &test).unwrap();
    assert_eq!(result.num_triples, 3);
    assert_eq!(model.loss_calls.load(Ordering::SeqCst), 2);
    assert!((result.hits_at_1 - 2.0 / 3.0).abs() < 1e-12);
    assert!((result.mean_rank - 5.0 / 3.0).abs() < 1e-12);
}

#[test]
fn empty_test_set_gives_zero_metrics() {
    let model = FixedScores::new(vec![vec![0.5, 0.5]]);
    let filter = ErVocabulary::default();
    let result = Evaluator::new(&filter, 2).evaluate(&model, &[]).unwrap();
    assert_eq!(result.num_triples, 0);
    assert_eq!(result.mean_reciprocal_rank, 0.0);
}

#[test]
fn unsupported_scoring_fails_before_batching() {
    let er = ErVocabulary::from_triples(&[IdTriple::new(0, 0, 1)]);
    for technique in [ScoringTechnique::AllvsAll, ScoringTechnique::NegativeSampling] {
        let mut model = FixedScores::new(vec![vec![0.5, 0.5]]);
        let trainer = Trainer::new(
            TrainingConfig::default()
                .with_epochs(3)
                .with_scoring_technique(technique),
        );
        let err = trainer.train(&mut model, &er).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(model.loss_calls.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn zero_epochs_returns_untrained_model_in_eval_mode() {
    let er = ErVocabulary::from_triples(&[IdTriple::new(0, 0, 1)]);
    let mut model = FixedScores::new(vec![vec![0.5, 0.5]]);
    model.set_training(true);

    let outcome = Trainer::new(TrainingConfig::default().with_epochs(0))
        .train(&mut model, &er)
        .unwrap();

    assert!(!model.is_training());
    assert_eq!(outcome.last_epoch, -1);
    assert_eq!(outcome.last_loss, -1.0);
    assert!(outcome.loss_per_epoch.is_empty());
    assert_eq!(model.loss_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn non_finite_loss_stops_training() {
    let er = ErVocabulary::from_triples(&[IdTriple::new(0, 0, 1), IdTriple::new(1, 0, 0)]);
    let mut model = FixedScores::new(vec![vec![f32::NAN, 0.5], vec![0.5, f32::INFINITY]]);
    let config = TrainingConfig::default().with_epochs(3).with_batch_size(1);

    let err = Trainer::new(config).train(&mut model, &er).unwrap_err();

    assert!(matches!(
        err,
        Error::Training {
            epoch: 1,
            source: octave_nn::Error::NonFiniteLoss(_)
        }
    ));
    assert!(!model.is_training());
    assert_eq!(model.loss_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn saturated_model_keeps_finite_loss() {
    let er = ErVocabulary::from_triples(&[IdTriple::new(0, 0, 1)]);
    // Unit-norm relations skip batch norm, so large embeddings reach the
    // sigmoid unscaled: every logit is in the thousands.
    let params = small_params().with_norm_flag(true);
    let mut model = ModelKind::QMult.build(&params, 2, 1, &Device::Cpu, 1).unwrap();
    let tables: Vec<(String, (usize, usize))> = {
        let data = model.varmap().data().lock().unwrap();
        data.iter()
            .filter(|(name, _)| name.starts_with("entity.") || name.starts_with("relation."))
            .map(|(name, var)| (name.clone(), var.dims2().unwrap()))
            .collect()
    };
    for (name, shape) in tables {
        let init = Tensor::full(30.0f32, shape, &Device::Cpu).unwrap();
        model.varmap_mut().set_one(&name, &init).unwrap();
    }
    let config = TrainingConfig::default().with_epochs(2).with_learning_rate(0.01);

    let outcome = Trainer::new(config).train(model.as_mut(), &er).unwrap();

    assert_eq!(outcome.loss_per_epoch.len(), 2);
    assert!(outcome.loss_per_epoch.iter().all(|l| l.is_finite()));
}

#[test]
fn training_reduces_loss() {
    let dataset = toy_dataset(DatasetOptions::default());
    let index =
        octave_core::VocabularyIndex::new(dataset.entities(), dataset.relations()).unwrap();
    let train = index.index_triples(&dataset.train()).unwrap();
    let er = ErVocabulary::from_triples(&train);

    let mut model = ModelKind::QMult
        .build(&small_params(), index.num_entities(), index.num_relations(), &Device::Cpu, 1)
        .unwrap();
    let config = TrainingConfig::default()
        .with_epochs(20)
        .with_batch_size(64)
        .with_learning_rate(0.01)
        .with_label_smoothing(None)
        .with_decay_rate(Some(0.99));
    let outcome = Trainer::new(config).train(model.as_mut(), &er).unwrap();

    assert_eq!(outcome.loss_per_epoch.len(), 20);
    assert_eq!(outcome.last_epoch, 20);
    assert!(!model.is_training());
    let first = outcome.loss_per_epoch[0];
    assert!(outcome.last_loss < first, "{} !< {first}", outcome.last_loss);
    assert!((outcome.final_learning_rate - 0.01 * 0.99f64.powi(20)).abs() < 1e-12);
}

#[test]
fn training_with_workers_matches_batch_count() {
    let er = ErVocabulary::from_triples(&[
        IdTriple::new(0, 0, 1),
        IdTriple::new(1, 0, 2),
        IdTriple::new(2, 0, 0),
        IdTriple::new(0, 1, 2),
        IdTriple::new(1, 1, 0),
    ]);
    let mut model = FixedScores::new(vec![vec![0.5; 3]; 3]);
    let config = TrainingConfig::default()
        .with_epochs(2)
        .with_batch_size(2)
        .with_num_workers(2);
    let outcome = Trainer::new(config).train(&mut model, &er).unwrap();
    assert_eq!(outcome.loss_per_epoch.len(), 2);
    // 5 pairs in batches of 2 -> 3 batches per epoch
    assert_eq!(model.loss_calls.load(Ordering::SeqCst), 6);
}

#[test]
fn experiment_writes_artifacts() {
    let config = ExperimentConfig::new(ModelKind::QMult)
        .with_model_params(small_params())
        .with_training(TrainingConfig::default().with_epochs(3).with_batch_size(4));
    let dataset = toy_dataset(config.dataset_options(false));
    let store = ArtifactStore::create(run_dir("experiment")).unwrap();

    let report = Experiment::new(config).run(&dataset, &store).unwrap();

    assert_eq!(report.training.loss_per_epoch.len(), 3);
    assert!(report.validation.is_none());
    let test = report.test.unwrap();
    assert_eq!(test.num_triples, 2);
    assert!(test.mean_rank >= 1.0);
    assert!(test.mean_reciprocal_rank > 0.0 && test.mean_reciprocal_rank <= 1.0);

    assert_eq!(store.read_losses().unwrap().len(), 3);
    assert!(store.path("model.safetensors").exists());
    let settings: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.path("settings.json")).unwrap()).unwrap();
    assert_eq!(settings["model"], "QMult");
    assert_eq!(settings["num_entities"], 5);
    assert_eq!(settings["dataset"], "toy");

    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.path("results.json")).unwrap()).unwrap();
    for key in ["H@1", "H@3", "H@10", "MR", "MRR", "TestLoss", "Number_param", "model"] {
        assert!(results.get(key).is_some(), "missing {key}");
    }
    assert_eq!(results["Number_param"], report.num_params);
}

#[test]
fn experiment_with_zero_epochs_writes_empty_losses() {
    let config = ExperimentConfig::new(ModelKind::OMult)
        .with_model_params(small_params())
        .with_training(TrainingConfig::default().with_epochs(0));
    let dataset = toy_dataset(config.dataset_options(false));
    let store = ArtifactStore::create(run_dir("zero-epochs")).unwrap();

    let report = Experiment::new(config).run(&dataset, &store).unwrap();

    assert_eq!(report.training.last_epoch, -1);
    assert_eq!(report.training.last_loss, -1.0);
    assert_eq!(fs::read_to_string(store.path("loss_per_epoch.csv")).unwrap(), "");
    assert!(store.path("results.json").exists());
}

#[test]
fn experiment_evaluates_held_out_validation() {
    let config = ExperimentConfig::new(ModelKind::QMult)
        .with_model_params(small_params())
        .with_train_plus_valid(false)
        .with_filter(FilterPolicy::TrainValid)
        .with_training(TrainingConfig::default().with_epochs(1));
    let dataset = toy_dataset(config.dataset_options(false));
    let store = ArtifactStore::create(run_dir("validation")).unwrap();

    let report = Experiment::new(config).run(&dataset, &store).unwrap();

    assert_eq!(report.validation.unwrap().num_triples, 1);
    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.path("results.json")).unwrap()).unwrap();
    assert!(results["validation"]["MRR"].is_number());
}

#[test]
fn experiment_without_evaluated_splits_skips_results() {
    let t = |h: &str, r: &str, tail: &str| Triple::new(h, r, tail);
    let dataset = Dataset::from_splits(
        "no-test",
        vec![t("a", "r", "b"), t("b", "r", "c")],
        Vec::new(),
        Vec::new(),
        DatasetOptions::default(),
    );
    let config = ExperimentConfig::new(ModelKind::ConvQ)
        .with_model_params(small_params().with_output_channels(2))
        .with_train_plus_valid(false)
        .with_training(TrainingConfig::default().with_epochs(1));
    let store = ArtifactStore::create(run_dir("no-test")).unwrap();

    let report = Experiment::new(config).run(&dataset, &store).unwrap();

    assert!(report.test.is_none());
    assert!(!store.path("results.json").exists());
    assert!(store.path("settings.json").exists());
}

#[test]
fn validation_only_run_still_writes_results() {
    let t = |h: &str, r: &str, tail: &str| Triple::new(h, r, tail);
    let dataset = Dataset::from_splits(
        "valid-only",
        vec![t("a", "r", "b"), t("b", "r", "c")],
        vec![t("a", "r", "c")],
        Vec::new(),
        DatasetOptions::default(),
    );
    let config = ExperimentConfig::new(ModelKind::QMult)
        .with_model_params(small_params())
        .with_train_plus_valid(false)
        .with_training(TrainingConfig::default().with_epochs(1));
    let store = ArtifactStore::create(run_dir("valid-only")).unwrap();

    let report = Experiment::new(config).run(&dataset, &store).unwrap();

    assert!(report.test.is_none());
    assert_eq!(report.validation.unwrap().num_triples, 1);
    let results: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(store.path("results.json")).unwrap()).unwrap();
    assert!(results["validation"]["MRR"].is_number());
    assert!(results.get("MRR").is_none());
    assert_eq!(results["model"], "QMult");
}

#[test]
fn unit_norm_zeroes_dropout_in_settings() {
    let config = ExperimentConfig::new(ModelKind::QMult)
        .with_model_params(ModelParams::default().with_embedding_dim(4).with_norm_flag(true))
        .with_training(TrainingConfig::default().with_epochs(0));
    let dataset = toy_dataset(config.dataset_options(false));
    let store = ArtifactStore::create(run_dir("norm-flag")).unwrap();

    let report = Experiment::new(config).run(&dataset, &store).unwrap();

    assert_eq!(report.settings["input_dropout"], 0.0);
    assert_eq!(report.settings["hidden_dropout"], 0.0);
    assert_eq!(report.settings["norm_flag"], true);
}

#[test]
fn allvsall_experiment_is_rejected() {
    let config = ExperimentConfig::new(ModelKind::QMult).with_training(
        TrainingConfig::default().with_scoring_technique(ScoringTechnique::AllvsAll),
    );
    let dataset = toy_dataset(config.dataset_options(false));
    let dir = run_dir("allvsall");
    let store = ArtifactStore::create(&dir).unwrap();

    let err = Experiment::new(config).run(&dataset, &store).unwrap_err();

    assert!(matches!(err, Error::Configuration(_)));
    assert!(!store.path("settings.json").exists());
}
