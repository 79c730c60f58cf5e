//! Octave CLI - train and evaluate hypercomplex KG embeddings.
//!
//! # Usage
//!
//! ```bash
//! # Split sizes and query multiplicity of a dataset directory
//! octave stats KGs/UMLS
//!
//! # Train QMult with K-vs-All and report filtered test metrics
//! octave train KGs/UMLS --model QMult --epochs 100 --batch-size 512
//!
//! # Convolutional octonions, held-out validation, decaying learning rate
//! octave train KGs/FB15k-237 --model ConvO --train-plus-valid false \
//!     --decay-rate 0.995 --output runs/fb-convo
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::ProgressBar;
use octave_core::{Dataset, DatasetOptions, ErVocabulary, FilterPolicy, ReVocabulary, VocabularyIndex};
use octave_kge::{
    ArtifactStore, Experiment, ExperimentConfig, FilterMask, ScoringTechnique, TrainingConfig,
};
use octave_nn::{ModelKind, ModelParams};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "octave")]
#[command(about = "Hypercomplex knowledge graph embeddings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and evaluate it on the test split
    Train(TrainArgs),

    /// Show statistics about a dataset directory
    Stats {
        /// Directory with train.txt, valid.txt and test.txt
        data_dir: PathBuf,
    },
}

#[derive(Args)]
struct TrainArgs {
    /// Directory with train.txt, valid.txt and test.txt
    data_dir: PathBuf,

    /// Architecture: QMult, OMult, ConvQ or ConvO
    #[arg(short, long, default_value = "QMult", value_parser = parse_model)]
    model: ModelKind,

    #[arg(long, default_value = "2000")]
    epochs: usize,

    #[arg(long, default_value = "1024")]
    batch_size: usize,

    /// Initial learning rate
    #[arg(long, default_value = "0.001")]
    lr: f64,

    /// Label smoothing epsilon; 0 disables smoothing
    #[arg(long, default_value = "0.1")]
    label_smoothing: f64,

    /// Multiply the learning rate by this after every epoch
    #[arg(long)]
    decay_rate: Option<f64>,

    /// Scoring technique (only KvsAll trains)
    #[arg(long, default_value = "KvsAll", value_parser = parse_scoring)]
    scoring: ScoringTechnique,

    /// Train on training and validation triples
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    train_plus_valid: bool,

    /// Splits used to filter known answers
    #[arg(long, default_value = "all")]
    filter: FilterPolicy,

    /// Value written over known answers before ranking
    #[arg(long, value_enum, default_value = "zero")]
    mask: MaskArg,

    /// Batch-building threads; 0 builds batches inline
    #[arg(long, default_value = "0")]
    num_workers: usize,

    /// Batches queued per worker
    #[arg(long, default_value = "2")]
    prefetch_factor: usize,

    /// Size of each hypercomplex component
    #[arg(long, default_value = "100")]
    embedding_dim: usize,

    #[arg(long, default_value = "0.3")]
    input_dropout: f32,

    #[arg(long, default_value = "0.3")]
    hidden_dropout: f32,

    #[arg(long, default_value = "0.4")]
    feature_map_dropout: f32,

    /// Convolution output channels
    #[arg(long, default_value = "16")]
    channels: usize,

    #[arg(long, default_value = "3")]
    kernel_size: usize,

    /// Unit-norm relations, no batch norm or dropout
    #[arg(long)]
    norm: bool,

    /// Random seed for shuffling and initialisation
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Add a reversed triple for every triple
    #[arg(long)]
    reciprocal: bool,

    /// Run directory (default: runs/<dataset>-<model>-<timestamp>)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum MaskArg {
    /// Overwrite known answers with 0
    Zero,
    /// Overwrite known answers with negative infinity
    NegInfinity,
    /// Raw ranking, nothing masked
    None,
}

impl From<MaskArg> for FilterMask {
    fn from(mask: MaskArg) -> Self {
        match mask {
            MaskArg::Zero => FilterMask::Zero,
            MaskArg::NegInfinity => FilterMask::NegInfinity,
            MaskArg::None => FilterMask::None,
        }
    }
}

fn parse_model(s: &str) -> Result<ModelKind, String> {
    ExperimentConfig::for_model(s)
        .map(|config| config.model)
        .map_err(|e| e.to_string())
}

fn parse_scoring(s: &str) -> Result<ScoringTechnique, String> {
    s.parse().map_err(|e: octave_kge::Error| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => cmd_train(args),
        Commands::Stats { data_dir } => cmd_stats(&data_dir),
    }
}

fn load_dataset(dir: &Path, options: DatasetOptions) -> Result<Dataset> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Loading {}...", dir.display()));

    let dataset = Dataset::from_dir(dir, options)
        .with_context(|| format!("Failed to load dataset from {}", dir.display()))?;

    pb.finish_with_message(format!("Loaded in {:.2?}", start.elapsed()));
    Ok(dataset)
}

impl TrainArgs {
    fn experiment_config(&self) -> ExperimentConfig {
        let label_smoothing = (self.label_smoothing > 0.0).then_some(self.label_smoothing);
        let training = TrainingConfig::default()
            .with_epochs(self.epochs)
            .with_batch_size(self.batch_size)
            .with_learning_rate(self.lr)
            .with_label_smoothing(label_smoothing)
            .with_decay_rate(self.decay_rate)
            .with_scoring_technique(self.scoring)
            .with_num_workers(self.num_workers)
            .with_prefetch_factor(self.prefetch_factor)
            .with_seed(self.seed);
        let params = ModelParams::default()
            .with_embedding_dim(self.embedding_dim)
            .with_input_dropout(self.input_dropout)
            .with_hidden_dropout(self.hidden_dropout)
            .with_feature_map_dropout(self.feature_map_dropout)
            .with_output_channels(self.channels)
            .with_kernel_size(self.kernel_size)
            .with_norm_flag(self.norm);

        ExperimentConfig::new(self.model)
            .with_training(training)
            .with_model_params(params)
            .with_filter(self.filter)
            .with_train_plus_valid(self.train_plus_valid)
    }

    fn run_dir(&self, dataset: &Dataset) -> PathBuf {
        if let Some(dir) = &self.output {
            return dir.clone();
        }
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        PathBuf::from("runs").join(format!("{}-{}-{secs}", dataset.name(), self.model))
    }
}

fn cmd_train(args: TrainArgs) -> Result<()> {
    let config = args.experiment_config();
    // Fail on an unusable configuration before reading any data.
    config.training.scoring_technique.ensure_trainable()?;
    config.training.validate()?;

    let dataset = load_dataset(&args.data_dir, config.dataset_options(args.reciprocal))?;
    let run_dir = args.run_dir(&dataset);
    let store = ArtifactStore::create(&run_dir)
        .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;

    let start = Instant::now();
    let report = Experiment::new(config)
        .with_mask(args.mask.into())
        .run(&dataset, &store)
        .with_context(|| format!("Experiment on {} failed", dataset.name()))?;

    println!("Run Summary");
    println!("===========");
    println!("Model:          {} ({} parameters)", args.model, report.num_params);
    println!("Dataset:        {}", dataset.name());
    println!("Epochs run:     {}", report.training.loss_per_epoch.len());
    if let Some(loss) = report.training.loss_per_epoch.last() {
        println!("Final loss:     {loss:.6}");
    }
    println!("Final lr:       {:.6}", report.training.final_learning_rate);
    println!("Elapsed:        {:.2?}", start.elapsed());
    if let Some(validation) = &report.validation {
        println!("Validation:     {}", validation.summary());
    }
    match &report.test {
        Some(test) => println!("Test:           {}", test.summary()),
        None => println!("Test:           skipped (empty split)"),
    }
    println!("Artifacts:      {}", report.run_dir.display());

    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    let options = DatasetOptions {
        train_plus_valid: false,
        reciprocal: false,
    };
    let dataset = load_dataset(data_dir, options)?;
    let index = VocabularyIndex::new(dataset.entities(), dataset.relations())?;
    let train = index.index_triples(&dataset.train())?;
    let er = ErVocabulary::from_triples(&train);
    let re = ReVocabulary::from_triples(&train);

    let per_query = |answers: usize, queries: usize| {
        if queries == 0 {
            0.0
        } else {
            answers as f64 / queries as f64
        }
    };

    println!("Dataset Statistics");
    println!("==================");
    println!("Name:            {}", dataset.name());
    println!("Entities:        {}", index.num_entities());
    println!("Relations:       {}", index.num_relations());
    println!("Train triples:   {}", train.len());
    println!("Valid triples:   {}", dataset.valid().len());
    println!("Test triples:    {}", dataset.test().len());
    println!("(h, r) queries:  {}", er.len());
    println!("Avg tails/query: {:.2}", per_query(er.num_answers(), er.len()));
    println!("(r, t) queries:  {}", re.len());
    println!("Avg heads/query: {:.2}", per_query(train.len(), re.len()));

    Ok(())
}
