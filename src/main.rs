// Copyright 2024 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use seq2seq_nmt::attention_plot::AttentionPlot;
use seq2seq_nmt::checkpoint::CheckpointManager;
use seq2seq_nmt::dataset::{load_sentence_pairs, DatasetConfig, TranslationDataset};
use seq2seq_nmt::preprocessing::SentencePreprocessor;
use seq2seq_nmt::training::{Trainer, TrainingConfig};
use seq2seq_nmt::translation::{TranslationConfig, Translator};
use seq2seq_nmt::trimmer::{LengthBudget, TrimStrategy};
use seq2seq_nmt::Config;
use std::path::PathBuf;
use tch::Device;
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is not set
const DEFAULT_LOG_FILTER: &str = "seq2seq_nmt=info,nmt=info";

#[derive(Parser, Debug)]
#[command(name = "nmt", about = "Seq2seq neural machine translation with attention")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model on a tab-separated parallel corpus
    Train(TrainArgs),
    /// Translate sentences with the latest checkpoint of a trained model
    Translate(TranslateArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Strategy {
    Waterfall,
    RoundRobin,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Corpus file (`target<TAB>source` per line). Downloads the Spanish-English corpus if absent
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Directory receiving the checkpoints and the model assets
    #[arg(long, default_value = "training_checkpoints")]
    checkpoint_dir: PathBuf,

    /// JSON dataset configuration, overrides the dataset flags
    #[arg(long)]
    dataset_config: Option<PathBuf>,

    /// JSON training configuration, overrides the training flags
    #[arg(long)]
    training_config: Option<PathBuf>,

    /// Number of corpus lines to use (0 for all)
    #[arg(long, default_value_t = 30000)]
    num_examples: usize,

    #[arg(long, default_value_t = 0.2)]
    validation_fraction: f64,

    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    #[arg(long, default_value_t = 10)]
    epochs: usize,

    #[arg(long, default_value_t = 256)]
    embedding_dim: i64,

    /// Hidden size of the encoder and decoder GRUs
    #[arg(long, default_value_t = 1024)]
    units: i64,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    #[arg(long)]
    clip_grad_norm: Option<f64>,

    #[arg(long, default_value_t = 2)]
    checkpoint_every: usize,

    /// Number of checkpoints kept on disk
    #[arg(long, default_value_t = 5)]
    max_to_keep: usize,

    /// Joint word budget for each sentence pair
    #[arg(long)]
    length_budget: Option<usize>,

    #[arg(long, value_enum, default_value_t = Strategy::Waterfall)]
    trim_strategy: Strategy,

    /// Ignore source padding positions in the attention
    #[arg(long)]
    mask_padding: bool,

    /// Continue from the latest checkpoint of the checkpoint directory
    #[arg(long)]
    resume: bool,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Train on CPU even if a GPU is available
    #[arg(long)]
    cpu: bool,
}

#[derive(Args, Debug)]
struct TranslateArgs {
    /// Sentences to translate
    #[arg(required = true)]
    sentences: Vec<String>,

    #[arg(long, default_value = "training_checkpoints")]
    checkpoint_dir: PathBuf,

    /// Beam size, 1 for greedy decoding
    #[arg(long, default_value_t = 1)]
    num_beams: usize,

    #[arg(long)]
    max_length: Option<i64>,

    /// Print the attention heat map of every translation
    #[arg(long)]
    show_attention: bool,

    /// Directory receiving one attention CSV file per sentence
    #[arg(long)]
    plot_dir: Option<PathBuf>,

    #[arg(long)]
    cpu: bool,
}

fn device(cpu: bool) -> Device {
    if cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    }
}

fn corpus_path(corpus: Option<PathBuf>) -> Result<PathBuf> {
    match corpus {
        Some(path) => Ok(path),
        #[cfg(feature = "remote")]
        None => {
            use seq2seq_nmt::dataset::DatasetResources;
            use seq2seq_nmt::resources::{RemoteResource, ResourceProvider};
            Ok(RemoteResource::from_archive(DatasetResources::SPA_ENG).get_local_path()?)
        }
        #[cfg(not(feature = "remote"))]
        None => bail!("--corpus is required when built without the `remote` feature"),
    }
}

fn train(args: TrainArgs) -> Result<()> {
    let dataset_config = match &args.dataset_config {
        Some(path) => DatasetConfig::from_file(path)?,
        None => DatasetConfig {
            num_examples: (args.num_examples > 0).then_some(args.num_examples),
            validation_fraction: args.validation_fraction,
            seed: args.seed,
            length_budget: args.length_budget.map(|max_length| LengthBudget {
                max_length,
                strategy: match args.trim_strategy {
                    Strategy::Waterfall => TrimStrategy::Waterfall,
                    Strategy::RoundRobin => TrimStrategy::RoundRobin,
                },
            }),
        },
    };
    let training_config = match &args.training_config {
        Some(path) => TrainingConfig::from_file(path)?,
        None => TrainingConfig {
            epochs: args.epochs,
            batch_size: args.batch_size,
            learning_rate: args.learning_rate,
            clip_grad_norm: args.clip_grad_norm,
            checkpoint_every: args.checkpoint_every,
            resume: args.resume,
            seed: args.seed,
            ..Default::default()
        },
    };

    let corpus = corpus_path(args.corpus)?;
    let preprocessor = SentencePreprocessor::new()?;
    let pairs = load_sentence_pairs(&corpus, dataset_config.num_examples, &preprocessor)
        .with_context(|| format!("Failed to load corpus {}", corpus.display()))?;
    let dataset = TranslationDataset::from_pairs(&pairs, dataset_config.length_budget);
    let (train_split, validation_split) = dataset
        .train_validation_split(dataset_config.validation_fraction, dataset_config.seed)?;
    tracing::info!(
        "{} training pairs, {} validation pairs",
        train_split.len(),
        validation_split.len()
    );

    let mut model_config = dataset.model_config(args.embedding_dim, args.units)?;
    model_config.mask_source_padding = args.mask_padding;

    let checkpoints = CheckpointManager::new(&args.checkpoint_dir, Some(args.max_to_keep))?;
    if training_config.resume {
        let (saved_config, _, _) = checkpoints
            .load_assets()
            .context("Cannot resume: no model assets in the checkpoint directory")?;
        if saved_config != model_config {
            bail!("Cannot resume: the corpus or model flags differ from the saved model");
        }
    } else {
        checkpoints.save_assets(&model_config, &dataset.input_index, &dataset.target_index)?;
    }

    let mut trainer = Trainer::new(&model_config, training_config, device(args.cpu))?;
    let summaries = trainer.fit(&train_split, &validation_split, Some(&checkpoints))?;
    if let Some(last) = summaries.last() {
        tracing::info!(
            "Training complete after {} epochs, final loss {:.4}",
            last.epoch,
            last.train_loss
        );
    }
    Ok(())
}

fn translate(args: TranslateArgs) -> Result<()> {
    let checkpoints = CheckpointManager::new(&args.checkpoint_dir, None)?;
    let config = TranslationConfig {
        device: device(args.cpu),
        num_beams: args.num_beams,
        max_length: args.max_length,
        ..Default::default()
    };
    let translator = Translator::from_checkpoint(&checkpoints, config)?;
    if let Some(plot_dir) = &args.plot_dir {
        std::fs::create_dir_all(plot_dir)?;
    }

    for (position, sentence) in args.sentences.iter().enumerate() {
        let output = translator.evaluate(sentence)?;
        println!("Input: {}", output.sentence);
        println!("Predicted translation: {}", output.translation());

        let plot = AttentionPlot::from_output(&output);
        if args.show_attention {
            println!("{}", plot.render_text());
        }
        if let Some(plot_dir) = &args.plot_dir {
            let path = plot_dir.join(format!("attention_{position}.csv"));
            plot.save(&path)?;
            tracing::info!("Attention weights written to {}", path.display());
        }
    }
    Ok(())
}

/// User directives (`RUST_LOG`) when set and valid, the default filter otherwise.
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var("RUST_LOG").ok()))
        .init();

    match Cli::parse().command {
        Commands::Train(args) => train(args),
        Commands::Translate(args) => translate(args),
    }
}
