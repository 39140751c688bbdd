//! Sequence-to-sequence neural machine translation with attention, built on `tch-rs`
//! (Rust bindings to libtorch).
//!
//! This crate trains and runs an RNN encoder-decoder with Bahdanau (additive) attention on a
//! parallel corpus. It covers the full workflow:
//! - sentence normalization, word-level indexing, padding and batching
//! - a GRU encoder and an attentional GRU decoder built from `tch` embedding, recurrent and
//!   linear layers
//! - a teacher-forced training loop using libtorch automatic differentiation and Adam
//! - checkpointing of the model parameters with `VarStore`
//! - greedy and beam search translation, returning the attention weights of every step
//! - attention plots (CSV export and text heat maps)
//!
//! # Quick Start
//!
//! The reference corpus (Spanish to English sentence pairs from the Tatoeba project) can be
//! downloaded with the `remote` feature. Training on a GPU is strongly recommended for the
//! default configuration (1024 GRU units).
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use seq2seq_nmt::checkpoint::CheckpointManager;
//! use seq2seq_nmt::dataset::{load_sentence_pairs, DatasetConfig, DatasetResources, TranslationDataset};
//! use seq2seq_nmt::preprocessing::SentencePreprocessor;
//! use seq2seq_nmt::resources::{RemoteResource, ResourceProvider};
//! use seq2seq_nmt::training::{Trainer, TrainingConfig};
//! use seq2seq_nmt::translation::{TranslationConfig, Translator};
//! use tch::Device;
//!
//! let corpus = RemoteResource::from_archive(DatasetResources::SPA_ENG).get_local_path()?;
//! let dataset_config = DatasetConfig::default();
//! let pairs = load_sentence_pairs(corpus, dataset_config.num_examples, &SentencePreprocessor::new()?)?;
//! let dataset = TranslationDataset::from_pairs(&pairs, dataset_config.length_budget);
//! let (train, validation) =
//!     dataset.train_validation_split(dataset_config.validation_fraction, dataset_config.seed)?;
//!
//! let model_config = dataset.model_config(256, 1024)?;
//! let checkpoints = CheckpointManager::new("training_checkpoints", Some(5))?;
//! checkpoints.save_assets(&model_config, &dataset.input_index, &dataset.target_index)?;
//! let mut trainer = Trainer::new(&model_config, TrainingConfig::default(), Device::cuda_if_available())?;
//! trainer.fit(&train, &validation, Some(&checkpoints))?;
//!
//! let translator = Translator::from_checkpoint(&checkpoints, TranslationConfig::default())?;
//! let output = translator.translate(&["hace mucho frio aqui."])?;
//! # Ok(())
//! # }
//! ```

mod common;
mod models;
pub mod pipelines;

pub use common::error::Seq2SeqError;
pub use common::resources;
pub use common::Config;
pub use models::seq2seq;
pub use pipelines::{
    attention_plot, checkpoint, dataset, preprocessing, training, translation, trimmer, vocab,
};
