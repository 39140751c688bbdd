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

//! # Parallel corpus loading and batching
//!
//! Reads a tab-separated parallel corpus (one `target<TAB>source[<TAB>attribution]` pair per
//! line, the format of the Tatoeba/ManyThings exports), normalizes both sides, indexes each
//! language and produces padded `i64` tensor batches.
//!
//! ```no_run
//! # fn main() -> Result<(), seq2seq_nmt::Seq2SeqError> {
//! use seq2seq_nmt::dataset::{load_sentence_pairs, DatasetConfig, TranslationDataset};
//! use seq2seq_nmt::preprocessing::SentencePreprocessor;
//! use tch::Device;
//!
//! let config = DatasetConfig::default();
//! let preprocessor = SentencePreprocessor::new()?;
//! let pairs = load_sentence_pairs("spa-eng/spa.txt", config.num_examples, &preprocessor)?;
//! let dataset = TranslationDataset::from_pairs(&pairs, config.length_budget);
//! let (train, validation) = dataset.train_validation_split(config.validation_fraction, config.seed)?;
//! for batch in train.batches(64, Some(config.seed), Device::Cpu) {
//!     println!("{:?} {:?}", batch.input.size(), batch.target.size());
//! }
//! # Ok(())
//! # }
//! ```

use crate::common::Config;
use crate::models::seq2seq::Seq2SeqConfig;
use crate::pipelines::preprocessing::{split_words, SentencePreprocessor, END_TOKEN, START_TOKEN};
use crate::pipelines::trimmer::{LengthBudget, Trimmer};
use crate::pipelines::vocab::{pad_sequences, LanguageIndex, PAD_ID};
use crate::Seq2SeqError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tch::{Device, Tensor};

/// # Reference corpora
pub struct DatasetResources;

impl DatasetResources {
    /// Spanish-English sentence pairs from the Tatoeba project, packaged by ManyThings.org.
    /// Tuple of (cache subdirectory, archive URL, corpus file inside the archive).
    pub const SPA_ENG: (&'static str, &'static str, &'static str) = (
        "spa-eng",
        "http://storage.googleapis.com/download.tensorflow.org/data/spa-eng.zip",
        "spa-eng/spa.txt",
    );
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// # Dataset configuration
pub struct DatasetConfig {
    /// Number of lines read from the corpus, all lines if `None`
    pub num_examples: Option<usize>,
    /// Fraction of the pairs held out for validation
    pub validation_fraction: f64,
    /// Seed for the train/validation split
    pub seed: u64,
    /// Optional joint budget on the number of words of each pair (markers excluded)
    pub length_budget: Option<LengthBudget>,
}

impl Config for DatasetConfig {}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            num_examples: Some(30000),
            validation_fraction: 0.2,
            seed: 42,
            length_budget: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// # Preprocessed sentence pair
pub struct SentencePair {
    pub source: String,
    pub target: String,
}

/// Reads and preprocesses sentence pairs from a tab-separated corpus file.
///
/// The first column holds the target sentence and the second column the source sentence.
/// Additional columns are ignored. Lines with less than two columns or with invalid UTF-8 are skipped
/// with a warning.
///
/// # Arguments
///
/// * `path` - corpus file
/// * `num_examples` - maximum number of lines to read
/// * `preprocessor` - sentence normalizer applied to both sides
pub fn load_sentence_pairs<P: AsRef<Path>>(
    path: P,
    num_examples: Option<usize>,
    preprocessor: &SentencePreprocessor,
) -> Result<Vec<SentencePair>, Seq2SeqError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_path(path.as_ref())?;

    let mut pairs = Vec::new();
    for (line, record) in reader
        .byte_records()
        .take(num_examples.unwrap_or(usize::MAX))
        .enumerate()
    {
        let record = record?;
        let field = |position: usize| record.get(position).map(std::str::from_utf8);
        match (field(0), field(1)) {
            (Some(Ok(target)), Some(Ok(source))) => pairs.push(SentencePair {
                source: preprocessor.preprocess(source),
                target: preprocessor.preprocess(target),
            }),
            (Some(Err(_)), _) | (_, Some(Err(_))) => {
                tracing::warn!("Skipping line {}: invalid UTF-8", line + 1)
            }
            _ => tracing::warn!("Skipping line {}: expected at least 2 columns", line + 1),
        }
    }
    if pairs.is_empty() {
        return Err(Seq2SeqError::DatasetError(format!(
            "No sentence pair found in {}",
            path.as_ref().display()
        )));
    }
    tracing::info!("Loaded {} sentence pairs", pairs.len());
    Ok(pairs)
}

fn apply_length_budget(pair: &SentencePair, budget: &LengthBudget) -> SentencePair {
    let strip_markers = |sentence: &str| -> Vec<String> {
        split_words(sentence)
            .into_iter()
            .filter(|word| *word != START_TOKEN && *word != END_TOKEN)
            .map(str::to_string)
            .collect()
    };
    let segments = vec![strip_markers(&pair.source), strip_markers(&pair.target)];
    let mut trimmed = budget.trim(&segments).into_iter().map(|words| {
        let mut sentence = vec![START_TOKEN.to_string()];
        sentence.extend(words);
        sentence.push(END_TOKEN.to_string());
        sentence.join(" ")
    });
    SentencePair {
        source: trimmed.next().unwrap_or_default(),
        target: trimmed.next().unwrap_or_default(),
    }
}

#[derive(Debug, Clone)]
/// # Indexed and padded parallel corpus
pub struct TranslationDataset {
    pub input_index: LanguageIndex,
    pub target_index: LanguageIndex,
    input_sequences: Vec<Vec<i64>>,
    target_sequences: Vec<Vec<i64>>,
    pub max_length_input: usize,
    pub max_length_target: usize,
}

impl TranslationDataset {
    /// Indexes both languages and pads every sequence to its language's maximum length.
    pub fn from_pairs(pairs: &[SentencePair], length_budget: Option<LengthBudget>) -> TranslationDataset {
        let pairs: Vec<SentencePair> = match &length_budget {
            Some(budget) => pairs.iter().map(|pair| apply_length_budget(pair, budget)).collect(),
            None => pairs.to_vec(),
        };
        let sources: Vec<&str> = pairs.iter().map(|pair| pair.source.as_str()).collect();
        let targets: Vec<&str> = pairs.iter().map(|pair| pair.target.as_str()).collect();

        let input_index = LanguageIndex::fit_on_texts(&sources);
        let target_index = LanguageIndex::fit_on_texts(&targets);

        let input_sequences = pad_sequences(&input_index.texts_to_sequences(&sources), None, PAD_ID);
        let target_sequences =
            pad_sequences(&target_index.texts_to_sequences(&targets), None, PAD_ID);
        let max_length_input = input_sequences.first().map_or(0, Vec::len);
        let max_length_target = target_sequences.first().map_or(0, Vec::len);

        tracing::debug!(
            "Input vocabulary: {} ids, target vocabulary: {} ids, max lengths: {}/{}",
            input_index.vocab_size(),
            target_index.vocab_size(),
            max_length_input,
            max_length_target
        );

        TranslationDataset {
            input_index,
            target_index,
            input_sequences,
            target_sequences,
            max_length_input,
            max_length_target,
        }
    }

    pub fn len(&self) -> usize {
        self.input_sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_sequences.is_empty()
    }

    /// Model configuration matching the vocabularies and lengths of this dataset.
    ///
    /// # Arguments
    ///
    /// * `embedding_dim` - size of the word embeddings
    /// * `units` - hidden size of the encoder and decoder
    pub fn model_config(&self, embedding_dim: i64, units: i64) -> Result<Seq2SeqConfig, Seq2SeqError> {
        let special_id = |token: &str| {
            self.target_index.word_to_id(token).ok_or_else(|| {
                Seq2SeqError::VocabularyError(format!("{token} missing from the target vocabulary"))
            })
        };
        let config = Seq2SeqConfig {
            input_vocab_size: self.input_index.vocab_size(),
            target_vocab_size: self.target_index.vocab_size(),
            embedding_dim,
            units,
            max_length_input: self.max_length_input as i64,
            max_length_target: self.max_length_target as i64,
            pad_token_id: PAD_ID,
            start_token_id: special_id(START_TOKEN)?,
            end_token_id: special_id(END_TOKEN)?,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// All the examples as a single split.
    pub fn as_split(&self) -> DatasetSplit {
        DatasetSplit {
            input: self.input_sequences.clone(),
            target: self.target_sequences.clone(),
        }
    }

    /// Shuffles the examples with a seeded generator and holds out `validation_fraction` of
    /// them for validation.
    pub fn train_validation_split(
        &self,
        validation_fraction: f64,
        seed: u64,
    ) -> Result<(DatasetSplit, DatasetSplit), Seq2SeqError> {
        if !(0.0..1.0).contains(&validation_fraction) {
            return Err(Seq2SeqError::InvalidConfigurationError(format!(
                "Validation fraction must be in [0, 1), got {validation_fraction}"
            )));
        }
        let mut positions: Vec<usize> = (0..self.len()).collect();
        positions.shuffle(&mut StdRng::seed_from_u64(seed));

        let validation_size = (self.len() as f64 * validation_fraction).round() as usize;
        let (validation_positions, train_positions) = positions.split_at(validation_size);
        let select = |positions: &[usize]| DatasetSplit {
            input: positions
                .iter()
                .map(|position| self.input_sequences[*position].clone())
                .collect(),
            target: positions
                .iter()
                .map(|position| self.target_sequences[*position].clone())
                .collect(),
        };
        Ok((select(train_positions), select(validation_positions)))
    }
}

#[derive(Debug, Clone, Default)]
/// # Subset of a `TranslationDataset`
pub struct DatasetSplit {
    input: Vec<Vec<i64>>,
    target: Vec<Vec<i64>>,
}

impl DatasetSplit {
    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    /// Number of full batches, the last incomplete batch being dropped.
    pub fn steps_per_epoch(&self, batch_size: usize) -> usize {
        if batch_size == 0 {
            0
        } else {
            self.len() / batch_size
        }
    }

    /// Iterates over full batches, shuffled if a seed is given.
    pub fn batches(&self, batch_size: usize, shuffle: Option<u64>, device: Device) -> BatchIterator<'_> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(seed) = shuffle {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        BatchIterator {
            split: self,
            order,
            batch_size,
            position: 0,
            device,
        }
    }
}

#[derive(Debug)]
/// # Batch of padded sequences
pub struct Batch {
    /// Source ids, shape `[batch, max_length_input]`
    pub input: Tensor,
    /// Target ids, shape `[batch, max_length_target]`
    pub target: Tensor,
}

pub struct BatchIterator<'a> {
    split: &'a DatasetSplit,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
    device: Device,
}

fn stack_sequences(sequences: &[Vec<i64>], positions: &[usize], device: Device) -> Tensor {
    let length = positions
        .first()
        .map_or(0, |position| sequences[*position].len()) as i64;
    let flat: Vec<i64> = positions
        .iter()
        .flat_map(|position| sequences[*position].iter().copied())
        .collect();
    Tensor::from_slice(&flat)
        .view((positions.len() as i64, length))
        .to_device(device)
}

impl<'a> Iterator for BatchIterator<'a> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.batch_size == 0 || self.position + self.batch_size > self.order.len() {
            return None;
        }
        let positions = &self.order[self.position..self.position + self.batch_size];
        self.position += self.batch_size;
        Some(Batch {
            input: stack_sequences(&self.split.input, positions, self.device),
            target: stack_sequences(&self.split.target, positions, self.device),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pipelines::trimmer::TrimStrategy;
    use std::io::Write;

    const CORPUS: &str = "Go.\tVe.\tCC-BY 2.0 (France) Attribution: tatoeba.org\n\
                          Hi.\tHola.\n\
                          Run!\t¡Corre!\n\
                          malformed line\n\
                          I'm tired.\tEstoy cansado.\n";

    fn write_corpus() -> anyhow::Result<tempfile::NamedTempFile> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(CORPUS.as_bytes())?;
        Ok(file)
    }

    #[test]
    fn loads_and_preprocesses_pairs() -> anyhow::Result<()> {
        let file = write_corpus()?;
        let preprocessor = SentencePreprocessor::new()?;
        let pairs = load_sentence_pairs(file.path(), None, &preprocessor)?;
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0].source, "<start> ve . <end>");
        assert_eq!(pairs[0].target, "<start> go . <end>");
        assert_eq!(pairs[2].source, "<start> corre ! <end>");
        assert_eq!(pairs[3].target, "<start> i m tired . <end>");

        let limited = load_sentence_pairs(file.path(), Some(2), &preprocessor)?;
        assert_eq!(limited.len(), 2);
        Ok(())
    }

    #[test]
    fn dataset_config_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(
            br#"{"num_examples": null, "validation_fraction": 0.1, "seed": 7,
                "length_budget": {"max_length": 20, "strategy": "RoundRobin"}}"#,
        )?;
        let config = DatasetConfig::from_file(file.path())?;
        assert_eq!(config.num_examples, None);
        assert_eq!(config.seed, 7);
        assert_eq!(
            config.length_budget,
            Some(LengthBudget {
                max_length: 20,
                strategy: TrimStrategy::RoundRobin,
            })
        );
        Ok(())
    }

    #[test]
    fn skips_lines_with_invalid_utf8() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(b"Go.\tVe.\nBad\xff.\tMal\xfe.\nHi.\tHola.\n")?;
        let preprocessor = SentencePreprocessor::new()?;
        let pairs = load_sentence_pairs(file.path(), None, &preprocessor)?;
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].target, "<start> go . <end>");
        assert_eq!(pairs[1].source, "<start> hola . <end>");
        Ok(())
    }

    #[test]
    fn pads_to_longest_sentence() -> anyhow::Result<()> {
        let file = write_corpus()?;
        let preprocessor = SentencePreprocessor::new()?;
        let pairs = load_sentence_pairs(file.path(), None, &preprocessor)?;
        let dataset = TranslationDataset::from_pairs(&pairs, None);
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.max_length_input, 5);
        assert_eq!(dataset.max_length_target, 6);
        let split = dataset.as_split();
        assert_eq!(split.input[1].len(), 5);
        assert_ne!(split.input[1][3], PAD_ID);
        assert_eq!(split.input[1][4], PAD_ID);
        Ok(())
    }

    #[test]
    fn length_budget_trims_pairs() {
        let pairs = vec![SentencePair {
            source: "<start> a b c d <end>".to_string(),
            target: "<start> e f g h <end>".to_string(),
        }];
        let budget = LengthBudget {
            max_length: 4,
            strategy: TrimStrategy::RoundRobin,
        };
        let dataset = TranslationDataset::from_pairs(&pairs, Some(budget));
        assert_eq!(dataset.max_length_input, 4);
        assert_eq!(dataset.max_length_target, 4);
        let texts = dataset.target_index.sequences_to_texts(&dataset.as_split().target);
        assert_eq!(texts, vec!["<start> e f <end>".to_string()]);
    }

    #[test]
    fn split_and_batches_drop_remainder() -> anyhow::Result<()> {
        let pairs: Vec<SentencePair> = (0..10)
            .map(|i| SentencePair {
                source: format!("<start> s{i} <end>"),
                target: format!("<start> t{i} t{i} <end>"),
            })
            .collect();
        let dataset = TranslationDataset::from_pairs(&pairs, None);
        let (train, validation) = dataset.train_validation_split(0.2, 42)?;
        assert_eq!(train.len(), 8);
        assert_eq!(validation.len(), 2);
        assert_eq!(train.steps_per_epoch(3), 2);

        let batches: Vec<Batch> = train.batches(3, Some(7), Device::Cpu).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].input.size(), vec![3, 3]);
        assert_eq!(batches[0].target.size(), vec![3, 4]);

        let (again, _) = dataset.train_validation_split(0.2, 42)?;
        assert_eq!(again.input, train.input);
        assert!(dataset.train_validation_split(1.0, 42).is_err());

        let config = dataset.model_config(4, 8)?;
        assert_eq!(config.input_vocab_size, 13);
        assert_eq!(config.target_vocab_size, 13);
        assert_eq!(config.start_token_id, 1);
        assert_eq!(config.max_length_target, 4);
        Ok(())
    }
}
