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

//! # Word-level language index
//!
//! Maps the words of one language to integer ids. Ids are assigned by decreasing word frequency
//! (ties keep the order of first appearance) starting at 1, id 0 being reserved for padding.

use crate::pipelines::preprocessing::split_words;
use crate::Seq2SeqError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Id used to pad sequences to a common length
pub const PAD_ID: i64 = 0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// # Language index
/// Bidirectional mapping between words and ids for one language.
pub struct LanguageIndex {
    /// Words ordered by id, `index_word[0]` being the word with id 1
    index_word: Vec<String>,
    #[serde(skip)]
    word_index: HashMap<String, i64>,
}

impl LanguageIndex {
    /// Builds an index from preprocessed, space-separated sentences.
    ///
    /// # Example
    ///
    /// ```
    /// use seq2seq_nmt::vocab::LanguageIndex;
    /// let index = LanguageIndex::fit_on_texts(&["<start> hola hola <end>", "<start> adios <end>"]);
    /// assert_eq!(index.word_to_id("<start>"), Some(1));
    /// assert_eq!(index.word_to_id("hola"), Some(2));
    /// assert_eq!(index.vocab_size(), 5);
    /// ```
    pub fn fit_on_texts<S: AsRef<str>>(texts: &[S]) -> LanguageIndex {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        let mut order = 0;
        for text in texts {
            for word in split_words(text.as_ref()) {
                let entry = counts.entry(word).or_insert_with(|| {
                    order += 1;
                    (0, order)
                });
                entry.0 += 1;
            }
        }
        let mut words: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
        words.sort_by(|(_, (count_a, order_a)), (_, (count_b, order_b))| {
            count_b.cmp(count_a).then(order_a.cmp(order_b))
        });
        LanguageIndex::from_words(words.into_iter().map(|(word, _)| word.to_string()).collect())
    }

    /// Builds an index from an ordered list of words, the first word getting id 1.
    pub fn from_words(index_word: Vec<String>) -> LanguageIndex {
        let word_index = index_word
            .iter()
            .enumerate()
            .map(|(position, word)| (word.clone(), position as i64 + 1))
            .collect();
        LanguageIndex {
            index_word,
            word_index,
        }
    }

    /// Number of ids, including the padding id.
    pub fn vocab_size(&self) -> i64 {
        self.index_word.len() as i64 + 1
    }

    pub fn word_to_id(&self, word: &str) -> Option<i64> {
        self.word_index.get(word).copied()
    }

    pub fn id_to_word(&self, id: i64) -> Option<&str> {
        if id <= PAD_ID {
            return None;
        }
        self.index_word.get(id as usize - 1).map(String::as_str)
    }

    /// Encodes sentences, skipping the words absent from the index.
    pub fn texts_to_sequences<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Vec<i64>> {
        texts
            .iter()
            .map(|text| {
                split_words(text.as_ref())
                    .into_iter()
                    .filter_map(|word| self.word_to_id(word))
                    .collect()
            })
            .collect()
    }

    /// Encodes a sentence, failing on the first word absent from the index.
    pub fn encode_strict(&self, text: &str) -> Result<Vec<i64>, Seq2SeqError> {
        split_words(text)
            .into_iter()
            .map(|word| {
                self.word_to_id(word).ok_or_else(|| {
                    Seq2SeqError::VocabularyError(format!("Unknown word: {word}"))
                })
            })
            .collect()
    }

    /// Decodes id sequences, skipping padding and unknown ids.
    pub fn sequences_to_texts(&self, sequences: &[Vec<i64>]) -> Vec<String> {
        sequences
            .iter()
            .map(|sequence| {
                sequence
                    .iter()
                    .filter_map(|id| self.id_to_word(*id))
                    .collect::<Vec<&str>>()
                    .join(" ")
            })
            .collect()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Seq2SeqError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<LanguageIndex, Seq2SeqError> {
        let reader = BufReader::new(File::open(path)?);
        let stored: LanguageIndex = serde_json::from_reader(reader)?;
        Ok(LanguageIndex::from_words(stored.index_word))
    }
}

/// Pads (or truncates) sequences at the end so that they all have the same length.
///
/// # Arguments
///
/// * `sequences` - id sequences
/// * `max_length` - target length, defaults to the length of the longest sequence
/// * `value` - padding id
pub fn pad_sequences(sequences: &[Vec<i64>], max_length: Option<usize>, value: i64) -> Vec<Vec<i64>> {
    let max_length = max_length
        .unwrap_or_else(|| sequences.iter().map(Vec::len).max().unwrap_or(0));
    sequences
        .iter()
        .map(|sequence| {
            let mut padded: Vec<i64> = sequence.iter().take(max_length).copied().collect();
            padded.resize(max_length, value);
            padded
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    fn corpus() -> Vec<&'static str> {
        vec![
            "<start> el gato duerme . <end>",
            "<start> el perro come . <end>",
            "<start> el gato come <end>",
        ]
    }

    #[test]
    fn ids_follow_frequency_then_first_appearance() {
        let index = LanguageIndex::fit_on_texts(&corpus());
        // <start>, el and <end> appear 3 times, in that order of appearance
        assert_eq!(index.word_to_id("<start>"), Some(1));
        assert_eq!(index.word_to_id("el"), Some(2));
        assert_eq!(index.word_to_id("<end>"), Some(3));
        assert_eq!(index.word_to_id("gato"), Some(4));
        assert_eq!(index.word_to_id("."), Some(5));
        assert_eq!(index.word_to_id("come"), Some(6));
        assert_eq!(index.word_to_id("duerme"), Some(7));
        assert_eq!(index.word_to_id("perro"), Some(8));
        assert_eq!(index.vocab_size(), 9);
        assert_eq!(index.id_to_word(PAD_ID), None);
        assert_eq!(index.id_to_word(4), Some("gato"));
        assert_eq!(index.id_to_word(9), None);
    }

    #[test]
    fn unknown_words_are_skipped_or_rejected() {
        let index = LanguageIndex::fit_on_texts(&corpus());
        let sequences = index.texts_to_sequences(&["<start> el raton come <end>"]);
        assert_eq!(sequences, vec![vec![1, 2, 6, 3]]);

        let error = index.encode_strict("<start> el raton come <end>").unwrap_err();
        assert!(error.to_string().contains("raton"));
    }

    #[test]
    fn sequences_round_trip_without_padding() {
        let index = LanguageIndex::fit_on_texts(&corpus());
        let texts = index.sequences_to_texts(&[vec![1, 2, 4, 7, 0, 0]]);
        assert_eq!(texts, vec!["<start> el gato duerme".to_string()]);
    }

    #[test]
    fn post_padding_and_truncation() {
        let sequences = vec![vec![1, 2, 3], vec![4], vec![]];
        assert_eq!(
            pad_sequences(&sequences, None, PAD_ID),
            vec![vec![1, 2, 3], vec![4, 0, 0], vec![0, 0, 0]]
        );
        assert_eq!(
            pad_sequences(&sequences, Some(2), PAD_ID),
            vec![vec![1, 2], vec![4, 0], vec![0, 0]]
        );
    }

    #[test]
    fn save_and_load() -> anyhow::Result<()> {
        let index = LanguageIndex::fit_on_texts(&corpus());
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("index.json");
        index.save(&path)?;
        let loaded = LanguageIndex::load(&path)?;
        assert_eq!(loaded, index);
        assert_eq!(loaded.word_to_id("perro"), Some(8));
        Ok(())
    }
}
