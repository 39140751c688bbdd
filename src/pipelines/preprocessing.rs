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

//! # Sentence normalization
//!
//! Normalizes raw sentences before they are indexed: accents are stripped, punctuation is
//! separated from words, any character outside of the latin alphabet and the `?.!,¿` punctuation
//! is replaced by a space, and the sentence is wrapped with the `<start>` and `<end>` markers
//! used by the decoder.
//!
//! ```no_run
//! # fn main() -> Result<(), seq2seq_nmt::Seq2SeqError> {
//! use seq2seq_nmt::preprocessing::SentencePreprocessor;
//! let preprocessor = SentencePreprocessor::new()?;
//! let sentence = preprocessor.preprocess("¿Todavía está en casa?");
//! assert_eq!(sentence, "<start> ¿ todavia esta en casa ? <end>");
//! # Ok(())
//! # }
//! ```

use crate::Seq2SeqError;
use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Marker prepended to every sentence, used as the first decoder input
pub const START_TOKEN: &str = "<start>";
/// Marker appended to every sentence, ends decoding when generated
pub const END_TOKEN: &str = "<end>";

const PUNCTUATION_PATTERN: &str = r"([?.!,¿])";
const SPACES_PATTERN: &str = r"[ ]+";
const DISALLOWED_PATTERN: &str = r"[^a-zA-Z?.!,¿]+";

/// Decomposes `text` (NFD) and drops the combining marks, turning `é` into `e`.
pub fn unicode_to_ascii(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// # Sentence preprocessor
/// Holds the compiled regular expressions applied to every sentence.
#[derive(Debug, Clone)]
pub struct SentencePreprocessor {
    punctuation: Regex,
    spaces: Regex,
    disallowed: Regex,
}

impl SentencePreprocessor {
    pub fn new() -> Result<SentencePreprocessor, Seq2SeqError> {
        Ok(SentencePreprocessor {
            punctuation: Regex::new(PUNCTUATION_PATTERN)?,
            spaces: Regex::new(SPACES_PATTERN)?,
            disallowed: Regex::new(DISALLOWED_PATTERN)?,
        })
    }

    /// Normalizes a sentence and wraps it with the start and end markers.
    ///
    /// # Arguments
    ///
    /// * `sentence` - raw sentence
    ///
    /// # Returns
    ///
    /// * `String` space-separated words, starting with `<start>` and ending with `<end>`
    pub fn preprocess(&self, sentence: &str) -> String {
        let body = self.normalize(sentence);
        if body.is_empty() {
            format!("{START_TOKEN} {END_TOKEN}")
        } else {
            format!("{START_TOKEN} {body} {END_TOKEN}")
        }
    }

    /// Normalizes a sentence without adding the start and end markers.
    pub fn normalize(&self, sentence: &str) -> String {
        let text = unicode_to_ascii(sentence.to_lowercase().trim());
        let text = self.punctuation.replace_all(&text, " $1 ");
        let text = self.spaces.replace_all(&text, " ");
        let text = self.disallowed.replace_all(&text, " ");
        text.trim().to_string()
    }
}

/// Splits a preprocessed sentence into its words.
pub fn split_words(sentence: &str) -> Vec<&str> {
    sentence.split(' ').filter(|word| !word.is_empty()).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn strips_accents() {
        assert_eq!(unicode_to_ascii("Mañana será él"), "Manana sera el");
        assert_eq!(unicode_to_ascii("¿qué?"), "¿que?");
    }

    #[test]
    fn preprocess_spanish_sentence() -> anyhow::Result<()> {
        let preprocessor = SentencePreprocessor::new()?;
        assert_eq!(
            preprocessor.preprocess("¿Puedo tomar prestado este libro?"),
            "<start> ¿ puedo tomar prestado este libro ? <end>"
        );
        Ok(())
    }

    #[test]
    fn preprocess_english_sentence() -> anyhow::Result<()> {
        let preprocessor = SentencePreprocessor::new()?;
        assert_eq!(
            preprocessor.preprocess("  May I borrow this book?  "),
            "<start> may i borrow this book ? <end>"
        );
        assert_eq!(
            preprocessor.preprocess("He's 25, isn't he!"),
            "<start> he s , isn t he ! <end>"
        );
        Ok(())
    }

    #[test]
    fn preprocess_edge_cases() -> anyhow::Result<()> {
        let preprocessor = SentencePreprocessor::new()?;
        assert_eq!(preprocessor.preprocess(""), "<start> <end>");
        assert_eq!(preprocessor.preprocess("1234"), "<start> <end>");
        assert_eq!(preprocessor.preprocess("?!"), "<start> ? ! <end>");
        Ok(())
    }

    #[test]
    fn split_ignores_empty_words() {
        assert_eq!(
            split_words("<start> hola  mundo <end>"),
            vec!["<start>", "hola", "mundo", "<end>"]
        );
    }
}
