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

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Seq2SeqError {
    #[cfg(feature = "remote")]
    #[error("Endpoint not available error: {0}")]
    FileDownloadError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Value error: {0}")]
    ValueError(String),

    #[error("Vocabulary error: {0}")]
    VocabularyError(String),

    #[error("Dataset error: {0}")]
    DatasetError(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

#[cfg(feature = "remote")]
impl From<cached_path::Error> for Seq2SeqError {
    fn from(error: cached_path::Error) -> Self {
        Seq2SeqError::FileDownloadError(error.to_string())
    }
}

impl From<std::io::Error> for Seq2SeqError {
    fn from(error: std::io::Error) -> Self {
        Seq2SeqError::IOError(error.to_string())
    }
}

impl From<tch::TchError> for Seq2SeqError {
    fn from(error: tch::TchError) -> Self {
        Seq2SeqError::TchError(error.to_string())
    }
}

impl From<serde_json::Error> for Seq2SeqError {
    fn from(error: serde_json::Error) -> Self {
        Seq2SeqError::SerializationError(error.to_string())
    }
}

impl From<csv::Error> for Seq2SeqError {
    fn from(error: csv::Error) -> Self {
        Seq2SeqError::DatasetError(error.to_string())
    }
}

impl From<regex::Error> for Seq2SeqError {
    fn from(error: regex::Error) -> Self {
        Seq2SeqError::InvalidConfigurationError(error.to_string())
    }
}
