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

//! # Translation pipeline
//! Translates sentences with a trained `Seq2SeqModel`, using greedy decoding or beam search.
//! The attention weights of every decoding step are returned with the translation so that the
//! alignment between source and target words can be inspected (see `attention_plot`).
//!
//! ```no_run
//! # fn main() -> Result<(), seq2seq_nmt::Seq2SeqError> {
//! use seq2seq_nmt::checkpoint::CheckpointManager;
//! use seq2seq_nmt::translation::{TranslationConfig, Translator};
//!
//! let checkpoints = CheckpointManager::new("training_checkpoints", None)?;
//! let translator = Translator::from_checkpoint(&checkpoints, TranslationConfig::default())?;
//!
//! let output = translator.evaluate("hace mucho frio aqui.")?;
//! println!("{}", output.translation());
//! # Ok(())
//! # }
//! ```
//!
//! Output: \
//! ```no_run
//!# let output =
//! "it s very cold here ."
//!# ;
//!```

use crate::models::seq2seq::{Seq2SeqConfig, Seq2SeqModel};
use crate::pipelines::checkpoint::CheckpointManager;
use crate::pipelines::preprocessing::{SentencePreprocessor, END_TOKEN};
use crate::pipelines::vocab::{pad_sequences, LanguageIndex};
use crate::Seq2SeqError;
use ordered_float::OrderedFloat;
use tch::{nn, Device, Kind, Tensor};

/// # Configuration for sentence translation
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    /// Device to place the model on (default: CUDA/GPU when available)
    pub device: Device,
    /// Number of beams for beam search (default: 1, greedy decoding)
    pub num_beams: usize,
    /// Exponential penalty on the hypothesis length for beam search (default: 1.0)
    pub length_penalty: f64,
    /// Stop beam search as soon as `num_beams` hypotheses are finished (default: false)
    pub early_stopping: bool,
    /// Maximum number of generated words (default: the model `max_length_target`)
    pub max_length: Option<i64>,
}

impl Default for TranslationConfig {
    fn default() -> TranslationConfig {
        TranslationConfig {
            device: Device::cuda_if_available(),
            num_beams: 1,
            length_penalty: 1.0,
            early_stopping: false,
            max_length: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// # Translation of a single sentence
pub struct TranslationOutput {
    /// Preprocessed input sentence, with its start and end markers
    pub sentence: String,
    /// Predicted words, ending with `<end>` if decoding finished before the maximum length
    pub words: Vec<String>,
    /// One row of attention weights over the padded source positions per predicted word
    pub attention: Vec<Vec<f32>>,
    /// Length-normalized log-probability (beam search only)
    pub score: Option<f64>,
}

impl TranslationOutput {
    /// Predicted sentence without the end marker.
    pub fn translation(&self) -> String {
        self.words
            .iter()
            .filter(|word| word.as_str() != END_TOKEN)
            .cloned()
            .collect::<Vec<String>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
struct Hypothesis {
    token_ids: Vec<i64>,
    attention: Vec<Vec<f32>>,
}

/// Finished beam search hypotheses, ranked by length-normalized score.
struct BeamHypotheses {
    length_penalty: f64,
    early_stopping: bool,
    num_beams: usize,
    beams: Vec<(f64, Hypothesis)>,
    worst_score: f64,
}

impl BeamHypotheses {
    fn new(num_beams: usize, length_penalty: f64, early_stopping: bool) -> BeamHypotheses {
        BeamHypotheses {
            length_penalty,
            early_stopping,
            num_beams,
            beams: Vec::with_capacity(num_beams + 1),
            worst_score: 1e9f64,
        }
    }

    fn len(&self) -> usize {
        self.beams.len()
    }

    fn add(&mut self, hypothesis: Hypothesis, sum_log_probabilities: f64) {
        let score =
            sum_log_probabilities / (hypothesis.token_ids.len() as f64).powf(self.length_penalty);
        if (self.len() < self.num_beams) | (score > self.worst_score) {
            self.beams.push((score, hypothesis));
            if self.len() > self.num_beams {
                if let Some((worst_score_position, _)) = self
                    .beams
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, (score, _))| OrderedFloat(*score))
                {
                    let _ = self.beams.remove(worst_score_position);
                }
            }
            self.worst_score = self
                .beams
                .iter()
                .map(|(score, _)| *score)
                .min_by_key(|score| OrderedFloat(*score))
                .unwrap_or(score);
        }
    }

    fn is_done(&self, best_sum_log_probabilities: f64, current_length: usize) -> bool {
        if self.len() < self.num_beams {
            false
        } else if self.early_stopping {
            true
        } else {
            self.worst_score
                >= best_sum_log_probabilities / (current_length as f64).powf(self.length_penalty)
        }
    }

    fn best(self) -> Option<(f64, Hypothesis)> {
        self.beams
            .into_iter()
            .max_by_key(|(score, _)| OrderedFloat(*score))
    }
}

struct ActiveBeam {
    hypothesis: Hypothesis,
    sum_log_probabilities: f64,
    hidden: Tensor,
}

/// # Translator
/// Bundles a trained model with the language indices used to train it.
pub struct Translator {
    // keeps the model variables alive
    _var_store: nn::VarStore,
    model: Seq2SeqModel,
    model_config: Seq2SeqConfig,
    input_index: LanguageIndex,
    target_index: LanguageIndex,
    preprocessor: SentencePreprocessor,
    config: TranslationConfig,
}

impl Translator {
    /// Build a new `Translator` from a model and its language indices
    ///
    /// # Arguments
    ///
    /// * `var_store` - variable store holding the model parameters
    /// * `model` - trained model
    /// * `model_config` - configuration the model was built with
    /// * `input_index` - source language index
    /// * `target_index` - target language index
    /// * `config` - `TranslationConfig` decoding options
    pub fn new(
        var_store: nn::VarStore,
        model: Seq2SeqModel,
        model_config: Seq2SeqConfig,
        input_index: LanguageIndex,
        target_index: LanguageIndex,
        config: TranslationConfig,
    ) -> Result<Translator, Seq2SeqError> {
        if config.num_beams == 0 {
            return Err(Seq2SeqError::InvalidConfigurationError(
                "num_beams must be at least 1".to_string(),
            ));
        }
        Ok(Translator {
            _var_store: var_store,
            model,
            model_config,
            input_index,
            target_index,
            preprocessor: SentencePreprocessor::new()?,
            config,
        })
    }

    /// Rebuilds the model from the assets of a checkpoint directory and restores its latest
    /// checkpoint.
    pub fn from_checkpoint(
        checkpoints: &CheckpointManager,
        config: TranslationConfig,
    ) -> Result<Translator, Seq2SeqError> {
        let (model_config, input_index, target_index) = checkpoints.load_assets()?;
        let mut var_store = nn::VarStore::new(config.device);
        let model = Seq2SeqModel::new(var_store.root(), &model_config);
        if checkpoints.restore_latest(&mut var_store)?.is_none() {
            return Err(Seq2SeqError::CheckpointError(format!(
                "No checkpoint found in {}",
                checkpoints.directory().display()
            )));
        }
        Translator::new(
            var_store,
            model,
            model_config,
            input_index,
            target_index,
            config,
        )
    }

    fn max_length(&self) -> usize {
        self.config
            .max_length
            .unwrap_or(self.model_config.max_length_target)
            .max(1) as usize
    }

    /// Preprocesses and encodes a sentence, padded to the model input length.
    fn encode_sentence(&self, sentence: &str) -> Result<(String, Tensor), Seq2SeqError> {
        let sentence = self.preprocessor.preprocess(sentence);
        let ids = self.input_index.encode_strict(&sentence)?;
        let max_length_input = self.model_config.max_length_input as usize;
        if ids.len() > max_length_input {
            return Err(Seq2SeqError::ValueError(format!(
                "Sentence has {} words, the model accepts at most {max_length_input}",
                ids.len()
            )));
        }
        let padded = pad_sequences(
            &[ids],
            Some(max_length_input),
            self.model_config.pad_token_id,
        );
        let input = Tensor::from_slice(&padded[0])
            .view((1, max_length_input as i64))
            .to_device(self.config.device);
        Ok((sentence, input))
    }

    fn id_to_word(&self, id: i64) -> String {
        self.target_index
            .id_to_word(id)
            .unwrap_or("<pad>")
            .to_string()
    }

    /// Translates a single sentence, returning the predicted words and the attention weights of
    /// every decoding step.
    pub fn evaluate(&self, sentence: &str) -> Result<TranslationOutput, Seq2SeqError> {
        let (sentence, input) = self.encode_sentence(sentence)?;
        let (words, attention, score) = tch::no_grad(|| {
            if self.config.num_beams > 1 {
                self.beam_search(&input)
            } else {
                self.greedy_search(&input)
            }
        })?;
        Ok(TranslationOutput {
            sentence,
            words,
            attention,
            score,
        })
    }

    #[allow(clippy::type_complexity)]
    fn greedy_search(
        &self,
        input: &Tensor,
    ) -> Result<(Vec<String>, Vec<Vec<f32>>, Option<f64>), Seq2SeqError> {
        let source_mask = self.model.source_mask(input);
        let (encoder_output, mut hidden) = self.model.encode(input, false);
        let mut decoder_input = Tensor::from_slice(&[self.model_config.start_token_id])
            .view((1, 1))
            .to_device(self.config.device);

        let mut words = Vec::new();
        let mut attention = Vec::new();
        for _ in 0..self.max_length() {
            let output = self.model.decoder().forward_t(
                &decoder_input,
                &hidden,
                &encoder_output,
                source_mask.as_ref(),
                false,
            );
            attention.push(Vec::<f32>::try_from(
                &output.attention_weights.view([-1]).to_kind(Kind::Float),
            )?);
            let predicted_id = output.logits.argmax(-1, false).int64_value(&[0]);
            words.push(self.id_to_word(predicted_id));
            if predicted_id == self.model_config.end_token_id {
                break;
            }
            decoder_input = Tensor::from_slice(&[predicted_id])
                .view((1, 1))
                .to_device(self.config.device);
            hidden = output.hidden;
        }
        Ok((words, attention, None))
    }

    #[allow(clippy::type_complexity)]
    fn beam_search(
        &self,
        input: &Tensor,
    ) -> Result<(Vec<String>, Vec<Vec<f32>>, Option<f64>), Seq2SeqError> {
        let num_beams = self.config.num_beams;
        let max_length = self.max_length();
        let end_token_id = self.model_config.end_token_id;
        let (encoder_output, hidden) = self.model.encode(input, false);

        let mut finished = BeamHypotheses::new(
            num_beams,
            self.config.length_penalty,
            self.config.early_stopping,
        );
        let mut beams = vec![ActiveBeam {
            hypothesis: Hypothesis {
                token_ids: vec![],
                attention: vec![],
            },
            sum_log_probabilities: 0.0,
            hidden,
        }];

        for step in 1..=max_length {
            let current_beams = beams.len() as i64;
            let previous_ids: Vec<i64> = beams
                .iter()
                .map(|beam| {
                    beam.hypothesis
                        .token_ids
                        .last()
                        .copied()
                        .unwrap_or(self.model_config.start_token_id)
                })
                .collect();
            let decoder_input = Tensor::from_slice(&previous_ids)
                .view((current_beams, 1))
                .to_device(self.config.device);
            let hidden = Tensor::cat(
                &beams.iter().map(|beam| beam.hidden.shallow_clone()).collect::<Vec<_>>(),
                0,
            );
            let beam_encoder_output = encoder_output.expand([current_beams, -1, -1], false);
            let beam_input = input.expand([current_beams, -1], false);
            let source_mask = self.model.source_mask(&beam_input);

            let output = self.model.decoder().forward_t(
                &decoder_input,
                &hidden,
                &beam_encoder_output,
                source_mask.as_ref(),
                false,
            );
            let log_probabilities = output.logits.log_softmax(-1, Kind::Float);
            let vocab_size = log_probabilities.size()[1];
            let scores = log_probabilities
                + Tensor::from_slice(
                    &beams
                        .iter()
                        .map(|beam| beam.sum_log_probabilities)
                        .collect::<Vec<f64>>(),
                )
                .to_kind(Kind::Float)
                .to_device(self.config.device)
                .unsqueeze(1);
            let num_candidates = (2 * num_beams as i64).min(current_beams * vocab_size);
            let (top_scores, top_indices) = scores.view([-1]).topk(num_candidates, -1, true, true);
            let top_scores = Vec::<f64>::try_from(&top_scores.to_kind(Kind::Double))?;
            let top_indices = Vec::<i64>::try_from(&top_indices)?;

            let mut next_beams = Vec::with_capacity(num_beams);
            for (rank, (score, index)) in top_scores.iter().zip(top_indices.iter()).enumerate() {
                let beam_index = index / vocab_size;
                let token_id = index % vocab_size;
                let beam = &beams[beam_index as usize];
                let mut hypothesis = beam.hypothesis.clone();
                hypothesis.token_ids.push(token_id);
                hypothesis.attention.push(Vec::<f32>::try_from(
                    &output
                        .attention_weights
                        .get(beam_index)
                        .view([-1])
                        .to_kind(Kind::Float),
                )?);
                if token_id == end_token_id {
                    if rank < num_beams {
                        finished.add(hypothesis, *score);
                    }
                } else {
                    next_beams.push(ActiveBeam {
                        hypothesis,
                        sum_log_probabilities: *score,
                        hidden: output.hidden.get(beam_index).unsqueeze(0),
                    });
                }
                if next_beams.len() == num_beams {
                    break;
                }
            }

            let best_active_score = next_beams
                .iter()
                .map(|beam| beam.sum_log_probabilities)
                .max_by_key(|score| OrderedFloat(*score));
            beams = next_beams;
            match best_active_score {
                Some(best) if !finished.is_done(best, step) => {}
                _ => break,
            }
        }

        for beam in beams {
            finished.add(beam.hypothesis, beam.sum_log_probabilities);
        }
        let (score, hypothesis) = finished.best().ok_or_else(|| {
            Seq2SeqError::ValueError("Beam search produced no hypothesis".to_string())
        })?;
        let words = hypothesis
            .token_ids
            .iter()
            .map(|id| self.id_to_word(*id))
            .collect();
        Ok((words, hypothesis.attention, Some(score)))
    }

    /// Translates sentences and logs each input with its prediction.
    pub fn translate<S: AsRef<str>>(&self, sentences: &[S]) -> Result<Vec<String>, Seq2SeqError> {
        sentences
            .iter()
            .map(|sentence| {
                let output = self.evaluate(sentence.as_ref())?;
                let translation = output.translation();
                tracing::info!("Input: {}", output.sentence);
                tracing::info!("Predicted translation: {}", translation);
                Ok(translation)
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hypothesis(length: usize) -> Hypothesis {
        Hypothesis {
            token_ids: vec![3; length],
            attention: vec![],
        }
    }

    #[test]
    fn beam_hypotheses_keep_the_best() {
        let mut hypotheses = BeamHypotheses::new(2, 1.0, false);
        hypotheses.add(hypothesis(2), -4.0);
        hypotheses.add(hypothesis(2), -1.0);
        hypotheses.add(hypothesis(4), -2.4);
        assert_eq!(hypotheses.len(), 2);
        assert_eq!(hypotheses.worst_score, -0.6);
        // a running beam at -3.0 over 4 words cannot beat -0.6 anymore
        assert!(hypotheses.is_done(-3.0, 4));
        assert!(!hypotheses.is_done(-1.0, 4));
        let (score, best) = hypotheses.best().unwrap();
        assert_eq!(score, -0.5);
        assert_eq!(best.token_ids.len(), 2);
    }

    #[test]
    fn early_stopping_ends_when_full() {
        let mut hypotheses = BeamHypotheses::new(1, 1.0, true);
        assert!(!hypotheses.is_done(0.0, 1));
        hypotheses.add(hypothesis(3), -6.0);
        assert!(hypotheses.is_done(0.0, 1));
    }

    #[test]
    fn translation_drops_end_marker() {
        let output = TranslationOutput {
            sentence: "<start> hola <end>".to_string(),
            words: vec!["hello".to_string(), ".".to_string(), "<end>".to_string()],
            attention: vec![],
            score: None,
        };
        assert_eq!(output.translation(), "hello .");
    }
}
