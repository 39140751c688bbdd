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

use crate::seq2seq::{Decoder, Encoder};
use crate::{Config, Seq2SeqError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::{nn, Tensor};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
/// # Seq2Seq model configuration
/// Defines the encoder-decoder architecture (vocabulary sizes, embedding and hidden sizes...)
/// and the special ids and maximum lengths used for decoding.
pub struct Seq2SeqConfig {
    /// Source vocabulary size, padding id included
    pub input_vocab_size: i64,
    /// Target vocabulary size, padding id included
    pub target_vocab_size: i64,
    pub embedding_dim: i64,
    /// Hidden size of the encoder and decoder GRUs
    pub units: i64,
    /// Hidden size of the attention scoring layer, defaults to `units`
    pub attention_units: Option<i64>,
    pub dropout: Option<f64>,
    /// Length source sentences are padded to
    pub max_length_input: i64,
    /// Maximum number of decoding steps
    pub max_length_target: i64,
    #[serde(default)]
    pub pad_token_id: i64,
    pub start_token_id: i64,
    pub end_token_id: i64,
    /// Prevents attention over source padding positions
    #[serde(default)]
    pub mask_source_padding: bool,
}

impl Config for Seq2SeqConfig {}

impl Default for Seq2SeqConfig {
    fn default() -> Self {
        Seq2SeqConfig {
            input_vocab_size: 9414,
            target_vocab_size: 4935,
            embedding_dim: 256,
            units: 1024,
            attention_units: None,
            dropout: None,
            max_length_input: 16,
            max_length_target: 11,
            pad_token_id: 0,
            start_token_id: 1,
            end_token_id: 2,
            mask_source_padding: false,
        }
    }
}

impl Seq2SeqConfig {
    /// Checks the sizes and special ids are consistent.
    pub fn validate(&self) -> Result<(), Seq2SeqError> {
        let positive = [
            ("input_vocab_size", self.input_vocab_size),
            ("target_vocab_size", self.target_vocab_size),
            ("embedding_dim", self.embedding_dim),
            ("units", self.units),
            ("max_length_input", self.max_length_input),
            ("max_length_target", self.max_length_target),
        ];
        for (name, value) in positive {
            if value <= 0 {
                return Err(Seq2SeqError::InvalidConfigurationError(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        for (name, id) in [
            ("start_token_id", self.start_token_id),
            ("end_token_id", self.end_token_id),
        ] {
            if id == self.pad_token_id || id < 0 || id >= self.target_vocab_size {
                return Err(Seq2SeqError::InvalidConfigurationError(format!(
                    "{name} {id} is not a valid non-padding target id"
                )));
            }
        }
        if let Some(dropout) = self.dropout {
            if !(0.0..1.0).contains(&dropout) {
                return Err(Seq2SeqError::InvalidConfigurationError(format!(
                    "dropout must be in [0, 1), got {dropout}"
                )));
            }
        }
        Ok(())
    }
}

/// # Output of a teacher-forced forward pass
pub struct Seq2SeqOutput {
    /// Logits for target positions 1..T, shape (*batch size*, *target length - 1*, *target vocab size*)
    pub logits: Tensor,
    /// Attention weights for target positions 1..T, shape (*batch size*, *target length - 1*, *source length*)
    pub attention_weights: Tensor,
}

/// # Seq2Seq translation model
/// Attentional encoder-decoder. It is made of the following blocks:
/// - `encoder`: `Encoder` (source embeddings and GRU)
/// - `decoder`: `Decoder` (target embeddings, Bahdanau attention, GRU and vocabulary projection)
pub struct Seq2SeqModel {
    encoder: Encoder,
    decoder: Decoder,
    start_token_id: i64,
    pad_token_id: i64,
    mask_source_padding: bool,
}

impl Seq2SeqModel {
    /// Build a new `Seq2SeqModel`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the model
    /// * `config` - `Seq2SeqConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use seq2seq_nmt::seq2seq::{Seq2SeqConfig, Seq2SeqModel};
    /// use tch::{nn, Device};
    ///
    /// let config = Seq2SeqConfig::default();
    /// let vs = nn::VarStore::new(Device::Cpu);
    /// let model = Seq2SeqModel::new(vs.root() / "seq2seq", &config);
    /// ```
    pub fn new<'p, P>(p: P, config: &Seq2SeqConfig) -> Seq2SeqModel
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let encoder = Encoder::new(p / "encoder", config);
        let decoder = Decoder::new(p / "decoder", config);
        Seq2SeqModel {
            encoder,
            decoder,
            start_token_id: config.start_token_id,
            pad_token_id: config.pad_token_id,
            mask_source_padding: config.mask_source_padding,
        }
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Mask of the attendable source positions, if padding masking is enabled.
    pub fn source_mask(&self, input: &Tensor) -> Option<Tensor> {
        if self.mask_source_padding {
            Some(input.ne(self.pad_token_id))
        } else {
            None
        }
    }

    /// Encodes a batch of source ids starting from a zero hidden state.
    ///
    /// # Returns
    ///
    /// * `encoder_output` - shape (*batch size*, *source length*, *units*)
    /// * `encoder_hidden` - shape (*batch size*, *units*)
    pub fn encode(&self, input: &Tensor, train: bool) -> (Tensor, Tensor) {
        let hidden = self
            .encoder
            .initialize_hidden_state(input.size()[0], input.device());
        self.encoder.forward_t(input, &hidden, train)
    }

    /// Teacher-forced forward pass: the decoder is fed the start id, then the ground truth
    /// target id of the previous position at every step.
    ///
    /// # Arguments
    ///
    /// * `input` - source ids of shape (*batch size*, *source length*)
    /// * `target` - target ids of shape (*batch size*, *target length*), starting with the
    ///   start id
    /// * `train` - boolean flag to turn on/off the dropout layers in the model
    ///
    /// # Returns
    ///
    /// * `Seq2SeqOutput` with the logits and attention weights of target positions 1..T
    pub fn forward_t(
        &self,
        input: &Tensor,
        target: &Tensor,
        train: bool,
    ) -> Result<Seq2SeqOutput, Seq2SeqError> {
        let (batch_size, target_length) = target.size2()?;
        if target_length < 2 {
            return Err(Seq2SeqError::ValueError(format!(
                "Target sequences must contain at least 2 positions, got {target_length}"
            )));
        }
        let source_mask = self.source_mask(input);
        let (encoder_output, mut hidden) = self.encode(input, train);

        let mut decoder_input = Tensor::full(
            [batch_size, 1],
            self.start_token_id,
            (tch::Kind::Int64, input.device()),
        );
        let mut all_logits = Vec::with_capacity(target_length as usize - 1);
        let mut all_attention_weights = Vec::with_capacity(target_length as usize - 1);
        for t in 1..target_length {
            let output = self.decoder.forward_t(
                &decoder_input,
                &hidden,
                &encoder_output,
                source_mask.as_ref(),
                train,
            );
            hidden = output.hidden;
            all_logits.push(output.logits);
            all_attention_weights.push(output.attention_weights.squeeze_dim(-1));
            decoder_input = target.select(1, t).unsqueeze(1);
        }

        Ok(Seq2SeqOutput {
            logits: Tensor::stack(&all_logits, 1),
            attention_weights: Tensor::stack(&all_attention_weights, 1),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::{Device, Kind};

    fn tiny_config() -> Seq2SeqConfig {
        Seq2SeqConfig {
            input_vocab_size: 12,
            target_vocab_size: 10,
            embedding_dim: 8,
            units: 16,
            attention_units: Some(6),
            dropout: Some(0.1),
            max_length_input: 5,
            max_length_target: 4,
            pad_token_id: 0,
            start_token_id: 1,
            end_token_id: 2,
            mask_source_padding: true,
        }
    }

    #[test]
    fn teacher_forced_output_shapes() -> anyhow::Result<()> {
        let config = tiny_config();
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Seq2SeqModel::new(vs.root(), &config);
        let input = Tensor::from_slice(&[1i64, 5, 6, 2, 0, 1, 7, 2, 0, 0]).view((2, 5));
        let target = Tensor::from_slice(&[1i64, 4, 5, 2, 1, 6, 2, 0]).view((2, 4));

        let output = model.forward_t(&input, &target, true)?;

        assert_eq!(output.logits.size(), vec![2, 3, 10]);
        assert_eq!(output.attention_weights.size(), vec![2, 3, 5]);
        // second example has 2 padding positions in the source
        let padded = output.attention_weights.get(1).slice(1, 3, 5, 1);
        assert_eq!(padded.abs().sum(Kind::Float).double_value(&[]), 0.0);
        Ok(())
    }

    #[test]
    fn encoder_and_decoder_step_shapes() {
        let config = tiny_config();
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Seq2SeqModel::new(vs.root(), &config);
        let input = Tensor::from_slice(&[1i64, 5, 6, 2, 0]).view((1, 5));

        let (encoder_output, hidden) = model.encode(&input, false);
        assert_eq!(encoder_output.size(), vec![1, 5, 16]);
        assert_eq!(hidden.size(), vec![1, 16]);

        let decoder_input = Tensor::from_slice(&[1i64]).view((1, 1));
        let output = model
            .decoder()
            .forward_t(&decoder_input, &hidden, &encoder_output, None, false);
        assert_eq!(output.logits.size(), vec![1, 10]);
        assert_eq!(output.hidden.size(), vec![1, 16]);
        assert_eq!(output.attention_weights.size(), vec![1, 5, 1]);
    }

    #[test]
    fn rejects_single_position_targets() {
        let config = tiny_config();
        let vs = nn::VarStore::new(Device::Cpu);
        let model = Seq2SeqModel::new(vs.root(), &config);
        let input = Tensor::from_slice(&[1i64, 2]).view((1, 2));
        let target = Tensor::from_slice(&[1i64]).view((1, 1));
        assert!(model.forward_t(&input, &target, false).is_err());
    }

    #[test]
    fn config_validation() {
        assert!(Seq2SeqConfig::default().validate().is_ok());
        let config = Seq2SeqConfig {
            start_token_id: 0,
            ..tiny_config()
        };
        assert!(config.validate().is_err());
        let config = Seq2SeqConfig {
            units: 0,
            ..tiny_config()
        };
        assert!(config.validate().is_err());
    }
}
