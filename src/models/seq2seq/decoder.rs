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

use crate::common::dropout::Dropout;
use crate::seq2seq::{BahdanauAttention, Seq2SeqConfig};
use std::borrow::Borrow;
use tch::nn::{GRUState, RNN};
use tch::{nn, Tensor};

/// # Output of a single decoding step
pub struct DecoderOutput {
    /// Unnormalized scores over the target vocabulary, shape (*batch size*, *target vocab size*)
    pub logits: Tensor,
    /// Updated hidden state, shape (*batch size*, *units*)
    pub hidden: Tensor,
    /// Attention over the source positions, shape (*batch size*, *source length*, 1)
    pub attention_weights: Tensor,
}

#[derive(Debug)]
/// # Attentional recurrent decoder
/// Decodes one target position per call: the previous hidden state attends over the encoder
/// outputs, the resulting context vector is concatenated with the embedding of the current
/// input id and fed to a single GRU step initialized with the previous hidden state.
pub struct Decoder {
    embedding: nn::Embedding,
    dropout: Dropout,
    gru: nn::GRU,
    fc: nn::Linear,
    attention: BahdanauAttention,
}

impl Decoder {
    /// Build a new `Decoder`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the decoder
    /// * `config` - `Seq2SeqConfig` object defining the model architecture
    pub fn new<'p, P>(p: P, config: &Seq2SeqConfig) -> Decoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let embedding = nn::embedding(
            p / "embedding",
            config.target_vocab_size,
            config.embedding_dim,
            Default::default(),
        );
        let dropout = Dropout::new(config.dropout.unwrap_or(0.0));
        let gru_config = nn::RNNConfig {
            batch_first: true,
            ..Default::default()
        };
        let gru = nn::gru(
            p / "gru",
            config.embedding_dim + config.units,
            config.units,
            gru_config,
        );
        let fc = nn::linear(
            p / "fc",
            config.units,
            config.target_vocab_size,
            Default::default(),
        );
        let attention = BahdanauAttention::new(
            p / "attention",
            config.units,
            config.units,
            config.attention_units.unwrap_or(config.units),
        );
        Decoder {
            embedding,
            dropout,
            gru,
            fc,
            attention,
        }
    }

    /// Forward pass through the decoder for one target position
    ///
    /// # Arguments
    ///
    /// * `input` - current target ids of shape (*batch size*, 1)
    /// * `hidden` - previous hidden state of shape (*batch size*, *units*)
    /// * `encoder_output` - encoder outputs of shape (*batch size*, *source length*, *units*)
    /// * `source_mask` - optional mask of the source positions that can be attended
    /// * `train` - boolean flag to turn on/off the dropout layers in the model
    ///
    /// # Returns
    ///
    /// * `DecoderOutput` containing the logits, the new hidden state and the attention weights
    pub fn forward_t(
        &self,
        input: &Tensor,
        hidden: &Tensor,
        encoder_output: &Tensor,
        source_mask: Option<&Tensor>,
        train: bool,
    ) -> DecoderOutput {
        let (context_vector, attention_weights) =
            self.attention.forward(hidden, encoder_output, source_mask);

        let embedded = input.apply(&self.embedding).apply_t(&self.dropout, train);
        let gru_input = Tensor::cat(&[context_vector.unsqueeze(1), embedded], -1);
        let (output, GRUState(state)) = self.gru.seq_init(&gru_input, &GRUState(hidden.unsqueeze(0)));

        let output_size = output.size();
        let logits = output
            .reshape([-1, output_size[output_size.len() - 1]])
            .apply(&self.fc);

        DecoderOutput {
            logits,
            hidden: state.squeeze_dim(0),
            attention_weights,
        }
    }
}
