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
use crate::seq2seq::Seq2SeqConfig;
use std::borrow::Borrow;
use tch::nn::{GRUState, RNN};
use tch::{nn, Device, Kind, Tensor};

#[derive(Debug)]
/// # Recurrent encoder
/// Embeds the source ids and runs a GRU over the sequence.
pub struct Encoder {
    embedding: nn::Embedding,
    dropout: Dropout,
    gru: nn::GRU,
    units: i64,
}

impl Encoder {
    /// Build a new `Encoder`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the encoder
    /// * `config` - `Seq2SeqConfig` object defining the model architecture
    pub fn new<'p, P>(p: P, config: &Seq2SeqConfig) -> Encoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let embedding = nn::embedding(
            p / "embedding",
            config.input_vocab_size,
            config.embedding_dim,
            Default::default(),
        );
        let dropout = Dropout::new(config.dropout.unwrap_or(0.0));
        let gru_config = nn::RNNConfig {
            batch_first: true,
            ..Default::default()
        };
        let gru = nn::gru(p / "gru", config.embedding_dim, config.units, gru_config);
        Encoder {
            embedding,
            dropout,
            gru,
            units: config.units,
        }
    }

    /// Forward pass through the encoder
    ///
    /// # Arguments
    ///
    /// * `input` - source ids of shape (*batch size*, *source length*)
    /// * `hidden` - initial hidden state of shape (*batch size*, *units*)
    /// * `train` - boolean flag to turn on/off the dropout layers in the model
    ///
    /// # Returns
    ///
    /// * `output` - GRU output for every position, shape (*batch size*, *source length*, *units*)
    /// * `state` - final hidden state, shape (*batch size*, *units*)
    pub fn forward_t(&self, input: &Tensor, hidden: &Tensor, train: bool) -> (Tensor, Tensor) {
        let embedded = input.apply(&self.embedding).apply_t(&self.dropout, train);
        let (output, GRUState(state)) = self.gru.seq_init(&embedded, &GRUState(hidden.unsqueeze(0)));
        (output, state.squeeze_dim(0))
    }

    /// Zero hidden state for a batch of `batch_size` sequences.
    pub fn initialize_hidden_state(&self, batch_size: i64, device: Device) -> Tensor {
        Tensor::zeros([batch_size, self.units], (Kind::Float, device))
    }
}
