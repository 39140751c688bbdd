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

use std::borrow::Borrow;
use tch::kind::Kind::Float;
use tch::{nn, Tensor};

#[derive(Debug)]
/// # Additive (Bahdanau) attention
/// Scores every encoder position against the decoder query with
/// `score = v(tanh(w1(query) + w2(values)))`, normalizes the scores over the time axis and
/// returns the attention-weighted sum of the values.
pub struct BahdanauAttention {
    w1: nn::Linear,
    w2: nn::Linear,
    v: nn::Linear,
}

impl BahdanauAttention {
    /// Build a new `BahdanauAttention` layer
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the attention layer
    /// * `query_dim` - size of the decoder hidden state
    /// * `value_dim` - size of the encoder outputs
    /// * `units` - size of the hidden scoring layer
    pub fn new<'p, P>(p: P, query_dim: i64, value_dim: i64, units: i64) -> BahdanauAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let w1 = nn::linear(p / "w1", query_dim, units, Default::default());
        let w2 = nn::linear(p / "w2", value_dim, units, Default::default());
        let v = nn::linear(p / "v", units, 1, Default::default());
        BahdanauAttention { w1, w2, v }
    }

    /// Forward pass through the attention layer
    ///
    /// # Arguments
    ///
    /// * `query` - decoder hidden state of shape (*batch size*, *query_dim*)
    /// * `values` - encoder outputs of shape (*batch size*, *source length*, *value_dim*)
    /// * `mask` - optional boolean mask of shape (*batch size*, *source length*), `false` for
    ///   positions that must not receive attention
    ///
    /// # Returns
    ///
    /// * `context_vector` - weighted sum of the values, shape (*batch size*, *value_dim*)
    /// * `attention_weights` - shape (*batch size*, *source length*, 1), summing to 1 over the
    ///   source positions
    pub fn forward(&self, query: &Tensor, values: &Tensor, mask: Option<&Tensor>) -> (Tensor, Tensor) {
        let query_with_time_axis = query.unsqueeze(1);
        let score = (query_with_time_axis.apply(&self.w1) + values.apply(&self.w2))
            .tanh()
            .apply(&self.v);
        let score = match mask {
            Some(mask) => score.masked_fill(&mask.logical_not().unsqueeze(-1), f64::NEG_INFINITY),
            None => score,
        };
        let attention_weights = score.softmax(1, Float);
        let context_vector = (&attention_weights * values).sum_dim_intlist([1].as_slice(), false, Float);
        (context_vector, attention_weights)
    }
}
