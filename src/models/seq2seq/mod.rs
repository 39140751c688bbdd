//! # Recurrent encoder-decoder with additive attention (Bahdanau et al.)
//!
//! Implementation of the RNN encoder-decoder translation model with attention described in
//! [Neural Machine Translation by Jointly Learning to Align and Translate](https://arxiv.org/abs/1409.0473)
//! (Bahdanau, Cho, Bengio, 2014).
//! The model is made of:
//! - an `Encoder`: word embeddings followed by a GRU producing one output per source position
//! - a `Decoder`: word embeddings, a `BahdanauAttention` layer over the encoder outputs, a GRU
//!   and a projection on the target vocabulary, run one target position at a time
//!
//! Both are owned by a `Seq2SeqModel`, which runs teacher-forced decoding for training.
//! Greedy and beam search decoding are provided by the `translation` pipeline.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use seq2seq_nmt::seq2seq::{Seq2SeqConfig, Seq2SeqModel};
//! use seq2seq_nmt::Config;
//! use tch::{nn, Device, Tensor};
//!
//! let config = Seq2SeqConfig::from_file("path/to/config.json")?;
//! let mut vs = nn::VarStore::new(Device::cuda_if_available());
//! let model = Seq2SeqModel::new(vs.root(), &config);
//! vs.load("path/to/ckpt-10.ot")?;
//!
//! let input = Tensor::from_slice(&[1i64, 24, 7, 2]).view((1, 4));
//! let target = Tensor::from_slice(&[1i64, 31, 5, 2]).view((1, 4));
//! let output = tch::no_grad(|| model.forward_t(&input, &target, false))?;
//! # Ok(())
//! # }
//! ```

mod attention;
mod decoder;
mod encoder;
mod seq2seq_model;

pub use attention::BahdanauAttention;
pub use decoder::{Decoder, DecoderOutput};
pub use encoder::Encoder;
pub use seq2seq_model::{Seq2SeqConfig, Seq2SeqModel, Seq2SeqOutput};
