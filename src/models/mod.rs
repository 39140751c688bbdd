//! # Torch implementation of translation models

pub mod seq2seq;
