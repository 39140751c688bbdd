//! # End-to-end translation pipelines
//!
//! The pipelines cover the whole life cycle of a translation model:
//!
//! #### 1. Data preparation
//! - `preprocessing`: sentence normalization and start/end markers
//! - `vocab`: word-level language indices and padding
//! - `trimmer`: joint length budgets for sentence pairs
//! - `dataset`: corpus loading, train/validation split and batching
//!
//! #### 2. Training
//! - `training`: masked cross-entropy and the teacher-forced training loop
//! - `checkpoint`: saving and restoring model parameters and assets
//!
//! #### 3. Inference
//! - `translation`: greedy and beam search decoding
//! - `attention_plot`: rendering of the attention weights of a translation

pub mod attention_plot;
pub mod checkpoint;
pub mod dataset;
pub mod preprocessing;
pub mod training;
pub mod translation;
pub mod trimmer;
pub mod vocab;
