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

//! # Teacher-forced training loop
//!
//! Trains a `Seq2SeqModel` with Adam on batches of a `DatasetSplit`. At every decoding step the
//! decoder receives the ground truth target id of the previous position, and the loss is the
//! masked sparse categorical cross-entropy averaged over the batch, summed over the target
//! positions and divided by the target length.
//!
//! ```no_run
//! # fn main() -> Result<(), seq2seq_nmt::Seq2SeqError> {
//! use seq2seq_nmt::checkpoint::CheckpointManager;
//! use seq2seq_nmt::dataset::{load_sentence_pairs, TranslationDataset};
//! use seq2seq_nmt::preprocessing::SentencePreprocessor;
//! use seq2seq_nmt::training::{Trainer, TrainingConfig};
//! use tch::Device;
//!
//! let pairs = load_sentence_pairs("spa-eng/spa.txt", Some(30000), &SentencePreprocessor::new()?)?;
//! let dataset = TranslationDataset::from_pairs(&pairs, None);
//! let (train, validation) = dataset.train_validation_split(0.2, 42)?;
//! let model_config = dataset.model_config(256, 1024)?;
//!
//! let checkpoints = CheckpointManager::new("training_checkpoints", Some(5))?;
//! checkpoints.save_assets(&model_config, &dataset.input_index, &dataset.target_index)?;
//! let mut trainer = Trainer::new(&model_config, TrainingConfig::default(), Device::cuda_if_available())?;
//! let summaries = trainer.fit(&train, &validation, Some(&checkpoints))?;
//! # Ok(())
//! # }
//! ```

use crate::common::Config;
use crate::models::seq2seq::{Seq2SeqConfig, Seq2SeqModel};
use crate::pipelines::checkpoint::CheckpointManager;
use crate::pipelines::dataset::{Batch, DatasetSplit};
use crate::pipelines::vocab::PAD_ID;
use crate::Seq2SeqError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tch::nn::OptimizerConfig;
use tch::{nn, Device, Kind, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// # Training configuration
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Maximum gradient norm, no clipping if `None`
    pub clip_grad_norm: Option<f64>,
    /// Number of batches between two progress logs
    pub log_every: usize,
    /// Number of epochs between two checkpoints, 0 to only save after the last epoch
    pub checkpoint_every: usize,
    /// Restart from the latest checkpoint of the checkpoint manager, if any
    pub resume: bool,
    /// Seed for the parameter initialization and the batch shuffling
    pub seed: u64,
}

impl Config for TrainingConfig {}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 10,
            batch_size: 64,
            learning_rate: 1e-3,
            clip_grad_norm: None,
            log_every: 100,
            checkpoint_every: 2,
            resume: false,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// # Losses and timing of a training epoch
pub struct EpochSummary {
    pub epoch: usize,
    pub train_loss: f64,
    /// `None` if the validation split has no full batch
    pub validation_loss: Option<f64>,
    pub duration: Duration,
}

/// Masked sparse categorical cross-entropy for one decoding step.
///
/// # Arguments
///
/// * `real` - expected target ids of shape (*batch size*)
/// * `logits` - predicted scores of shape (*batch size*, *target vocab size*)
///
/// # Returns
///
/// * Scalar tensor: per-example cross-entropy, zeroed for padding targets, averaged over the batch
pub fn loss_function(real: &Tensor, logits: &Tensor) -> Tensor {
    let log_probabilities = logits.log_softmax(-1, Kind::Float);
    let loss = log_probabilities
        .gather(1, &real.unsqueeze(1), false)
        .squeeze_dim(1)
        .neg();
    let mask = real.ne(PAD_ID).to_kind(Kind::Float);
    (loss * mask).mean(Kind::Float)
}

/// Loss of a teacher-forced pass: sum of the step losses over target positions 1..T, divided by T.
///
/// # Arguments
///
/// * `target` - target ids of shape (*batch size*, *target length*)
/// * `logits` - logits of positions 1..T, shape (*batch size*, *target length - 1*, *vocab size*)
pub fn sequence_loss(target: &Tensor, logits: &Tensor) -> Result<Tensor, Seq2SeqError> {
    let (_, target_length) = target.size2()?;
    let (_, steps, _) = logits.size3()?;
    if steps != target_length - 1 {
        return Err(Seq2SeqError::ValueError(format!(
            "Expected logits for {} positions, got {steps}",
            target_length - 1
        )));
    }
    if steps == 0 {
        return Err(Seq2SeqError::ValueError(
            "Cannot compute the loss of an empty target".to_string(),
        ));
    }
    let step_losses: Vec<Tensor> = (1..target_length)
        .map(|t| loss_function(&target.select(1, t), &logits.select(1, t - 1)))
        .collect();
    Ok(Tensor::stack(&step_losses, 0).sum(Kind::Float) / target_length as f64)
}

/// # Trainer
/// Owns the variable store, the model and the Adam optimizer.
pub struct Trainer {
    var_store: nn::VarStore,
    model: Seq2SeqModel,
    optimizer: nn::Optimizer,
    config: TrainingConfig,
}

impl Trainer {
    /// Creates a freshly initialized model on `device` and its optimizer.
    pub fn new(
        model_config: &Seq2SeqConfig,
        config: TrainingConfig,
        device: Device,
    ) -> Result<Trainer, Seq2SeqError> {
        model_config.validate()?;
        tch::manual_seed(config.seed as i64);
        let var_store = nn::VarStore::new(device);
        let model = Seq2SeqModel::new(var_store.root(), model_config);
        Trainer::from_var_store(var_store, model, config)
    }

    /// Wraps an existing model whose variables live in `var_store`.
    pub fn from_var_store(
        var_store: nn::VarStore,
        model: Seq2SeqModel,
        config: TrainingConfig,
    ) -> Result<Trainer, Seq2SeqError> {
        if config.batch_size == 0 {
            return Err(Seq2SeqError::InvalidConfigurationError(
                "batch_size must be positive".to_string(),
            ));
        }
        let optimizer = nn::Adam::default().build(&var_store, config.learning_rate)?;
        Ok(Trainer {
            var_store,
            model,
            optimizer,
            config,
        })
    }

    pub fn model(&self) -> &Seq2SeqModel {
        &self.model
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    pub fn into_parts(self) -> (nn::VarStore, Seq2SeqModel) {
        (self.var_store, self.model)
    }

    /// Runs one optimization step on a batch and returns the batch loss.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f64, Seq2SeqError> {
        let output = self.model.forward_t(&batch.input, &batch.target, true)?;
        let loss = sequence_loss(&batch.target, &output.logits)?;
        match self.config.clip_grad_norm {
            Some(max_norm) => self.optimizer.backward_step_clip_norm(&loss, max_norm),
            None => self.optimizer.backward_step(&loss),
        }
        Ok(loss.double_value(&[]))
    }

    /// Mean loss over the full batches of `split`, without updating the model.
    pub fn evaluate_loss(&self, split: &DatasetSplit) -> Result<Option<f64>, Seq2SeqError> {
        let device = self.var_store.device();
        tch::no_grad(|| {
            let mut total = 0f64;
            let mut num_batches = 0usize;
            for batch in split.batches(self.config.batch_size, None, device) {
                let output = self.model.forward_t(&batch.input, &batch.target, false)?;
                total += sequence_loss(&batch.target, &output.logits)?.double_value(&[]);
                num_batches += 1;
            }
            Ok(if num_batches > 0 {
                Some(total / num_batches as f64)
            } else {
                None
            })
        })
    }

    /// Trains for the configured number of epochs.
    ///
    /// # Arguments
    ///
    /// * `train` - training examples, shuffled at every epoch
    /// * `validation` - held-out examples used to report a validation loss after every epoch
    /// * `checkpoints` - optional checkpoint manager receiving the model parameters
    ///
    /// # Returns
    ///
    /// * `Vec<EpochSummary>` one entry per epoch run
    pub fn fit(
        &mut self,
        train: &DatasetSplit,
        validation: &DatasetSplit,
        checkpoints: Option<&CheckpointManager>,
    ) -> Result<Vec<EpochSummary>, Seq2SeqError> {
        let steps_per_epoch = train.steps_per_epoch(self.config.batch_size);
        if steps_per_epoch == 0 {
            return Err(Seq2SeqError::DatasetError(format!(
                "{} training examples cannot fill a batch of {}",
                train.len(),
                self.config.batch_size
            )));
        }

        let mut first_epoch = 1;
        if self.config.resume {
            if let Some(manager) = checkpoints {
                if let Some(step) = manager.restore_latest(&mut self.var_store)? {
                    first_epoch = step + 1;
                }
            }
        }

        let device = self.var_store.device();
        let mut summaries = Vec::new();
        for epoch in first_epoch..=self.config.epochs {
            let start = Instant::now();
            let mut total_loss = 0f64;
            let shuffle_seed = self.config.seed.wrapping_add(epoch as u64);
            for (batch_index, batch) in train
                .batches(self.config.batch_size, Some(shuffle_seed), device)
                .enumerate()
            {
                let batch_loss = self.train_step(&batch)?;
                total_loss += batch_loss;
                if self.config.log_every > 0 && batch_index % self.config.log_every == 0 {
                    tracing::info!("Epoch {} Batch {} Loss {:.4}", epoch, batch_index, batch_loss);
                }
            }

            let train_loss = total_loss / steps_per_epoch as f64;
            let validation_loss = self.evaluate_loss(validation)?;

            let save_now = (self.config.checkpoint_every > 0
                && epoch % self.config.checkpoint_every == 0)
                || epoch == self.config.epochs;
            if let (Some(manager), true) = (checkpoints, save_now) {
                manager.save(&self.var_store, epoch)?;
            }

            let duration = start.elapsed();
            match validation_loss {
                Some(validation_loss) => tracing::info!(
                    "Epoch {} Loss {:.4} Validation loss {:.4}",
                    epoch,
                    train_loss,
                    validation_loss
                ),
                None => tracing::info!("Epoch {} Loss {:.4}", epoch, train_loss),
            }
            tracing::info!("Time taken for 1 epoch {:.2} sec", duration.as_secs_f64());

            summaries.push(EpochSummary {
                epoch,
                train_loss,
                validation_loss,
                duration,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pipelines::dataset::{SentencePair, TranslationDataset};

    fn tiny_dataset() -> TranslationDataset {
        let pairs: Vec<SentencePair> = ["vete", "hola", "corre", "entra"]
            .iter()
            .zip(["go", "hi", "run", "come"])
            .map(|(source, target)| SentencePair {
                source: format!("<start> {source} . <end>"),
                target: format!("<start> {target} . <end>"),
            })
            .collect();
        TranslationDataset::from_pairs(&pairs, None)
    }

    fn tiny_config(epochs: usize, checkpoint_every: usize, resume: bool) -> TrainingConfig {
        TrainingConfig {
            epochs,
            batch_size: 2,
            checkpoint_every,
            resume,
            ..Default::default()
        }
    }

    #[test]
    fn padding_targets_do_not_contribute() {
        let logits = Tensor::from_slice(&[2.0f32, 1.0, 0.5, 0.1, 3.0, 0.2]).view((2, 3));
        let real = Tensor::from_slice(&[1i64, 0]);
        let loss = loss_function(&real, &logits).double_value(&[]);

        let log_probabilities = logits.get(0).log_softmax(-1, Kind::Float);
        let expected = -log_probabilities.double_value(&[1]) / 2.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn all_padding_gives_zero_loss() {
        let logits = Tensor::from_slice(&[2.0f32, 1.0, 0.5, 0.1]).view((2, 2));
        let real = Tensor::from_slice(&[0i64, 0]);
        assert_eq!(loss_function(&real, &logits).double_value(&[]), 0.0);
    }

    #[test]
    fn sequence_loss_divides_by_target_length() -> anyhow::Result<()> {
        let target = Tensor::from_slice(&[1i64, 2, 1]).view((1, 3));
        let logits = Tensor::zeros([1, 2, 4], (Kind::Float, Device::Cpu));
        let loss = sequence_loss(&target, &logits)?.double_value(&[]);
        // uniform predictions: ln(4) per non-padding step, 2 steps, divided by 3 positions
        assert!((loss - 2.0 * 4f64.ln() / 3.0).abs() < 1e-5);

        let wrong_logits = Tensor::zeros([1, 3, 4], (Kind::Float, Device::Cpu));
        assert!(sequence_loss(&target, &wrong_logits).is_err());
        Ok(())
    }

    #[test]
    fn last_epoch_is_always_saved() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let checkpoints = CheckpointManager::new(dir.path(), None)?;
        let dataset = tiny_dataset();
        let model_config = dataset.model_config(8, 16)?;

        let mut trainer = Trainer::new(&model_config, tiny_config(3, 2, false), Device::Cpu)?;
        let summaries = trainer.fit(&dataset.as_split(), &DatasetSplit::default(), Some(&checkpoints))?;

        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|summary| summary.validation_loss.is_none()));
        let steps: Vec<usize> = checkpoints
            .state()?
            .checkpoints
            .iter()
            .map(|entry| entry.step)
            .collect();
        assert_eq!(steps, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn resume_continues_after_latest_checkpoint() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let checkpoints = CheckpointManager::new(dir.path(), None)?;
        let dataset = tiny_dataset();
        let model_config = dataset.model_config(8, 16)?;

        let mut trainer = Trainer::new(&model_config, tiny_config(3, 2, false), Device::Cpu)?;
        trainer.fit(&dataset.as_split(), &DatasetSplit::default(), Some(&checkpoints))?;

        let mut resumed = Trainer::new(&model_config, tiny_config(4, 2, true), Device::Cpu)?;
        let summaries =
            resumed.fit(&dataset.as_split(), &DatasetSplit::default(), Some(&checkpoints))?;

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].epoch, 4);
        assert_eq!(checkpoints.latest_checkpoint()?.map(|(step, _)| step), Some(4));
        Ok(())
    }
}
