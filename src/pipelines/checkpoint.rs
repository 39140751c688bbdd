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

//! # Checkpoint management
//!
//! Saves the model parameters of a `VarStore` as `ckpt-{step}.ot` files in a directory, keeps
//! track of the saved checkpoints in a JSON `checkpoint` state file and removes the oldest ones
//! beyond `max_to_keep`. The model configuration and both language indices are saved alongside
//! so that a translator can be rebuilt from the directory alone.

use crate::models::seq2seq::Seq2SeqConfig;
use crate::pipelines::vocab::LanguageIndex;
use crate::{Config, Seq2SeqError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tch::nn::VarStore;

const STATE_FILE: &str = "checkpoint";
const CONFIG_FILE: &str = "config.json";
const INPUT_INDEX_FILE: &str = "input_index.json";
const TARGET_INDEX_FILE: &str = "target_index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub step: usize,
    /// File name, relative to the checkpoint directory
    pub file: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// # Content of the checkpoint state file
pub struct CheckpointState {
    /// Checkpoints still on disk, oldest first
    pub checkpoints: Vec<CheckpointEntry>,
}

impl CheckpointState {
    pub fn latest(&self) -> Option<&CheckpointEntry> {
        self.checkpoints.last()
    }
}

#[derive(Debug, Clone)]
/// # Checkpoint manager
pub struct CheckpointManager {
    directory: PathBuf,
    max_to_keep: Option<usize>,
}

impl CheckpointManager {
    /// Creates a manager for `directory`, creating the directory if needed.
    ///
    /// # Arguments
    ///
    /// * `directory` - where checkpoints and assets are written
    /// * `max_to_keep` - number of most recent checkpoints kept on disk, all if `None`
    pub fn new<P: AsRef<Path>>(
        directory: P,
        max_to_keep: Option<usize>,
    ) -> Result<CheckpointManager, Seq2SeqError> {
        if max_to_keep == Some(0) {
            return Err(Seq2SeqError::InvalidConfigurationError(
                "max_to_keep must be at least 1".to_string(),
            ));
        }
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(CheckpointManager {
            directory,
            max_to_keep,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reads the state file, returning an empty state if nothing was saved yet.
    pub fn state(&self) -> Result<CheckpointState, Seq2SeqError> {
        match fs::read_to_string(self.directory.join(STATE_FILE)) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(CheckpointState::default()),
            Err(error) => Err(error.into()),
        }
    }

    fn write_state(&self, state: &CheckpointState) -> Result<(), Seq2SeqError> {
        let temporary_path = self.directory.join(format!("{STATE_FILE}.tmp"));
        fs::write(&temporary_path, serde_json::to_string_pretty(state)?)?;
        fs::rename(&temporary_path, self.directory.join(STATE_FILE))?;
        Ok(())
    }

    /// Saves the variables of `var_store` as the checkpoint for `step`.
    ///
    /// # Returns
    ///
    /// * `PathBuf` of the written checkpoint file
    pub fn save(&self, var_store: &VarStore, step: usize) -> Result<PathBuf, Seq2SeqError> {
        let file = format!("ckpt-{step}.ot");
        let path = self.directory.join(&file);
        var_store.save(&path)?;

        let mut state = self.state()?;
        state.checkpoints.retain(|entry| entry.step != step);
        state.checkpoints.push(CheckpointEntry { step, file });
        if let Some(max_to_keep) = self.max_to_keep {
            while state.checkpoints.len() > max_to_keep {
                let removed = state.checkpoints.remove(0);
                match fs::remove_file(self.directory.join(&removed.file)) {
                    Ok(()) => tracing::debug!("Removed checkpoint {}", removed.file),
                    Err(error) if error.kind() == ErrorKind::NotFound => {}
                    Err(error) => return Err(error.into()),
                }
            }
        }
        self.write_state(&state)?;
        tracing::info!("Saved checkpoint for step {} at {}", step, path.display());
        Ok(path)
    }

    /// Step and path of the most recent checkpoint, if any.
    pub fn latest_checkpoint(&self) -> Result<Option<(usize, PathBuf)>, Seq2SeqError> {
        Ok(self
            .state()?
            .latest()
            .map(|entry| (entry.step, self.directory.join(&entry.file))))
    }

    /// Loads the variables saved at `path` into `var_store`.
    pub fn restore<P: AsRef<Path>>(&self, var_store: &mut VarStore, path: P) -> Result<(), Seq2SeqError> {
        let path = path.as_ref();
        var_store.load(path).map_err(|error| {
            Seq2SeqError::CheckpointError(format!(
                "Could not restore {}: {error}",
                path.display()
            ))
        })?;
        tracing::info!("Restored checkpoint {}", path.display());
        Ok(())
    }

    /// Restores the most recent checkpoint, returning its step, or `None` if nothing was saved.
    pub fn restore_latest(&self, var_store: &mut VarStore) -> Result<Option<usize>, Seq2SeqError> {
        match self.latest_checkpoint()? {
            Some((step, path)) => {
                self.restore(var_store, path)?;
                Ok(Some(step))
            }
            None => Ok(None),
        }
    }

    /// Saves the model configuration and the language indices.
    pub fn save_assets(
        &self,
        config: &Seq2SeqConfig,
        input_index: &LanguageIndex,
        target_index: &LanguageIndex,
    ) -> Result<(), Seq2SeqError> {
        fs::write(
            self.directory.join(CONFIG_FILE),
            serde_json::to_string_pretty(config)?,
        )?;
        input_index.save(self.directory.join(INPUT_INDEX_FILE))?;
        target_index.save(self.directory.join(TARGET_INDEX_FILE))?;
        Ok(())
    }

    /// Loads the model configuration and the input and target language indices.
    pub fn load_assets(&self) -> Result<(Seq2SeqConfig, LanguageIndex, LanguageIndex), Seq2SeqError> {
        let config = Seq2SeqConfig::from_file(self.directory.join(CONFIG_FILE))?;
        let input_index = LanguageIndex::load(self.directory.join(INPUT_INDEX_FILE))?;
        let target_index = LanguageIndex::load(self.directory.join(TARGET_INDEX_FILE))?;
        if input_index.vocab_size() != config.input_vocab_size
            || target_index.vocab_size() != config.target_vocab_size
        {
            return Err(Seq2SeqError::CheckpointError(
                "Language indices do not match the model configuration".to_string(),
            ));
        }
        Ok((config, input_index, target_index))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::{nn, Device};

    #[test]
    fn keeps_the_most_recent_checkpoints() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = CheckpointManager::new(dir.path(), Some(2))?;
        assert_eq!(manager.latest_checkpoint()?, None);

        let vs = nn::VarStore::new(Device::Cpu);
        let _ = vs.root().zeros("weight", &[2, 2]);
        for step in [2, 4, 6] {
            manager.save(&vs, step)?;
        }

        let state = manager.state()?;
        let steps: Vec<usize> = state.checkpoints.iter().map(|entry| entry.step).collect();
        assert_eq!(steps, vec![4, 6]);
        assert!(!dir.path().join("ckpt-2.ot").exists());
        assert!(dir.path().join("ckpt-6.ot").exists());
        assert_eq!(
            manager.latest_checkpoint()?,
            Some((6, dir.path().join("ckpt-6.ot")))
        );
        Ok(())
    }

    #[test]
    fn restores_saved_values() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = CheckpointManager::new(dir.path(), None)?;

        let vs = nn::VarStore::new(Device::Cpu);
        let weight = vs.root().randn_standard("weight", &[3]);
        manager.save(&vs, 1)?;

        let mut restored_vs = nn::VarStore::new(Device::Cpu);
        let restored_weight = restored_vs.root().zeros("weight", &[3]);
        assert_eq!(manager.restore_latest(&mut restored_vs)?, Some(1));
        assert!(restored_weight.allclose(&weight, 1e-6, 1e-6, false));
        Ok(())
    }

    #[test]
    fn assets_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = CheckpointManager::new(dir.path(), None)?;
        let input_index = LanguageIndex::fit_on_texts(&["<start> hola <end>"]);
        let target_index = LanguageIndex::fit_on_texts(&["<start> hello <end>"]);
        let config = Seq2SeqConfig {
            input_vocab_size: input_index.vocab_size(),
            target_vocab_size: target_index.vocab_size(),
            ..Default::default()
        };
        manager.save_assets(&config, &input_index, &target_index)?;
        let (loaded_config, loaded_input, loaded_target) = manager.load_assets()?;
        assert_eq!(loaded_config, config);
        assert_eq!(loaded_input, input_index);
        assert_eq!(loaded_target, target_index);
        Ok(())
    }
}
