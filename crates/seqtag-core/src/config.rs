//! # Model and Training Configuration
//!
//! Hyperparameters for the tagger. [`ModelConfig`] is persisted next to the
//! weights as `config.json`; [`TrainingConfig`] only lives for a run.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SeqTagError};

/// Format tag written into persisted model configs.
pub const MODEL_CONFIG_FORMAT: &str = "seqtag-model-config";
/// Current persisted model config version.
pub const MODEL_CONFIG_VERSION: u32 = 1;

/// Architecture hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub char_embedding_size: usize,
    pub word_embedding_size: usize,
    pub char_lstm_units: usize,
    pub word_lstm_units: usize,
    pub dropout: f32,
    /// Feed character features to the word encoder.
    pub char_feature: bool,
    /// Decode with transition scores (Viterbi) instead of per-token argmax.
    pub crf: bool,
    /// Filled in from the fitted preprocessor at train time.
    pub char_vocab_size: usize,
    /// Filled in from the fitted preprocessor at train time.
    pub word_vocab_size: usize,
    /// Filled in from the fitted preprocessor at train time.
    pub num_tags: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            char_embedding_size: 25,
            word_embedding_size: 100,
            char_lstm_units: 25,
            word_lstm_units: 100,
            dropout: 0.5,
            char_feature: true,
            crf: true,
            char_vocab_size: 0,
            word_vocab_size: 0,
            num_tags: 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedModelConfig {
    format: String,
    version: u32,
    config: ModelConfig,
}

impl ModelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_char_embedding_size(mut self, size: usize) -> Self {
        self.char_embedding_size = size;
        self
    }

    pub fn with_word_embedding_size(mut self, size: usize) -> Self {
        self.word_embedding_size = size;
        self
    }

    pub fn with_char_lstm_units(mut self, units: usize) -> Self {
        self.char_lstm_units = units;
        self
    }

    pub fn with_word_lstm_units(mut self, units: usize) -> Self {
        self.word_lstm_units = units;
        self
    }

    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_char_feature(mut self, enabled: bool) -> Self {
        self.char_feature = enabled;
        self
    }

    pub fn with_crf(mut self, enabled: bool) -> Self {
        self.crf = enabled;
        self
    }

    /// Reject sizes of zero and dropout outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        if self.word_embedding_size == 0 || self.word_lstm_units == 0 {
            return Err(SeqTagError::InvalidConfig(
                "word embedding size and word LSTM units must be positive".into(),
            ));
        }
        if self.char_feature && (self.char_embedding_size == 0 || self.char_lstm_units == 0) {
            return Err(SeqTagError::InvalidConfig(
                "char embedding size and char LSTM units must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(SeqTagError::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }

    /// Write the config as schema-tagged JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let persisted = PersistedModelConfig {
            format: MODEL_CONFIG_FORMAT.to_string(),
            version: MODEL_CONFIG_VERSION,
            config: self.clone(),
        };
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, &persisted)?;
        writer.flush()?;
        info!(path = %path.as_ref().display(), "saved model config");
        Ok(())
    }

    /// Read a config written by [`ModelConfig::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let persisted: PersistedModelConfig = serde_json::from_reader(reader)?;
        if persisted.format != MODEL_CONFIG_FORMAT || persisted.version != MODEL_CONFIG_VERSION {
            return Err(SeqTagError::UnsupportedFormat {
                format: persisted.format,
                version: persisted.version,
            });
        }
        Ok(persisted.config)
    }
}

/// Optimizer used by the training loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

/// Training-loop hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    /// Multiplied into the learning rate after every epoch.
    pub lr_decay: f64,
    /// Gradient clipping threshold; `0.0` disables clipping.
    pub clip_gradients: f64,
    pub max_epoch: usize,
    pub early_stopping: bool,
    /// Epochs without validation improvement before stopping; must be
    /// positive while early stopping is on.
    pub patience: usize,
    /// Keep updating the pretrained word embeddings.
    pub train_embeddings: bool,
    pub max_checkpoints_to_keep: usize,
    /// Seed for shuffling.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.001,
            lr_decay: 0.9,
            clip_gradients: 5.0,
            max_epoch: 15,
            early_stopping: true,
            patience: 3,
            train_embeddings: true,
            max_checkpoints_to_keep: 5,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Clamped to `(0, 1]`.
    pub fn with_lr_decay(mut self, lr_decay: f64) -> Self {
        self.lr_decay = lr_decay.clamp(f64::EPSILON, 1.0);
        self
    }

    pub fn with_max_epoch(mut self, max_epoch: usize) -> Self {
        self.max_epoch = max_epoch;
        self
    }

    pub fn with_early_stopping(mut self, enabled: bool, patience: usize) -> Self {
        self.early_stopping = enabled;
        self.patience = patience;
        self
    }

    pub fn with_train_embeddings(mut self, enabled: bool) -> Self {
        self.train_embeddings = enabled;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SeqTagError::InvalidConfig("batch size must be positive".into()));
        }
        if self.max_epoch == 0 {
            return Err(SeqTagError::InvalidConfig("max epoch must be positive".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(SeqTagError::InvalidConfig(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.early_stopping && self.patience == 0 {
            return Err(SeqTagError::InvalidConfig(
                "patience must be positive when early stopping is enabled".into(),
            ));
        }
        Ok(())
    }
}
