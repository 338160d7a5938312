//! # Sequence Models
//!
//! The model is a collaborator behind [`SequenceModel`]: it consumes padded
//! [`Batch`]es and returns tag ids. [`SeqLabeling`] is the candle-backed
//! implementation shipped with the crate.

mod crf;
mod seq_labeling;
mod viterbi;

pub use crf::crf_negative_log_likelihood;
pub use seq_labeling::SeqLabeling;
pub use viterbi::ViterbiDecoder;

use std::path::Path;

use candle_core::Device;

use crate::config::{ModelConfig, TrainingConfig};
use crate::embeddings::EmbeddingMatrix;
use crate::error::Result;
use crate::preprocess::Batch;

/// Tags predicted for one sentence, cut to its true length.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub tag_ids: Vec<u32>,
    /// Model probability of each predicted tag.
    pub scores: Vec<f32>,
}

/// A trainable tagger consuming preprocessed batches.
pub trait SequenceModel: Sized {
    /// Construct a fresh model. `embeddings`, when given, initializes the
    /// word embedding table and fixes its width.
    fn build(config: &ModelConfig, embeddings: Option<&EmbeddingMatrix>, device: &Device) -> Result<Self>;

    /// Restore a model from weights written by [`SequenceModel::save_weights`].
    fn load_weights(config: &ModelConfig, path: &Path, device: &Device) -> Result<Self>;

    fn config(&self) -> &ModelConfig;

    /// Prepare optimizer state for a training run.
    fn configure_training(&mut self, training: &TrainingConfig) -> Result<()>;

    fn set_learning_rate(&mut self, learning_rate: f64);

    /// One optimization step on a labeled batch; returns the loss.
    fn train_step(&mut self, batch: &Batch) -> Result<f32>;

    /// Predict tags for every sentence in `batch`.
    fn predict(&self, batch: &Batch) -> Result<Vec<Prediction>>;

    fn save_weights(&self, path: &Path) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;

    pub(crate) fn sent(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    /// Predicts the tag each word carried in training, or a fixed fallback.
    pub(crate) struct OracleModel {
        config: ModelConfig,
        word_tags: HashMap<u32, u32>,
        fallback: u32,
    }

    impl OracleModel {
        pub(crate) fn constant(tag: u32) -> Self {
            Self {
                config: ModelConfig::default(),
                word_tags: HashMap::new(),
                fallback: tag,
            }
        }

        pub(crate) fn fit(
            p: &crate::preprocess::WordPreprocessor,
            x: &[Vec<String>],
            y: &[Vec<String>],
        ) -> Self {
            let batch = p.transform(x, Some(y)).unwrap();
            let tags = batch.tag_ids.as_ref().unwrap();
            let mut word_tags = HashMap::new();
            for (words, tags) in batch.word_ids.iter().zip(tags) {
                for (&w, &t) in words.iter().zip(tags) {
                    word_tags.insert(w, t);
                }
            }
            Self {
                config: ModelConfig::default(),
                word_tags,
                fallback: p.tag_id("O").unwrap(),
            }
        }
    }

    impl SequenceModel for OracleModel {
        fn build(config: &ModelConfig, _: Option<&EmbeddingMatrix>, _: &Device) -> Result<Self> {
            let mut model = Self::constant(2);
            model.config = config.clone();
            Ok(model)
        }

        fn load_weights(config: &ModelConfig, _: &Path, device: &Device) -> Result<Self> {
            Self::build(config, None, device)
        }

        fn config(&self) -> &ModelConfig {
            &self.config
        }

        fn configure_training(&mut self, _: &TrainingConfig) -> Result<()> {
            Ok(())
        }

        fn set_learning_rate(&mut self, _: f64) {}

        fn train_step(&mut self, _: &Batch) -> Result<f32> {
            Ok(0.0)
        }

        fn predict(&self, batch: &Batch) -> Result<Vec<Prediction>> {
            Ok(batch
                .word_ids
                .iter()
                .zip(&batch.lengths)
                .map(|(words, &len)| Prediction {
                    tag_ids: words[..len]
                        .iter()
                        .map(|w| self.word_tags.get(w).copied().unwrap_or(self.fallback))
                        .collect(),
                    scores: vec![1.0; len],
                })
                .collect())
        }

        fn save_weights(&self, path: &Path) -> Result<()> {
            std::fs::write(path, b"oracle")?;
            Ok(())
        }
    }
}
