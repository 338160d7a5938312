//! # seqtag
//!
//! Neural sequence labeling behind one facade. [`Sequence`] fits the
//! vocabularies, aligns pretrained embeddings, trains a BiLSTM-CRF tagger,
//! evaluates it, tags new sentences and persists everything to a directory.
//!
//! ## Quick Start
//!
//! ```no_run
//! use seqtag::{Sequence, SequenceConfig};
//!
//! let x = vec![vec!["John".to_string(), "lives".to_string(), "in".to_string(), "Paris".to_string()]];
//! let y = vec![vec!["B-PER".to_string(), "O".to_string(), "O".to_string(), "B-LOC".to_string()]];
//!
//! let mut model = Sequence::new(SequenceConfig::default());
//! model.train(&x, &y, None, None).unwrap();
//! model.save("models/ner").unwrap();
//!
//! let model = Sequence::load("models/ner").unwrap();
//! let analysis = model.analyze(&["John", "lives", "in", "Paris"]).unwrap();
//! println!("{:?}", analysis.entities);
//! ```

use std::path::{Path, PathBuf};

use candle_core::Device;
use tracing::info;

pub use seqtag_core::{
    Analysis, EmbeddingInit, EmbeddingTable, Entity, Metrics, ModelConfig, OovInit,
    OptimizerKind, PreprocessorConfig, Result, Score, SeqLabeling, SeqTagError, SequenceModel,
    TrainingConfig, WordPreprocessor,
};
pub use seqtag_trainer::{Dataset, TrainingReport, load_conll};

use seqtag_core::{Evaluator, Tagger, filter_embeddings};
use seqtag_trainer::Trainer;

/// Model hyperparameters inside a saved model directory.
pub const CONFIG_FILE: &str = "config.json";
/// Fitted vocabularies inside a saved model directory.
pub const PREPROCESSOR_FILE: &str = "preprocessor.json";
/// Model parameters inside a saved model directory.
pub const WEIGHTS_FILE: &str = "model_weights.safetensors";

/// Everything [`Sequence`] needs before training.
#[derive(Debug, Clone, Default)]
pub struct SequenceConfig {
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub preprocessor: PreprocessorConfig,
    pub embedding_init: EmbeddingInit,
    /// Pretrained vectors; without them the model starts from random weights.
    pub embeddings: Option<EmbeddingTable>,
    /// Where training checkpoints go.
    pub log_dir: Option<PathBuf>,
}

impl SequenceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    pub fn with_training(mut self, training: TrainingConfig) -> Self {
        self.training = training;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: PreprocessorConfig) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_embeddings(mut self, embeddings: EmbeddingTable, init: EmbeddingInit) -> Self {
        self.embeddings = Some(embeddings);
        self.embedding_init = init;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }
}

/// Lifecycle of a [`Sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// No model yet.
    Uninitialized,
    /// Trained in this process, not yet persisted.
    Trained,
    /// Written to a directory by [`Sequence::save`].
    Saved,
    /// Restored by [`Sequence::load`].
    Loaded,
}

/// Train / evaluate / tag / persist facade over a [`SeqLabeling`] model.
pub struct Sequence {
    config: SequenceConfig,
    device: Device,
    state: SequenceState,
    fitted: Option<(WordPreprocessor, SeqLabeling)>,
    report: Option<TrainingReport>,
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new(SequenceConfig::default())
    }
}

impl Sequence {
    pub fn new(config: SequenceConfig) -> Self {
        Self {
            config,
            device: Device::Cpu,
            state: SequenceState::Uninitialized,
            fitted: None,
            report: None,
        }
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// The fitted preprocessor, once trained or loaded.
    pub fn preprocessor(&self) -> Option<&WordPreprocessor> {
        self.fitted.as_ref().map(|(p, _)| p)
    }

    /// The model, once trained or loaded.
    pub fn model(&self) -> Option<&SeqLabeling> {
        self.fitted.as_ref().map(|(_, m)| m)
    }

    /// Report of the last [`Sequence::train`] run.
    pub fn report(&self) -> Option<&TrainingReport> {
        self.report.as_ref()
    }

    /// Fit vocabularies on the training data, build a fresh model and train it.
    ///
    /// Any previously trained or loaded model is replaced.
    pub fn train<S, L>(
        &mut self,
        x_train: &[S],
        y_train: &[L],
        x_valid: Option<&[S]>,
        y_valid: Option<&[L]>,
    ) -> Result<&TrainingReport>
    where
        S: AsRef<[String]>,
        L: AsRef<[String]>,
    {
        self.config.model.validate()?;
        self.config.training.validate()?;

        let preprocessor_config = self
            .config
            .preprocessor
            .with_char_feature(self.config.model.char_feature);
        let preprocessor = WordPreprocessor::fit(preprocessor_config, x_train, y_train)?;

        let embeddings = self
            .config
            .embeddings
            .as_ref()
            .map(|table| filter_embeddings(table, preprocessor.word_vocab(), &self.config.embedding_init))
            .transpose()?;

        let mut model_config = self.config.model.clone();
        model_config.word_vocab_size = preprocessor.word_vocab().len();
        model_config.char_vocab_size = preprocessor.char_vocab().len();
        model_config.num_tags = preprocessor.tag_vocab().len();

        let mut model = SeqLabeling::build(&model_config, embeddings.as_ref(), &self.device)?;
        let trainer = Trainer::new(self.config.training.clone(), self.config.log_dir.clone());
        let report = trainer.train(&mut model, &preprocessor, x_train, y_train, x_valid, y_valid)?;

        self.config.model = model.config().clone();
        self.fitted = Some((preprocessor, model));
        self.state = SequenceState::Trained;
        Ok(self.report.insert(report))
    }

    /// Entity-level precision, recall and F1 on labeled data.
    pub fn eval<S, L>(&self, x_test: &[S], y_test: &[L]) -> Result<Metrics>
    where
        S: AsRef<[String]>,
        L: AsRef<[String]>,
    {
        let (preprocessor, model) = self.fitted()?;
        Evaluator::new(model, preprocessor).eval(x_test, y_test)
    }

    /// Tag one tokenized sentence.
    pub fn analyze<W: AsRef<str>>(&self, words: &[W]) -> Result<Analysis> {
        let (preprocessor, model) = self.fitted()?;
        Tagger::new(model, preprocessor).analyze(words)
    }

    /// Tokenize raw text and tag it; entities carry byte offsets.
    pub fn analyze_text(&self, text: &str) -> Result<Analysis> {
        let (preprocessor, model) = self.fitted()?;
        Tagger::new(model, preprocessor).analyze_text(text)
    }

    /// Write preprocessor, model config and weights into `dir`.
    ///
    /// Files already written stay in place if a later write fails.
    pub fn save<P: AsRef<Path>>(&mut self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        let (preprocessor, model) = self.fitted()?;

        std::fs::create_dir_all(dir)?;
        preprocessor.save(dir.join(PREPROCESSOR_FILE))?;
        model.config().save(dir.join(CONFIG_FILE))?;
        model.save_weights(&dir.join(WEIGHTS_FILE))?;

        info!(dir = %dir.display(), "saved sequence model");
        self.state = SequenceState::Saved;
        Ok(())
    }

    /// Restore a model written by [`Sequence::save`].
    pub fn load<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let device = Device::Cpu;

        let preprocessor = WordPreprocessor::load(dir.join(PREPROCESSOR_FILE))?;
        let model_config = ModelConfig::load(dir.join(CONFIG_FILE))?;
        if model_config.num_tags != preprocessor.tag_vocab().len() {
            return Err(SeqTagError::LengthMismatch {
                what: "model tags vs tag vocabulary",
                expected: preprocessor.tag_vocab().len(),
                found: model_config.num_tags,
            });
        }
        let model = SeqLabeling::load_weights(&model_config, &dir.join(WEIGHTS_FILE), &device)?;

        info!(dir = %dir.display(), "loaded sequence model");
        Ok(Self {
            config: SequenceConfig {
                model: model_config,
                preprocessor: *preprocessor.config(),
                ..SequenceConfig::default()
            },
            device,
            state: SequenceState::Loaded,
            fitted: Some((preprocessor, model)),
            report: None,
        })
    }

    fn fitted(&self) -> Result<(&WordPreprocessor, &SeqLabeling)> {
        self.fitted
            .as_ref()
            .map(|(p, m)| (p, m))
            .ok_or(SeqTagError::ModelNotFound)
    }
}
