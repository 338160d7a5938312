//! Mini-batch training loop with validation, checkpoints and early stopping.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::Serialize;
use seqtag_core::{Evaluator, Result, SeqTagError, SequenceModel, TrainingConfig, WordPreprocessor};
use tracing::{debug, info, warn};

/// Summary of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochStats {
    /// One-based epoch number.
    pub epoch: usize,
    /// Mean loss per sentence.
    pub loss: f32,
    /// Learning rate used during the epoch.
    pub learning_rate: f64,
    /// Validation F1, when validation data was given.
    pub f1: Option<f64>,
}

/// Outcome of [`Trainer::train`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingReport {
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub best_f1: Option<f64>,
    pub stopped_early: bool,
    pub history: Vec<EpochStats>,
    /// Checkpoint files still on disk, oldest first.
    pub checkpoints: Vec<PathBuf>,
}

/// Drives a [`SequenceModel`] over labeled sentences.
pub struct Trainer {
    config: TrainingConfig,
    checkpoint_dir: Option<PathBuf>,
}

impl Trainer {
    pub fn new(config: TrainingConfig, checkpoint_dir: Option<PathBuf>) -> Self {
        Self {
            config,
            checkpoint_dir,
        }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model` for up to `max_epoch` epochs.
    ///
    /// Each epoch shuffles the training set with the configured seed, runs
    /// one optimizer step per mini-batch, then scores the validation set.
    /// The learning rate decays by `lr_decay` after every epoch. With early
    /// stopping on, training ends after `patience` epochs without a better
    /// validation F1.
    pub fn train<M, S, L>(
        &self,
        model: &mut M,
        preprocessor: &WordPreprocessor,
        x_train: &[S],
        y_train: &[L],
        x_valid: Option<&[S]>,
        y_valid: Option<&[L]>,
    ) -> Result<TrainingReport>
    where
        M: SequenceModel,
        S: AsRef<[String]>,
        L: AsRef<[String]>,
    {
        self.config.validate()?;
        if x_train.len() != y_train.len() {
            return Err(SeqTagError::LengthMismatch {
                what: "training sentences vs label sequences",
                expected: x_train.len(),
                found: y_train.len(),
            });
        }
        let valid = match (x_valid, y_valid) {
            (Some(x), Some(y)) => Some((x, y)),
            (None, None) => None,
            _ => {
                return Err(SeqTagError::InvalidConfig(
                    "validation sentences and labels must be given together".into(),
                ));
            }
        };
        if let Some(dir) = &self.checkpoint_dir {
            std::fs::create_dir_all(dir)?;
        }

        model.configure_training(&self.config)?;

        info!(
            sentences = x_train.len(),
            validation = valid.map_or(0, |(x, _)| x.len()),
            batch_size = self.config.batch_size,
            max_epoch = self.config.max_epoch,
            "starting training"
        );

        let mut rng = oorandom::Rand32::new(self.config.seed);
        let mut order: Vec<usize> = (0..x_train.len()).collect();
        let mut learning_rate = self.config.learning_rate;
        let mut checkpoints = VecDeque::new();
        let mut report = TrainingReport::default();
        let mut stale_epochs = 0usize;

        for epoch in 1..=self.config.max_epoch {
            shuffle(&mut order, &mut rng);

            let mut total_loss = 0f32;
            for (step, indices) in order.chunks(self.config.batch_size).enumerate() {
                let sentences: Vec<&[String]> = indices.iter().map(|&i| x_train[i].as_ref()).collect();
                let labels: Vec<&[String]> = indices.iter().map(|&i| y_train[i].as_ref()).collect();
                let batch = preprocessor.transform(&sentences, Some(labels.as_slice()))?;

                let loss = model.train_step(&batch)?;
                total_loss += loss * indices.len() as f32;
                debug!(epoch, step, loss, "batch done");
            }
            let loss = total_loss / x_train.len().max(1) as f32;

            let f1 = match valid {
                Some((x, y)) => Some(Evaluator::new(&*model, preprocessor).eval(x, y)?.f1()),
                None => None,
            };
            info!(
                epoch,
                max_epoch = self.config.max_epoch,
                loss,
                learning_rate,
                f1 = f1.unwrap_or(f64::NAN),
                "epoch complete"
            );
            report.history.push(EpochStats {
                epoch,
                loss,
                learning_rate,
                f1,
            });
            report.epochs_run = epoch;

            let improved = match (f1, report.best_f1) {
                (Some(f1), Some(best)) => f1 > best,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if improved {
                report.best_f1 = f1;
                report.best_epoch = Some(epoch);
                stale_epochs = 0;
            } else {
                stale_epochs += 1;
            }

            if improved || f1.is_none() {
                self.checkpoint(&*model, epoch, f1, &mut checkpoints)?;
            }

            if valid.is_some() && self.config.early_stopping && stale_epochs >= self.config.patience {
                info!(epoch, patience = self.config.patience, "early stopping");
                report.stopped_early = true;
                break;
            }

            learning_rate *= self.config.lr_decay;
            model.set_learning_rate(learning_rate);
        }

        report.checkpoints = checkpoints.into();
        info!(
            epochs = report.epochs_run,
            best_f1 = report.best_f1.unwrap_or(f64::NAN),
            "training finished"
        );
        Ok(report)
    }

    /// Save weights for `epoch` and drop the oldest files beyond the limit.
    fn checkpoint<M: SequenceModel>(
        &self,
        model: &M,
        epoch: usize,
        f1: Option<f64>,
        kept: &mut VecDeque<PathBuf>,
    ) -> Result<()> {
        let Some(dir) = &self.checkpoint_dir else {
            return Ok(());
        };
        if self.config.max_checkpoints_to_keep == 0 {
            return Ok(());
        }

        let path = checkpoint_path(dir, epoch, f1);
        model.save_weights(&path)?;
        kept.push_back(path);

        while kept.len() > self.config.max_checkpoints_to_keep {
            let Some(old) = kept.pop_front() else {
                break;
            };
            if let Err(err) = std::fs::remove_file(&old) {
                warn!(path = %old.display(), error = %err, "could not remove old checkpoint");
            }
        }
        Ok(())
    }
}

fn checkpoint_path(dir: &Path, epoch: usize, f1: Option<f64>) -> PathBuf {
    match f1 {
        Some(f1) => dir.join(format!("model_weights_{epoch:02}_{f1:.2}.safetensors")),
        None => dir.join(format!("model_weights_{epoch:02}.safetensors")),
    }
}

/// Fisher-Yates shuffle.
fn shuffle(items: &mut [usize], rng: &mut oorandom::Rand32) {
    for i in (1..items.len()).rev() {
        let j = rng.rand_range(0..(i as u32 + 1)) as usize;
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use seqtag_core::{
        Batch, EmbeddingMatrix, ModelConfig, Prediction, PreprocessorConfig, SeqLabeling,
    };

    fn sent(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn data() -> (Vec<Vec<String>>, Vec<Vec<String>>) {
        (
            vec![
                sent(&["John", "lives", "in", "Paris"]),
                sent(&["Mary", "left", "Berlin"]),
                sent(&["Anna", "visited", "Rome"]),
            ],
            vec![
                sent(&["B-PER", "O", "O", "B-LOC"]),
                sent(&["B-PER", "O", "B-LOC"]),
                sent(&["B-PER", "O", "B-LOC"]),
            ],
        )
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("seqtag-trainer-{}-{name}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    /// Predicts one fixed tag and records what the trainer asked of it.
    struct FixedModel {
        config: ModelConfig,
        tag: u32,
        learning_rates: Vec<f64>,
        sentences_seen: usize,
    }

    impl FixedModel {
        fn new(tag: u32) -> Self {
            Self {
                config: ModelConfig::default(),
                tag,
                learning_rates: Vec::new(),
                sentences_seen: 0,
            }
        }
    }

    impl SequenceModel for FixedModel {
        fn build(config: &ModelConfig, _: Option<&EmbeddingMatrix>, _: &Device) -> Result<Self> {
            let mut model = Self::new(2);
            model.config = config.clone();
            Ok(model)
        }

        fn load_weights(config: &ModelConfig, _: &Path, device: &Device) -> Result<Self> {
            Self::build(config, None, device)
        }

        fn config(&self) -> &ModelConfig {
            &self.config
        }

        fn configure_training(&mut self, training: &TrainingConfig) -> Result<()> {
            self.learning_rates.push(training.learning_rate);
            Ok(())
        }

        fn set_learning_rate(&mut self, learning_rate: f64) {
            self.learning_rates.push(learning_rate);
        }

        fn train_step(&mut self, batch: &Batch) -> Result<f32> {
            assert!(batch.tag_ids.is_some());
            self.sentences_seen += batch.len();
            Ok(1.0)
        }

        fn predict(&self, batch: &Batch) -> Result<Vec<Prediction>> {
            Ok(batch
                .lengths
                .iter()
                .map(|&len| Prediction {
                    tag_ids: vec![self.tag; len],
                    scores: vec![1.0; len],
                })
                .collect())
        }

        fn save_weights(&self, path: &Path) -> Result<()> {
            std::fs::write(path, b"fixed")?;
            Ok(())
        }
    }

    #[test]
    fn test_runs_all_epochs_and_decays_learning_rate() {
        let (x, y) = data();
        let p = WordPreprocessor::fit(PreprocessorConfig::default(), &x, &y).unwrap();
        let mut model = FixedModel::new(p.tag_id("O").unwrap());
        let config = TrainingConfig::new()
            .with_batch_size(2)
            .with_max_epoch(3)
            .with_learning_rate(0.1)
            .with_lr_decay(0.5);

        let report = Trainer::new(config, None)
            .train(&mut model, &p, &x, &y, None, None)
            .unwrap();

        assert_eq!(report.epochs_run, 3);
        assert!(!report.stopped_early);
        assert!(report.best_f1.is_none());
        assert_eq!(model.sentences_seen, 9);
        assert_eq!(model.learning_rates, vec![0.1, 0.05, 0.025, 0.0125]);
        assert_eq!(report.history[1].learning_rate, 0.05);
        assert_eq!(report.history[0].loss, 1.0);
    }

    #[test]
    fn test_early_stopping_without_improvement() {
        let (x, y) = data();
        let p = WordPreprocessor::fit(PreprocessorConfig::default(), &x, &y).unwrap();
        let mut model = FixedModel::new(p.tag_id("O").unwrap());
        let config = TrainingConfig::new()
            .with_max_epoch(10)
            .with_early_stopping(true, 2);

        let report = Trainer::new(config, None)
            .train(&mut model, &p, &x, &y, Some(x.as_slice()), Some(y.as_slice()))
            .unwrap();

        assert!(report.stopped_early);
        assert_eq!(report.epochs_run, 3);
        assert_eq!(report.best_epoch, Some(1));
        assert_eq!(report.best_f1, Some(0.0));
    }

    #[test]
    fn test_zero_patience_is_rejected_before_training() {
        let (x, y) = data();
        let p = WordPreprocessor::fit(PreprocessorConfig::default(), &x, &y).unwrap();
        let mut model = FixedModel::new(p.tag_id("O").unwrap());
        let config = TrainingConfig::new()
            .with_max_epoch(5)
            .with_early_stopping(true, 0);

        let err = Trainer::new(config, None)
            .train(&mut model, &p, &x, &y, Some(x.as_slice()), Some(y.as_slice()))
            .unwrap_err();
        assert!(matches!(err, SeqTagError::InvalidConfig(_)));
    }

    #[test]
    fn test_checkpoints_are_capped() {
        let (x, y) = data();
        let p = WordPreprocessor::fit(PreprocessorConfig::default(), &x, &y).unwrap();
        let mut model = FixedModel::new(p.tag_id("O").unwrap());
        let dir = temp_dir("capped");
        let mut config = TrainingConfig::new().with_max_epoch(4);
        config.max_checkpoints_to_keep = 2;

        let report = Trainer::new(config, Some(dir.clone()))
            .train(&mut model, &p, &x, &y, None, None)
            .unwrap();

        let on_disk = std::fs::read_dir(&dir).unwrap().count();
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(on_disk, 2);
        assert_eq!(
            report.checkpoints,
            vec![
                dir.join("model_weights_03.safetensors"),
                dir.join("model_weights_04.safetensors"),
            ]
        );
    }

    #[test]
    fn test_mismatched_validation_inputs() {
        let (x, y) = data();
        let p = WordPreprocessor::fit(PreprocessorConfig::default(), &x, &y).unwrap();
        let mut model = FixedModel::new(p.tag_id("O").unwrap());

        let err = Trainer::new(TrainingConfig::default(), None)
            .train(&mut model, &p, &x, &y, Some(x.as_slice()), None)
            .unwrap_err();
        assert!(matches!(err, SeqTagError::InvalidConfig(_)));

        let err = Trainer::new(TrainingConfig::default(), None)
            .train(&mut model, &p, &x, &y[..2], None, None)
            .unwrap_err();
        assert!(matches!(err, SeqTagError::LengthMismatch { .. }));
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let mut a: Vec<usize> = (0..20).collect();
        let mut b = a.clone();
        shuffle(&mut a, &mut oorandom::Rand32::new(7));
        shuffle(&mut b, &mut oorandom::Rand32::new(7));
        assert_eq!(a, b);

        let mut sorted = a.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_trains_bilstm_crf() {
        let (x, y) = data();
        let p = WordPreprocessor::fit(PreprocessorConfig::default(), &x, &y).unwrap();
        let mut config = ModelConfig::new()
            .with_word_embedding_size(8)
            .with_word_lstm_units(6)
            .with_char_embedding_size(4)
            .with_char_lstm_units(3)
            .with_dropout(0.0);
        config.word_vocab_size = p.word_vocab().len();
        config.char_vocab_size = p.char_vocab().len();
        config.num_tags = p.tag_vocab().len();
        let mut model = SeqLabeling::build(&config, None, &Device::Cpu).unwrap();

        let training = TrainingConfig::new()
            .with_batch_size(2)
            .with_max_epoch(5)
            .with_learning_rate(0.05)
            .with_early_stopping(false, 3);
        let report = Trainer::new(training, None)
            .train(&mut model, &p, &x, &y, Some(x.as_slice()), Some(y.as_slice()))
            .unwrap();

        assert_eq!(report.epochs_run, 5);
        assert!(report.history.iter().all(|e| e.loss.is_finite()));
        assert!(report.history[4].loss < report.history[0].loss);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["epochs_run"], 5);
    }
}
