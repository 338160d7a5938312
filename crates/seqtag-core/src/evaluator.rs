//! Scores a model on labeled sentences.

use tracing::info;

use crate::error::{Result, SeqTagError};
use crate::metrics::Metrics;
use crate::model::SequenceModel;
use crate::preprocess::WordPreprocessor;

/// Default number of sentences per prediction batch.
pub const EVAL_BATCH_SIZE: usize = 64;

/// Runs a model over labeled data and reports entity-level metrics.
pub struct Evaluator<'a, M> {
    model: &'a M,
    preprocessor: &'a WordPreprocessor,
    batch_size: usize,
}

impl<'a, M: SequenceModel> Evaluator<'a, M> {
    pub fn new(model: &'a M, preprocessor: &'a WordPreprocessor) -> Self {
        Self {
            model,
            preprocessor,
            batch_size: EVAL_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Predict tag strings for every sentence.
    pub fn predict<S: AsRef<[String]>>(&self, sentences: &[S]) -> Result<Vec<Vec<String>>> {
        let mut predicted = Vec::with_capacity(sentences.len());
        for chunk in sentences.chunks(self.batch_size) {
            let batch = self.preprocessor.transform::<S, Vec<String>>(chunk, None)?;
            let tag_ids: Vec<Vec<u32>> = self
                .model
                .predict(&batch)?
                .into_iter()
                .map(|p| p.tag_ids)
                .collect();
            predicted.extend(self.preprocessor.inverse_transform(&tag_ids, &batch.lengths)?);
        }
        Ok(predicted)
    }

    /// Entity-level precision / recall / F1 against `labels`.
    pub fn eval<S, L>(&self, sentences: &[S], labels: &[L]) -> Result<Metrics>
    where
        S: AsRef<[String]>,
        L: AsRef<[String]>,
    {
        if sentences.len() != labels.len() {
            return Err(SeqTagError::LengthMismatch {
                what: "sentences vs label sequences",
                expected: sentences.len(),
                found: labels.len(),
            });
        }

        for label in labels.iter().flat_map(|l| l.as_ref()) {
            self.preprocessor.tag_id(label)?;
        }

        let predicted = self.predict(sentences)?;
        let metrics = Metrics::compute(labels, &predicted)?;
        info!(
            sentences = sentences.len(),
            precision = metrics.micro.precision,
            recall = metrics.micro.recall,
            f1 = metrics.micro.f1,
            "evaluated model"
        );
        Ok(metrics)
    }
}
