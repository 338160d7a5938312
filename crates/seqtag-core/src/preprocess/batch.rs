//! Padded numeric batches handed to the model.

use candle_core::{Device, Tensor};

use crate::error::Result;
use crate::vocab::PAD;

/// Word, character and tag ids for a batch of sentences, padded with [`PAD`]
/// to the batch-wide maximum sentence length and word length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// `[batch][max_len]`
    pub word_ids: Vec<Vec<u32>>,
    /// `[batch][max_len][max_word_len]`; empty inner vectors when char
    /// features are disabled.
    pub char_ids: Vec<Vec<Vec<u32>>>,
    /// `[batch][max_len]`, present when labels were transformed too.
    pub tag_ids: Option<Vec<Vec<u32>>>,
    /// True (unpadded) sentence lengths.
    pub lengths: Vec<usize>,
}

/// Candle views of a [`Batch`].
#[derive(Debug, Clone)]
pub struct BatchTensors {
    /// `(B, T)` u32
    pub word_ids: Tensor,
    /// `(B, T, C)` u32, or `None` when char features are disabled.
    pub char_ids: Option<Tensor>,
    /// `(B, T)` u32
    pub tag_ids: Option<Tensor>,
}

impl Batch {
    /// Number of sentences.
    pub fn len(&self) -> usize {
        self.word_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.word_ids.is_empty()
    }

    /// Padded sentence length.
    pub fn max_len(&self) -> usize {
        self.word_ids.first().map_or(0, Vec::len)
    }

    /// Padded word length (0 when char features are disabled).
    pub fn max_word_len(&self) -> usize {
        self.char_ids
            .first()
            .and_then(|sentence| sentence.first())
            .map_or(0, Vec::len)
    }

    /// Convert to candle tensors on `device`.
    pub fn to_tensors(&self, device: &Device) -> Result<BatchTensors> {
        let (b, t) = (self.len(), self.max_len());
        let word_ids = Tensor::from_vec(flatten(&self.word_ids), (b, t), device)?;

        let c = self.max_word_len();
        let char_ids = if c > 0 {
            let flat: Vec<u32> = self.char_ids.iter().flatten().flatten().copied().collect();
            Some(Tensor::from_vec(flat, (b, t, c), device)?)
        } else {
            None
        };

        let tag_ids = match &self.tag_ids {
            Some(tags) => Some(Tensor::from_vec(flatten(tags), (b, t), device)?),
            None => None,
        };

        Ok(BatchTensors {
            word_ids,
            char_ids,
            tag_ids,
        })
    }
}

fn flatten(rows: &[Vec<u32>]) -> Vec<u32> {
    rows.iter().flatten().copied().collect()
}

/// Right-pad every row with [`PAD`] to the longest row.
pub(crate) fn pad_sequences(rows: Vec<Vec<u32>>) -> Vec<Vec<u32>> {
    let max_len = rows.iter().map(Vec::len).max().unwrap_or(0);
    rows.into_iter()
        .map(|mut row| {
            row.resize(max_len, PAD);
            row
        })
        .collect()
}

/// Pad char ids to `[batch][max_len][max_word_len]`.
pub(crate) fn pad_chars(rows: Vec<Vec<Vec<u32>>>, max_len: usize) -> Vec<Vec<Vec<u32>>> {
    let max_word_len = rows
        .iter()
        .flat_map(|sentence| sentence.iter().map(Vec::len))
        .max()
        .unwrap_or(0);

    rows.into_iter()
        .map(|mut sentence| {
            for word in sentence.iter_mut() {
                word.resize(max_word_len, PAD);
            }
            sentence.resize(max_len, vec![PAD; max_word_len]);
            sentence
        })
        .collect()
}
