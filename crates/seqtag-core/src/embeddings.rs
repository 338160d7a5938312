//! # Embedding Filter
//!
//! Aligns a pretrained `word → vector` table to word-vocabulary ids. Rows for
//! words the table knows are copied; every other row except padding is drawn
//! from a seeded distribution so the result is reproducible.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SeqTagError};
use crate::vocab::{PAD, Vocabulary};

/// Pretrained vectors with one fixed dimensionality.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingTable {
    dim: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingTable {
    /// Empty table with dimensionality `dim`.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            vectors: HashMap::new(),
        }
    }

    /// Build from `(word, vector)` pairs; the first vector fixes the dimension.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let mut pairs = pairs.into_iter().peekable();
        let dim = pairs.peek().map_or(0, |(_, v)| v.len());
        let mut table = Self::new(dim);
        for (word, vector) in pairs {
            table.insert(word, vector)?;
        }
        Ok(table)
    }

    /// Read the GloVe text format: `word v1 v2 ... vn` per line.
    pub fn load_glove<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut table: Option<Self> = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            let vector = parts
                .map(|v| {
                    v.parse::<f32>().map_err(|e| SeqTagError::InvalidEmbedding {
                        line: line_no + 1,
                        reason: format!("{v:?}: {e}"),
                    })
                })
                .collect::<Result<Vec<f32>>>()?;
            if vector.is_empty() {
                return Err(SeqTagError::InvalidEmbedding {
                    line: line_no + 1,
                    reason: format!("no vector values for {word:?}"),
                });
            }

            table
                .get_or_insert_with(|| Self::new(vector.len()))
                .insert(word, vector)?;
        }

        let table = table.unwrap_or_default();
        info!(
            path = %path.as_ref().display(),
            words = table.len(),
            dim = table.dim(),
            "loaded embeddings"
        );
        Ok(table)
    }

    /// Insert a vector, rejecting lengths that differ from the table dimension.
    pub fn insert(&mut self, word: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        let word = word.into();
        if vector.len() != self.dim {
            return Err(SeqTagError::DimensionMismatch {
                word,
                expected: self.dim,
                found: vector.len(),
            });
        }
        self.vectors.insert(word, vector);
        Ok(())
    }

    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.vectors.get(word).map(Vec::as_slice)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Mean and population standard deviation over every stored value.
    fn moments(&self) -> Option<(f32, f32)> {
        let count = self.vectors.len() * self.dim;
        if count == 0 {
            return None;
        }
        let values = || self.vectors.values().flatten().map(|&v| v as f64);
        let mean = values().sum::<f64>() / count as f64;
        let var = values().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        Some((mean as f32, var.sqrt() as f32))
    }
}

/// How rows without a pretrained vector are initialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OovInit {
    /// Uniform with the table's mean and standard deviation
    /// (`mean ± sqrt(3)·std`). Falls back to `Uniform { scale: sqrt(3 / dim) }`
    /// when the table is empty or constant.
    MatchTable,
    /// Uniform in `[-scale, scale]`.
    Uniform { scale: f32 },
    /// Leave the rows at zero.
    Zeros,
}

/// Out-of-vocabulary policy plus the seed that makes it reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingInit {
    pub oov: OovInit,
    pub seed: u64,
}

impl Default for EmbeddingInit {
    fn default() -> Self {
        Self {
            oov: OovInit::MatchTable,
            seed: 42,
        }
    }
}

impl EmbeddingInit {
    pub fn with_oov(mut self, oov: OovInit) -> Self {
        self.oov = oov;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Dense row-major `rows × dim` matrix indexed by word id.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    pub fn zeros(rows: usize, dim: usize) -> Self {
        Self {
            rows,
            dim,
            data: vec![0.0; rows * dim],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Row for `id`, if in range.
    pub fn row(&self, id: u32) -> Option<&[f32]> {
        let start = id as usize * self.dim;
        self.data.get(start..start + self.dim)
    }

    fn row_mut(&mut self, id: usize) -> &mut [f32] {
        let start = id * self.dim;
        &mut self.data[start..start + self.dim]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Candle `(rows, dim)` f32 tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.data, (self.rows, self.dim), device)?)
    }
}

/// Build the embedding matrix for `vocab` from `table`.
///
/// Row [`PAD`] stays zero. Known words get an exact copy of their vector;
/// every other row (including `UNK`) follows `init.oov`.
///
/// A `Uniform` scale that is zero, negative or not finite is rejected with
/// [`SeqTagError::InvalidConfig`].
pub fn filter_embeddings(
    table: &EmbeddingTable,
    vocab: &Vocabulary,
    init: &EmbeddingInit,
) -> Result<EmbeddingMatrix> {
    let dim = table.dim();
    let mut matrix = EmbeddingMatrix::zeros(vocab.len(), dim);
    let mut rng = oorandom::Rand32::new(init.seed);

    let (low, high) = match init.oov {
        OovInit::Zeros => (0.0, 0.0),
        OovInit::Uniform { scale } => {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(SeqTagError::InvalidConfig(format!(
                    "uniform OOV scale must be positive and finite, got {scale}"
                )));
            }
            (-scale, scale)
        }
        OovInit::MatchTable => match table.moments() {
            Some((mean, std)) if std.is_finite() && mean.is_finite() && std > 0.0 => {
                let half = 3f32.sqrt() * std;
                (mean - half, mean + half)
            }
            _ => {
                let scale = (3.0 / dim.max(1) as f32).sqrt();
                (-scale, scale)
            }
        },
    };

    let mut known = 0usize;
    for (id, word) in vocab.iter() {
        if id == PAD {
            continue;
        }
        let row = matrix.row_mut(id as usize);
        match table.get(word) {
            Some(vector) => {
                row.copy_from_slice(vector);
                known += 1;
            }
            None if init.oov != OovInit::Zeros => {
                for value in row.iter_mut() {
                    *value = sample(&mut rng, low, high);
                }
            }
            None => {}
        }
    }

    debug!(
        rows = matrix.rows(),
        dim,
        known,
        oov = vocab.len().saturating_sub(known + 1),
        "filtered embeddings"
    );
    Ok(matrix)
}

/// Uniform draw in `[low, high)`, never exactly zero. `low < high` must hold.
fn sample(rng: &mut oorandom::Rand32, low: f32, high: f32) -> f32 {
    loop {
        let value = low + (high - low) * rng.rand_float();
        if value != 0.0 {
            return value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(words: &[&str]) -> Vocabulary {
        let mut vocab = Vocabulary::new();
        for word in words {
            vocab.insert(word);
        }
        vocab
    }

    fn john_paris() -> EmbeddingTable {
        EmbeddingTable::from_pairs([("john", vec![1.0, 0.0]), ("paris", vec![0.0, 1.0])]).unwrap()
    }

    #[test]
    fn test_shape_and_known_rows() {
        let vocab = vocab(&["john", "lives", "in", "paris"]);
        let matrix = filter_embeddings(&john_paris(), &vocab, &EmbeddingInit::default()).unwrap();

        assert_eq!(matrix.rows(), vocab.len());
        assert_eq!(matrix.dim(), 2);
        assert_eq!(matrix.row(vocab.lookup("john")).unwrap(), &[1.0, 0.0]);
        assert_eq!(matrix.row(vocab.lookup("paris")).unwrap(), &[0.0, 1.0]);
        assert_eq!(matrix.row(PAD).unwrap(), &[0.0, 0.0]);
    }

    #[test]
    fn test_oov_rows_are_distinct_from_known_vectors() {
        let vocab = vocab(&["john", "lives", "in", "paris"]);
        let matrix = filter_embeddings(&john_paris(), &vocab, &EmbeddingInit::default()).unwrap();

        for word in ["lives", "in"] {
            let row = matrix.row(vocab.lookup(word)).unwrap();
            assert_ne!(row, &[1.0, 0.0]);
            assert_ne!(row, &[0.0, 1.0]);
            assert!(row.iter().all(|&v| v != 0.0));
        }
        assert_ne!(
            matrix.row(vocab.lookup("lives")).unwrap(),
            matrix.row(vocab.lookup("in")).unwrap()
        );
    }

    #[test]
    fn test_seeded_reproducibility() {
        let vocab = vocab(&["john", "lives", "in", "paris"]);
        let init = EmbeddingInit::default().with_seed(7);
        let a = filter_embeddings(&john_paris(), &vocab, &init).unwrap();
        let b = filter_embeddings(&john_paris(), &vocab, &init).unwrap();
        assert_eq!(a, b);

        let c = filter_embeddings(&john_paris(), &vocab, &init.with_seed(8)).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_match_table_range() {
        // values {1, 0, 0, 1}: mean 0.5, std 0.5
        let vocab = vocab(&["a", "b", "c"]);
        let matrix = filter_embeddings(&john_paris(), &vocab, &EmbeddingInit::default()).unwrap();
        let half = 3f32.sqrt() * 0.5;
        for &v in &matrix.as_slice()[2..] {
            assert!(v >= 0.5 - half && v < 0.5 + half, "{v} out of range");
        }
    }

    #[test]
    fn test_uniform_and_zeros_policies() {
        let vocab = vocab(&["x", "y"]);
        let init = EmbeddingInit::default().with_oov(OovInit::Uniform { scale: 0.1 });
        let matrix = filter_embeddings(&john_paris(), &vocab, &init).unwrap();
        assert!(matrix.as_slice().iter().all(|v| v.abs() <= 0.1));

        let init = EmbeddingInit::default().with_oov(OovInit::Zeros);
        let matrix = filter_embeddings(&john_paris(), &vocab, &init).unwrap();
        assert!(matrix.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_degenerate_uniform_scale_is_rejected() {
        let vocab = vocab(&["x", "y"]);
        for scale in [0.0, -0.1, f32::NAN, f32::INFINITY] {
            let init = EmbeddingInit::default().with_oov(OovInit::Uniform { scale });
            let err = filter_embeddings(&john_paris(), &vocab, &init).unwrap_err();
            assert!(matches!(err, SeqTagError::InvalidConfig(_)), "scale {scale}");
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = EmbeddingTable::from_pairs([("a", vec![1.0, 2.0]), ("b", vec![1.0])]).unwrap_err();
        assert!(matches!(
            err,
            SeqTagError::DimensionMismatch { expected: 2, found: 1, .. }
        ));
    }

    #[test]
    fn test_load_glove() {
        let path = std::env::temp_dir().join(format!("seqtag-{}-glove.txt", std::process::id()));
        std::fs::write(&path, "paris 0.1 0.2 0.3\n\njohn -1 0 1.5\n").unwrap();
        let table = EmbeddingTable::load_glove(&path).unwrap();
        assert_eq!(table.dim(), 3);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("john").unwrap(), &[-1.0, 0.0, 1.5]);

        std::fs::write(&path, "paris 0.1 0.2\njohn 1\n").unwrap();
        let err = EmbeddingTable::load_glove(&path).unwrap_err();
        assert!(matches!(err, SeqTagError::DimensionMismatch { .. }));

        std::fs::write(&path, "paris 0.1 abc\n").unwrap();
        let err = EmbeddingTable::load_glove(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, SeqTagError::InvalidEmbedding { line: 1, .. }));
    }

    #[test]
    fn test_to_tensor() {
        let vocab = vocab(&["john"]);
        let matrix = filter_embeddings(&john_paris(), &vocab, &EmbeddingInit::default()).unwrap();
        let tensor = matrix.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[3, 2]);
    }
}
