//! # Word Preprocessor
//!
//! Turns token sequences into padded id tensors using training-time
//! vocabularies, and persists those vocabularies so inference maps tokens to
//! exactly the same ids.

mod batch;

pub use batch::{Batch, BatchTensors};

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SeqTagError};
use crate::vocab::{PAD, TextPolicy, UNK, UNK_TOKEN, Vocabularies, Vocabulary, VocabularyBuilder};
use batch::{pad_chars, pad_sequences};

/// Format tag written into persisted preprocessors.
pub const PREPROCESSOR_FORMAT: &str = "seqtag-preprocessor";
/// Current persisted preprocessor version.
pub const PREPROCESSOR_VERSION: u32 = 1;

/// Preprocessing options. Persisted alongside the vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessorConfig {
    /// Word normalization before vocabulary lookup.
    pub policy: TextPolicy,
    /// Emit character ids per word.
    pub char_feature: bool,
    /// Truncate each word's characters to this many ids.
    pub max_char_len: Option<usize>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            policy: TextPolicy::default(),
            char_feature: true,
            max_char_len: None,
        }
    }
}

impl PreprocessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower-case words before lookup.
    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.policy.lowercase = lowercase;
        self
    }

    /// Map every ASCII digit to `0` before lookup.
    pub fn with_digit_normalization(mut self, enabled: bool) -> Self {
        self.policy.normalize_digits = enabled;
        self
    }

    /// Enable or disable character ids.
    pub fn with_char_feature(mut self, enabled: bool) -> Self {
        self.char_feature = enabled;
        self
    }

    /// Cap the number of character ids per word.
    pub fn with_max_char_len(mut self, max_char_len: Option<usize>) -> Self {
        self.max_char_len = max_char_len;
        self
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedPreprocessor {
    format: String,
    version: u32,
    config: PreprocessorConfig,
    vocab: Vocabularies,
}

/// Converts sentences into [`Batch`]es with a fitted, immutable vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordPreprocessor {
    config: PreprocessorConfig,
    vocab: Vocabularies,
}

impl WordPreprocessor {
    /// Fit vocabularies on labeled training sentences.
    pub fn fit<S, L>(config: PreprocessorConfig, sentences: &[S], labels: &[L]) -> Result<Self>
    where
        S: AsRef<[String]>,
        L: AsRef<[String]>,
    {
        let vocab = VocabularyBuilder::new(config.policy).build(sentences, labels)?;
        info!(
            words = vocab.words.len(),
            chars = vocab.chars.len(),
            tags = vocab.tags.len(),
            sentences = sentences.len(),
            "fitted preprocessor"
        );
        Ok(Self { config, vocab })
    }

    /// Convert sentences (and optionally their labels) into a padded batch.
    ///
    /// Unseen words and characters map to [`UNK`]; an unseen label is an
    /// error because the tag set is closed at training time.
    pub fn transform<S, L>(&self, sentences: &[S], labels: Option<&[L]>) -> Result<Batch>
    where
        S: AsRef<[String]>,
        L: AsRef<[String]>,
    {
        let mut word_rows = Vec::with_capacity(sentences.len());
        let mut char_rows = Vec::with_capacity(sentences.len());
        let mut lengths = Vec::with_capacity(sentences.len());

        for sentence in sentences {
            let sentence = sentence.as_ref();
            word_rows.push(
                sentence
                    .iter()
                    .map(|w| self.vocab.words.lookup(&self.config.policy.normalize(w)))
                    .collect::<Vec<_>>(),
            );
            if self.config.char_feature {
                char_rows.push(sentence.iter().map(|w| self.char_ids(w)).collect::<Vec<_>>());
            } else {
                char_rows.push(Vec::new());
            }
            lengths.push(sentence.len());
        }

        let tag_ids = match labels {
            Some(labels) => Some(pad_sequences(self.tag_rows(sentences, labels)?)),
            None => None,
        };

        let word_ids = pad_sequences(word_rows);
        let max_len = word_ids.first().map_or(0, Vec::len);
        let char_ids = if self.config.char_feature {
            pad_chars(char_rows, max_len)
        } else {
            char_rows
        };

        debug!(sentences = sentences.len(), max_len, "transformed batch");
        Ok(Batch {
            word_ids,
            char_ids,
            tag_ids,
            lengths,
        })
    }

    fn char_ids(&self, word: &str) -> Vec<u32> {
        let mut buf = [0u8; 4];
        let ids = word
            .chars()
            .map(|c| self.vocab.chars.lookup(c.encode_utf8(&mut buf)));
        match self.config.max_char_len {
            Some(limit) => ids.take(limit).collect(),
            None => ids.collect(),
        }
    }

    fn tag_rows<S, L>(&self, sentences: &[S], labels: &[L]) -> Result<Vec<Vec<u32>>>
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

        sentences
            .iter()
            .zip(labels)
            .map(|(sentence, sentence_labels)| {
                let sentence_labels = sentence_labels.as_ref();
                if sentence.as_ref().len() != sentence_labels.len() {
                    return Err(SeqTagError::LengthMismatch {
                        what: "tokens vs labels in a sentence",
                        expected: sentence.as_ref().len(),
                        found: sentence_labels.len(),
                    });
                }
                sentence_labels
                    .iter()
                    .map(|label| self.tag_id(label))
                    .collect()
            })
            .collect()
    }

    /// Id of a training-time tag.
    pub fn tag_id(&self, label: &str) -> Result<u32> {
        match self.vocab.tags.get(label) {
            Some(id) if id != PAD && id != UNK => Ok(id),
            _ => Err(SeqTagError::MissingLabel {
                label: label.to_string(),
            }),
        }
    }

    /// Map predicted tag ids back to tag strings, cut to each true length.
    pub fn inverse_transform(&self, tag_ids: &[Vec<u32>], lengths: &[usize]) -> Result<Vec<Vec<String>>> {
        if tag_ids.len() != lengths.len() {
            return Err(SeqTagError::LengthMismatch {
                what: "tag rows vs lengths",
                expected: lengths.len(),
                found: tag_ids.len(),
            });
        }

        tag_ids
            .iter()
            .zip(lengths)
            .map(|(row, &len)| {
                row.iter()
                    .take(len)
                    .map(|&id| {
                        self.vocab
                            .tags
                            .token(id)
                            .map(str::to_string)
                            .ok_or_else(|| SeqTagError::MissingLabel {
                                label: format!("#{id}"),
                            })
                    })
                    .collect()
            })
            .collect()
    }

    /// Map word ids back to (normalized) vocabulary tokens.
    pub fn inverse_words(&self, word_ids: &[u32]) -> Vec<String> {
        word_ids
            .iter()
            .map(|&id| self.vocab.words.token(id).unwrap_or(UNK_TOKEN).to_string())
            .collect()
    }

    pub fn word_vocab(&self) -> &Vocabulary {
        &self.vocab.words
    }

    pub fn char_vocab(&self) -> &Vocabulary {
        &self.vocab.chars
    }

    pub fn tag_vocab(&self) -> &Vocabulary {
        &self.vocab.tags
    }

    pub fn config(&self) -> &PreprocessorConfig {
        &self.config
    }

    /// Persist config and vocabularies as schema-tagged JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let persisted = PersistedPreprocessor {
            format: PREPROCESSOR_FORMAT.to_string(),
            version: PREPROCESSOR_VERSION,
            config: self.config,
            vocab: self.vocab.clone(),
        };
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(&mut writer, &persisted)?;
        writer.flush()?;
        info!(path = %path.as_ref().display(), "saved preprocessor");
        Ok(())
    }

    /// Load a preprocessor written by [`WordPreprocessor::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let persisted: PersistedPreprocessor = serde_json::from_reader(reader)?;
        if persisted.format != PREPROCESSOR_FORMAT || persisted.version != PREPROCESSOR_VERSION {
            return Err(SeqTagError::UnsupportedFormat {
                format: persisted.format,
                version: persisted.version,
            });
        }
        info!(path = %path.as_ref().display(), "loaded preprocessor");
        Ok(Self {
            config: persisted.config,
            vocab: persisted.vocab,
        })
    }
}
