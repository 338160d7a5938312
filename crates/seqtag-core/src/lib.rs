//! # seqtag Core
//!
//! Building blocks for neural sequence labeling: vocabularies, the
//! [`WordPreprocessor`], pretrained embedding alignment, a candle-backed
//! BiLSTM-CRF model, entity chunking and entity-level metrics.
//!
//! ## Quick Start
//!
//! ```rust
//! use seqtag_core::{PreprocessorConfig, WordPreprocessor};
//!
//! let x = vec![vec!["John".to_string(), "lives".to_string(), "in".to_string(), "Paris".to_string()]];
//! let y = vec![vec!["B-PER".to_string(), "O".to_string(), "O".to_string(), "B-LOC".to_string()]];
//!
//! let p = WordPreprocessor::fit(PreprocessorConfig::default(), &x, &y).unwrap();
//! let batch = p.transform(&x, Some(y.as_slice())).unwrap();
//!
//! assert_eq!(batch.lengths, vec![4]);
//! assert_ne!(p.word_vocab().lookup("john"), p.word_vocab().lookup("paris"));
//! ```
pub mod config;
pub mod embeddings;
pub mod error;
pub mod evaluator;
pub mod metrics;
pub mod model;
pub mod preprocess;
pub mod tagger;
pub mod tags;
pub mod tokenizer;
pub mod vocab;

// Re-export primary API
pub use config::{ModelConfig, OptimizerKind, TrainingConfig};
pub use embeddings::{EmbeddingInit, EmbeddingMatrix, EmbeddingTable, OovInit, filter_embeddings};
pub use error::{Result, SeqTagError};
pub use evaluator::Evaluator;
pub use metrics::{Metrics, Score};
pub use model::{Prediction, SeqLabeling, SequenceModel, ViterbiDecoder};
pub use preprocess::{Batch, PreprocessorConfig, WordPreprocessor};
pub use tagger::{Analysis, Entity, Tagger};
pub use tags::{Chunk, get_entities};
pub use tokenizer::{Token, Tokenizer};
pub use vocab::{PAD, TextPolicy, UNK, Vocabularies, Vocabulary, VocabularyBuilder};
