//! # seqtag Trainer
//!
//! CoNLL-style data loading and the mini-batch training loop that drives
//! any [`seqtag_core::SequenceModel`].

pub mod data;
pub mod trainer;

pub use data::{Dataset, load_conll};
pub use trainer::{EpochStats, Trainer, TrainingReport};
