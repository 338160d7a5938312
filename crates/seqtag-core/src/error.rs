use thiserror::Error;

/// Errors that can occur during seqtag operations.
#[derive(Debug, Error)]
pub enum SeqTagError {
    /// `eval` / `analyze` / `save` was called before a model was trained or loaded.
    #[error("could not find a model; call train() or Sequence::load(dir) first")]
    ModelNotFound,

    /// A tag that is not part of the closed, training-time tag set.
    #[error("label {label:?} is not in the tag vocabulary")]
    MissingLabel {
        /// The unseen label.
        label: String,
    },

    /// A training label spelled like a reserved tag (`<pad>` / `<unk>`).
    #[error("label {label:?} is reserved and cannot be used as a tag")]
    ReservedLabel {
        /// The offending label.
        label: String,
    },

    /// An embedding vector whose length differs from the table dimension.
    #[error("embedding for {word:?} has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        /// The word carrying the offending vector.
        word: String,
        /// Dimension fixed by the table.
        expected: usize,
        /// Dimension of the offending vector.
        found: usize,
    },

    /// Two parallel inputs (sentences/labels, tokens/tags) disagree in length.
    #[error("{what}: expected {expected} items, found {found}")]
    LengthMismatch {
        /// Which pair of inputs disagreed.
        what: &'static str,
        /// Length of the reference input.
        expected: usize,
        /// Length of the mismatching input.
        found: usize,
    },

    /// A persisted artifact carries a format tag or version this build cannot read.
    #[error("unsupported artifact format {format:?} (version {version})")]
    UnsupportedFormat {
        /// Format tag found in the file.
        format: String,
        /// Version found in the file.
        version: u32,
    },

    /// A pretrained embedding file could not be parsed.
    #[error("invalid embedding file at line {line}: {reason}")]
    InvalidEmbedding {
        /// One-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// A training data file could not be parsed.
    #[error("invalid data at line {line}: {reason}")]
    InvalidData {
        /// One-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem failure, propagated unchanged.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Candle ML framework error.
    #[error("ML framework error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for seqtag operations.
pub type Result<T> = std::result::Result<T, SeqTagError>;
