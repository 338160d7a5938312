//! # Tokenizer
//!
//! Splits raw text into word and punctuation tokens for tagging, keeping
//! byte offsets so entities can be mapped back onto the input.

use std::sync::LazyLock;

use regex::Regex;

/// A token extracted from text with positional information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The token text, exactly as it appears in the input
    pub text: String,
    /// Start byte offset in the original string
    pub start: usize,
    /// End byte offset in the original string
    pub end: usize,
}

/// Words (with inner hyphens/apostrophes) or single punctuation marks.
static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+(?:[-']\w+)*|[^\w\s]").expect("static token pattern"));

/// Regex tokenizer for free text.
#[derive(Debug, Clone, Default)]
pub struct Tokenizer;

impl Tokenizer {
    /// Create a new tokenizer instance.
    pub fn new() -> Self {
        Self
    }

    /// Tokenize `input` into words and punctuation.
    ///
    /// # Examples
    /// ```
    /// use seqtag_core::tokenizer::Tokenizer;
    ///
    /// let tokens = Tokenizer::new().tokenize("John lives in Paris.");
    /// let words: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
    /// assert_eq!(words, ["John", "lives", "in", "Paris", "."]);
    /// ```
    pub fn tokenize(&self, input: &str) -> Vec<Token> {
        TOKEN_RE
            .find_iter(input)
            .map(|m| Token {
                text: m.as_str().to_string(),
                start: m.start(),
                end: m.end(),
            })
            .collect()
    }

    /// Get the original byte span covering tokens `start_idx..end_idx`.
    pub fn get_spans(
        &self,
        tokens: &[Token],
        start_idx: usize,
        end_idx: usize,
    ) -> Option<(usize, usize)> {
        if start_idx >= tokens.len() || end_idx > tokens.len() || start_idx >= end_idx {
            return None;
        }

        let start = tokens[start_idx].start;
        let end = tokens[end_idx - 1].end;
        Some((start, end))
    }
}
