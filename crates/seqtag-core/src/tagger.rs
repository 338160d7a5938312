//! # Tagger
//!
//! Runs a model over one sentence and assembles typed entities from the
//! predicted tags.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Prediction, SequenceModel};
use crate::preprocess::WordPreprocessor;
use crate::tags::get_entities;
use crate::tokenizer::{Token, Tokenizer};

/// An extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Mean model probability over the entity's tokens.
    pub score: f32,
    /// First token index.
    pub begin_token: usize,
    /// One past the last token index.
    pub end_token: usize,
    /// Byte offsets into the analyzed text, when it came from raw text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin_offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<usize>,
}

/// Tagging result for one sentence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub words: Vec<String>,
    pub tags: Vec<String>,
    pub entities: Vec<Entity>,
}

/// Tags single sentences with a trained model.
pub struct Tagger<'a, M> {
    model: &'a M,
    preprocessor: &'a WordPreprocessor,
    tokenizer: Tokenizer,
}

impl<'a, M: SequenceModel> Tagger<'a, M> {
    pub fn new(model: &'a M, preprocessor: &'a WordPreprocessor) -> Self {
        Self {
            model,
            preprocessor,
            tokenizer: Tokenizer::new(),
        }
    }

    /// Tag a tokenized sentence.
    pub fn analyze<S: AsRef<str>>(&self, words: &[S]) -> Result<Analysis> {
        let words: Vec<String> = words.iter().map(|w| w.as_ref().to_string()).collect();
        self.analyze_words(words, None)
    }

    /// Tokenize raw text, then tag it; entities carry byte offsets.
    pub fn analyze_text(&self, text: &str) -> Result<Analysis> {
        let tokens = self.tokenizer.tokenize(text);
        let words = tokens.iter().map(|t| t.text.clone()).collect();
        self.analyze_words(words, Some(&tokens))
    }

    fn analyze_words(&self, words: Vec<String>, tokens: Option<&[Token]>) -> Result<Analysis> {
        if words.is_empty() {
            return Ok(Analysis {
                words,
                tags: Vec::new(),
                entities: Vec::new(),
            });
        }

        let sentences = [words];
        let batch = self.preprocessor.transform::<_, Vec<String>>(&sentences, None)?;
        let [words] = sentences;
        let prediction = self
            .model
            .predict(&batch)?
            .into_iter()
            .next()
            .unwrap_or_else(|| Prediction {
                tag_ids: Vec::new(),
                scores: Vec::new(),
            });
        let tags = self
            .preprocessor
            .inverse_transform(&[prediction.tag_ids], &[words.len()])?
            .into_iter()
            .next()
            .unwrap_or_default();

        let entities = get_entities(&tags)
            .into_iter()
            .map(|chunk| {
                let span = chunk.start..chunk.end;
                let scores = prediction.scores.get(span.clone()).unwrap_or(&[]);
                let score = if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().sum::<f32>() / scores.len() as f32
                };
                let offsets = tokens.and_then(|t| self.tokenizer.get_spans(t, chunk.start, chunk.end));
                Entity {
                    text: words[span].join(" "),
                    entity_type: chunk.entity_type,
                    score,
                    begin_token: chunk.start,
                    end_token: chunk.end,
                    begin_offset: offsets.map(|(start, _)| start),
                    end_offset: offsets.map(|(_, end)| end),
                }
            })
            .collect();

        Ok(Analysis {
            words,
            tags,
            entities,
        })
    }
}
