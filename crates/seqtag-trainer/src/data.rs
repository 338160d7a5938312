//! Data loading for CoNLL-style tagged text.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use seqtag_core::{Result, SeqTagError};
use tracing::{debug, warn};

/// Parallel token and tag sequences read from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub sentences: Vec<Vec<String>>,
    pub labels: Vec<Vec<String>>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    fn push(&mut self, tokens: &mut Vec<String>, tags: &mut Vec<String>) {
        if !tokens.is_empty() {
            self.sentences.push(std::mem::take(tokens));
            self.labels.push(std::mem::take(tags));
        }
    }
}

/// Load a dataset in CoNLL format.
///
/// One `token<TAB>tag` per line; whitespace-separated columns are also
/// accepted, in which case the first column is the token and the last is
/// the tag. Blank lines end a sentence, `-DOCSTART-` and `#` lines are
/// skipped.
pub fn load_conll<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut dataset = Dataset::default();
    let mut tokens = Vec::new();
    let mut tags = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim_end_matches(['\r', '\n']);

        if line.trim().is_empty() {
            dataset.push(&mut tokens, &mut tags);
            continue;
        }
        if line.starts_with('#') || line.starts_with("-DOCSTART-") {
            continue;
        }

        let (token, tag) = split_columns(line).ok_or_else(|| SeqTagError::InvalidData {
            line: index + 1,
            reason: format!("expected a token and a tag, got {line:?}"),
        })?;
        tokens.push(token.to_string());
        tags.push(tag.to_string());
    }
    dataset.push(&mut tokens, &mut tags);

    if dataset.is_empty() {
        warn!(path = %path.display(), "dataset contains no sentences");
    }
    debug!(path = %path.display(), sentences = dataset.len(), "loaded dataset");
    Ok(dataset)
}

fn split_columns(line: &str) -> Option<(&str, &str)> {
    if let Some((token, tag)) = line.split_once('\t') {
        let tag = tag.rsplit('\t').next().unwrap_or(tag).trim();
        let token = token.trim();
        return (!token.is_empty() && !tag.is_empty()).then_some((token, tag));
    }

    let mut columns = line.split_whitespace();
    let token = columns.next()?;
    let tag = columns.next_back()?;
    Some((token, tag))
}
