//! # Tag Chunking
//!
//! Groups per-token tags into entity spans. Understands the common prefix
//! schemes (IOB1, IOB2, IOE, IOBES/BILOU); tags without a prefix are treated
//! as single-type runs, so contiguous equal tags merge into one entity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a token inside a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    Begin,
    Inside,
    End,
    Single,
    Outside,
}

/// A tag split into its prefix and entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTag<'a> {
    pub prefix: Prefix,
    pub entity_type: &'a str,
}

impl<'a> ParsedTag<'a> {
    /// Split `B-PER` into `(Begin, "PER")`. `O` is outside; a tag without a
    /// recognised prefix is an inside token of its own type.
    pub fn parse(tag: &'a str) -> Self {
        if tag == "O" {
            return Self {
                prefix: Prefix::Outside,
                entity_type: "",
            };
        }

        let split = tag.split_once('-').or_else(|| tag.split_once('_'));
        if let Some((head, rest)) = split {
            let prefix = match head {
                "B" => Some(Prefix::Begin),
                "I" => Some(Prefix::Inside),
                "E" | "L" => Some(Prefix::End),
                "S" | "U" => Some(Prefix::Single),
                _ => None,
            };
            if let Some(prefix) = prefix {
                return Self {
                    prefix,
                    entity_type: rest,
                };
            }
        }

        Self {
            prefix: Prefix::Inside,
            entity_type: tag,
        }
    }
}

/// A typed span over token positions, `end` exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}..{})", self.entity_type, self.start, self.end)
    }
}

fn end_of_chunk(prev: ParsedTag<'_>, curr: ParsedTag<'_>) -> bool {
    use Prefix::*;
    match (prev.prefix, curr.prefix) {
        (End | Single, _) => true,
        (Begin | Inside, Begin | Single | Outside) => true,
        (Outside, _) => false,
        _ => prev.entity_type != curr.entity_type,
    }
}

fn start_of_chunk(prev: ParsedTag<'_>, curr: ParsedTag<'_>) -> bool {
    use Prefix::*;
    match (prev.prefix, curr.prefix) {
        (_, Begin | Single) => true,
        (End | Single | Outside, End | Inside) => true,
        (_, Outside) => false,
        _ => prev.entity_type != curr.entity_type,
    }
}

/// Extract entity chunks from a tag sequence.
///
/// # Examples
/// ```
/// use seqtag_core::tags::get_entities;
///
/// let chunks = get_entities(&["B-PER", "I-PER", "O", "B-LOC"]);
/// assert_eq!(chunks.len(), 2);
/// assert_eq!((chunks[0].start, chunks[0].end), (0, 2));
/// assert_eq!(chunks[1].entity_type, "LOC");
/// ```
pub fn get_entities<S: AsRef<str>>(tags: &[S]) -> Vec<Chunk> {
    let outside = ParsedTag::parse("O");
    let mut chunks = Vec::new();
    let mut prev = outside;
    let mut begin = 0;

    let parsed = tags.iter().map(|t| ParsedTag::parse(t.as_ref())).chain([outside]);
    for (i, curr) in parsed.enumerate() {
        if end_of_chunk(prev, curr) {
            chunks.push(Chunk {
                entity_type: prev.entity_type.to_string(),
                start: begin,
                end: i,
            });
        }
        if start_of_chunk(prev, curr) {
            begin = i;
        }
        prev = curr;
    }

    chunks
}
