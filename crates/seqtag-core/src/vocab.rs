//! # Vocabularies
//!
//! Dense token → id mappings for words, characters and tags. Ids are handed
//! out in insertion order starting after the reserved `PAD` and `UNK` slots,
//! so the same input order always yields the same ids.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SeqTagError};

/// Id reserved for padding in every vocabulary.
pub const PAD: u32 = 0;
/// Id reserved for out-of-vocabulary tokens in every vocabulary.
pub const UNK: u32 = 1;

/// Token stored at [`PAD`].
pub const PAD_TOKEN: &str = "<pad>";
/// Token stored at [`UNK`].
pub const UNK_TOKEN: &str = "<unk>";

/// An insertion-ordered token ↔ id mapping.
///
/// Serializes as the ordered token list (index = id), which keeps the
/// persisted form independent of hash ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    token_to_id: HashMap<String, u32>,
    id_to_token: Vec<String>,
}

impl Vocabulary {
    /// Create a vocabulary holding only the reserved tokens.
    pub fn new() -> Self {
        let mut vocab = Self {
            token_to_id: HashMap::new(),
            id_to_token: Vec::new(),
        };
        vocab.insert(PAD_TOKEN);
        vocab.insert(UNK_TOKEN);
        vocab
    }

    /// Rebuild a vocabulary from its ordered token list.
    ///
    /// The list must start with the reserved tokens and contain no duplicates.
    pub fn from_tokens<I, S>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut token_to_id = HashMap::new();
        let mut id_to_token = Vec::new();

        for token in tokens {
            let token = token.into();
            let id = id_to_token.len() as u32;
            if token_to_id.insert(token.clone(), id).is_some() {
                return Err(SeqTagError::InvalidConfig(format!(
                    "duplicate vocabulary entry {token:?}"
                )));
            }
            id_to_token.push(token);
        }

        let reserved_ok = id_to_token.first().map(String::as_str) == Some(PAD_TOKEN)
            && id_to_token.get(1).map(String::as_str) == Some(UNK_TOKEN);
        if !reserved_ok {
            return Err(SeqTagError::InvalidConfig(
                "vocabulary must start with the <pad> and <unk> entries".into(),
            ));
        }

        Ok(Self {
            token_to_id,
            id_to_token,
        })
    }

    /// Insert `token`, returning its id. Existing tokens keep their id, so
    /// inserting [`PAD_TOKEN`] or [`UNK_TOKEN`] returns the reserved id.
    pub fn insert(&mut self, token: &str) -> u32 {
        if let Some(&id) = self.token_to_id.get(token) {
            return id;
        }
        let id = self.id_to_token.len() as u32;
        self.token_to_id.insert(token.to_string(), id);
        self.id_to_token.push(token.to_string());
        id
    }

    /// Exact lookup.
    pub fn get(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    /// Lookup falling back to [`UNK`].
    pub fn lookup(&self, token: &str) -> u32 {
        self.get(token).unwrap_or(UNK)
    }

    /// Inverse lookup.
    pub fn token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    /// Number of ids, reserved slots included.
    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    /// True when only the reserved tokens are present.
    pub fn is_empty(&self) -> bool {
        self.id_to_token.len() <= 2
    }

    /// Tokens in id order, reserved slots included.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.id_to_token
            .iter()
            .enumerate()
            .map(|(id, token)| (id as u32, token.as_str()))
    }

    /// Tokens in id order.
    pub fn tokens(&self) -> &[String] {
        &self.id_to_token
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for Vocabulary {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.id_to_token.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Vocabulary {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tokens = Vec::<String>::deserialize(deserializer)?;
        Vocabulary::from_tokens(tokens).map_err(serde::de::Error::custom)
    }
}

/// Word normalization applied before word-vocabulary lookup.
///
/// The same policy is used at fit and transform time; it is persisted with
/// the preprocessor so a reloaded model normalizes identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPolicy {
    /// Lower-case words before lookup.
    pub lowercase: bool,
    /// Replace every ASCII digit with `0`.
    pub normalize_digits: bool,
}

impl Default for TextPolicy {
    fn default() -> Self {
        Self {
            lowercase: true,
            normalize_digits: true,
        }
    }
}

impl TextPolicy {
    /// Normalize a word for the word vocabulary.
    pub fn normalize(&self, word: &str) -> String {
        let word = if self.lowercase {
            word.to_lowercase()
        } else {
            word.to_string()
        };
        if self.normalize_digits {
            word.chars()
                .map(|c| if c.is_ascii_digit() { '0' } else { c })
                .collect()
        } else {
            word
        }
    }
}

/// The three vocabularies built from one training set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vocabularies {
    pub words: Vocabulary,
    pub chars: Vocabulary,
    pub tags: Vocabulary,
}

/// Builds word, character and tag vocabularies from labeled sentences.
#[derive(Debug, Clone, Copy, Default)]
pub struct VocabularyBuilder {
    policy: TextPolicy,
}

impl VocabularyBuilder {
    pub fn new(policy: TextPolicy) -> Self {
        Self { policy }
    }

    /// Scan `sentences` and `labels` in order, assigning ids on first sight.
    ///
    /// Words are normalized with the builder's [`TextPolicy`]; characters
    /// come from the raw word so casing stays visible to char features.
    /// A word spelled `<pad>` or `<unk>` shares the reserved id. A label
    /// spelled that way is rejected with [`SeqTagError::ReservedLabel`],
    /// since reserved tags are never predicted.
    pub fn build<S, L>(&self, sentences: &[S], labels: &[L]) -> Result<Vocabularies>
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

        let mut words = Vocabulary::new();
        let mut chars = Vocabulary::new();
        let mut tags = Vocabulary::new();

        for (sentence, sentence_labels) in sentences.iter().zip(labels) {
            let sentence = sentence.as_ref();
            let sentence_labels = sentence_labels.as_ref();
            if sentence.len() != sentence_labels.len() {
                return Err(SeqTagError::LengthMismatch {
                    what: "tokens vs labels in a sentence",
                    expected: sentence.len(),
                    found: sentence_labels.len(),
                });
            }

            for word in sentence {
                words.insert(&self.policy.normalize(word));
                let mut buf = [0u8; 4];
                for c in word.chars() {
                    chars.insert(c.encode_utf8(&mut buf));
                }
            }
            for label in sentence_labels {
                if label == PAD_TOKEN || label == UNK_TOKEN {
                    return Err(SeqTagError::ReservedLabel {
                        label: label.clone(),
                    });
                }
                tags.insert(label);
            }
        }

        Ok(Vocabularies { words, chars, tags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_reserved_ids() {
        let vocab = Vocabulary::new();
        assert_eq!(vocab.get(PAD_TOKEN), Some(PAD));
        assert_eq!(vocab.get(UNK_TOKEN), Some(UNK));
        assert_eq!(vocab.len(), 2);
        assert!(vocab.is_empty());
    }

    #[test]
    fn test_insertion_order_ids() {
        let mut vocab = Vocabulary::new();
        assert_eq!(vocab.insert("paris"), 2);
        assert_eq!(vocab.insert("john"), 3);
        assert_eq!(vocab.insert("paris"), 2);
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.token(3), Some("john"));
        assert_eq!(vocab.lookup("berlin"), UNK);
    }

    #[test]
    fn test_from_tokens_rejects_bad_lists() {
        assert!(Vocabulary::from_tokens(["<pad>", "<unk>", "a", "a"]).is_err());
        assert!(Vocabulary::from_tokens(["a", "<pad>", "<unk>"]).is_err());
        let vocab = Vocabulary::from_tokens(["<pad>", "<unk>", "a"]).unwrap();
        assert_eq!(vocab.get("a"), Some(2));
    }

    #[test]
    fn test_serde_preserves_ids() {
        let mut vocab = Vocabulary::new();
        for word in ["lives", "in", "paris"] {
            vocab.insert(word);
        }
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["<pad>","<unk>","lives","in","paris"]"#);
        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vocab);
    }

    #[test]
    fn test_text_policy() {
        let policy = TextPolicy::default();
        assert_eq!(policy.normalize("Paris2024"), "paris0000");

        let keep = TextPolicy {
            lowercase: false,
            normalize_digits: false,
        };
        assert_eq!(keep.normalize("Paris2024"), "Paris2024");
    }

    #[test]
    fn test_builder_is_deterministic() {
        let x = vec![sent(&["John", "lives", "in", "Paris"])];
        let y = vec![sent(&["B-PER", "O", "O", "B-LOC"])];
        let builder = VocabularyBuilder::default();

        let a = builder.build(&x, &y).unwrap();
        let b = builder.build(&x, &y).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.words.get("john"), Some(2));
        assert_eq!(a.words.get("paris"), Some(5));
        assert_eq!(a.tags.get("B-PER"), Some(2));
        assert_eq!(a.tags.get("O"), Some(3));
        assert_eq!(a.chars.get("J"), Some(2));
    }

    #[test]
    fn test_builder_length_mismatch() {
        let builder = VocabularyBuilder::default();
        let x = vec![sent(&["a", "b"])];

        let err = builder.build(&x, &Vec::<Vec<String>>::new()).unwrap_err();
        assert!(matches!(err, SeqTagError::LengthMismatch { .. }));

        let err = builder.build(&x, &[sent(&["O"])]).unwrap_err();
        assert!(matches!(err, SeqTagError::LengthMismatch { .. }));
    }

    #[test]
    fn test_reserved_tokens() {
        let builder = VocabularyBuilder::default();

        let err = builder
            .build(&[sent(&["a", "b"])], &[sent(&["O", UNK_TOKEN])])
            .unwrap_err();
        assert!(matches!(err, SeqTagError::ReservedLabel { ref label } if label == UNK_TOKEN));
        let err = builder.build(&[sent(&["a"])], &[sent(&[PAD_TOKEN])]).unwrap_err();
        assert!(matches!(err, SeqTagError::ReservedLabel { .. }));

        let vocabs = builder.build(&[sent(&["<unk>", "a"])], &[sent(&["O", "O"])]).unwrap();
        assert_eq!(vocabs.words.get(UNK_TOKEN), Some(UNK));
        assert_eq!(vocabs.words.get("a"), Some(2));
        assert_eq!(vocabs.words.len(), 3);
    }
}
