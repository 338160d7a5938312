//! # Viterbi Decoding for CRF
//!
//! Implements the Viterbi algorithm for finding the most likely tag sequence
//! given emission scores and transition scores. Tags can be excluded from
//! decoding entirely (the reserved `PAD`/`UNK` tag ids never label a token).

use crate::error::{Result, SeqTagError};

/// Viterbi decoder for CRF tag sequences.
#[derive(Debug, Clone)]
pub struct ViterbiDecoder {
    num_tags: usize,
    allowed: Vec<bool>,
}

impl ViterbiDecoder {
    /// Create a new Viterbi decoder.
    ///
    /// # Arguments
    /// * `num_tags` - Number of distinct tags
    pub fn new(num_tags: usize) -> Self {
        Self {
            num_tags,
            allowed: vec![true; num_tags],
        }
    }

    /// Never emit any of `tags`.
    pub fn with_forbidden_tags(mut self, tags: &[usize]) -> Self {
        for &tag in tags {
            if let Some(slot) = self.allowed.get_mut(tag) {
                *slot = false;
            }
        }
        self
    }

    /// Decode the optimal tag sequence.
    ///
    /// # Arguments
    /// * `emission_scores` - Matrix of shape [seq_len, num_tags] with emission scores
    /// * `transition_matrix` - Matrix of shape [num_tags, num_tags]; `[prev][curr]`
    ///
    /// # Returns
    /// The optimal tag sequence as indices.
    pub fn decode(
        &self,
        emission_scores: &[Vec<f32>],
        transition_matrix: &[Vec<f32>],
    ) -> Result<Vec<usize>> {
        let seq_len = emission_scores.len();
        if seq_len == 0 {
            return Ok(Vec::new());
        }

        if let Some(row) = emission_scores.iter().find(|row| row.len() != self.num_tags) {
            return Err(SeqTagError::LengthMismatch {
                what: "emission scores per token vs tag count",
                expected: self.num_tags,
                found: row.len(),
            });
        }
        if transition_matrix.len() != self.num_tags
            || transition_matrix.iter().any(|row| row.len() != self.num_tags)
        {
            return Err(SeqTagError::LengthMismatch {
                what: "transition matrix vs tag count",
                expected: self.num_tags,
                found: transition_matrix.len(),
            });
        }

        // DP table
        let mut dp: Vec<Vec<f32>> = vec![vec![f32::NEG_INFINITY; self.num_tags]; seq_len];
        let mut backptr: Vec<Vec<usize>> = vec![vec![0; self.num_tags]; seq_len];

        // Initialize
        for tag in 0..self.num_tags {
            if self.allowed[tag] {
                dp[0][tag] = emission_scores[0][tag];
            }
        }

        // Forward pass
        for pos in 1..seq_len {
            for curr_tag in 0..self.num_tags {
                if !self.allowed[curr_tag] {
                    continue;
                }

                let mut best_score = f32::NEG_INFINITY;
                let mut best_prev = 0;

                for prev_tag in 0..self.num_tags {
                    if !self.allowed[prev_tag] {
                        continue;
                    }

                    let score = dp[pos - 1][prev_tag]
                        + transition_matrix[prev_tag][curr_tag]
                        + emission_scores[pos][curr_tag];

                    if score > best_score {
                        best_score = score;
                        best_prev = prev_tag;
                    }
                }

                dp[pos][curr_tag] = best_score;
                backptr[pos][curr_tag] = best_prev;
            }
        }

        // Backtrack
        let mut best_final_tag = self.allowed.iter().position(|&a| a).unwrap_or(0);
        let mut best_final_score = f32::NEG_INFINITY;
        for tag in 0..self.num_tags {
            if self.allowed[tag] && dp[seq_len - 1][tag] > best_final_score {
                best_final_score = dp[seq_len - 1][tag];
                best_final_tag = tag;
            }
        }

        let mut path = vec![best_final_tag];
        let mut curr_tag = best_final_tag;

        for pos in (1..seq_len).rev() {
            curr_tag = backptr[pos][curr_tag];
            path.push(curr_tag);
        }

        path.reverse();
        Ok(path)
    }

    /// Per-token argmax over the allowed tags, ignoring transitions.
    pub fn argmax(&self, emission_scores: &[Vec<f32>]) -> Vec<usize> {
        emission_scores
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(tag, _)| self.allowed.get(*tag).copied().unwrap_or(false))
                    .max_by(|(_, a), (_, b)| a.total_cmp(b))
                    .map_or(0, |(tag, _)| tag)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_transitions(num_tags: usize) -> Vec<Vec<f32>> {
        vec![vec![0.0; num_tags]; num_tags]
    }

    #[test]
    fn test_viterbi_follows_emissions_without_transitions() {
        let decoder = ViterbiDecoder::new(3);
        let emissions = vec![vec![0.1, 0.8, 0.1], vec![0.8, 0.1, 0.1], vec![0.0, 0.0, 0.9]];
        let path = decoder.decode(&emissions, &flat_transitions(3)).unwrap();
        assert_eq!(path, vec![1, 0, 2]);
    }

    #[test]
    fn test_viterbi_transitions_override_emissions() {
        let decoder = ViterbiDecoder::new(2);
        // Token 2 slightly prefers tag 1, but 0 -> 1 is heavily penalised.
        let emissions = vec![vec![1.0, 0.0], vec![0.0, 0.1]];
        let transitions = vec![vec![0.0, -5.0], vec![0.0, 0.0]];
        let path = decoder.decode(&emissions, &transitions).unwrap();
        assert_eq!(path, vec![0, 0]);
    }

    #[test]
    fn test_forbidden_tags_never_decoded() {
        let decoder = ViterbiDecoder::new(4).with_forbidden_tags(&[0, 1]);
        let emissions = vec![vec![9.0, 9.0, 0.1, 0.2], vec![9.0, 9.0, 0.3, 0.1]];
        let path = decoder.decode(&emissions, &flat_transitions(4)).unwrap();
        assert_eq!(path, vec![3, 2]);
        assert_eq!(decoder.argmax(&emissions), vec![3, 2]);
    }

    #[test]
    fn test_viterbi_empty() {
        let decoder = ViterbiDecoder::new(3);
        let emissions: Vec<Vec<f32>> = vec![];
        assert!(decoder.decode(&emissions, &flat_transitions(3)).unwrap().is_empty());
    }

    #[test]
    fn test_dimension_errors() {
        let decoder = ViterbiDecoder::new(3);
        assert!(decoder.decode(&[vec![1.0, 2.0]], &flat_transitions(3)).is_err());
        assert!(decoder.decode(&[vec![1.0, 2.0, 3.0]], &flat_transitions(2)).is_err());
    }
}
