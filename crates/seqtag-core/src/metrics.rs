//! # Entity-level Metrics
//!
//! Precision, recall and F1 over exact `(type, start, end)` chunk matches,
//! reported per entity type and micro-averaged.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeqTagError};
use crate::tags::get_entities;

/// Scores for one entity type (or the micro average).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of gold chunks.
    pub support: usize,
}

impl Score {
    fn from_counts(true_positives: usize, predicted: usize, gold: usize) -> Self {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(true_positives, predicted);
        let recall = ratio(true_positives, gold);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            precision,
            recall,
            f1,
            support: gold,
        }
    }
}

/// Evaluation report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub per_type: BTreeMap<String, Score>,
    pub micro: Score,
}

impl Metrics {
    /// Score predicted tag sequences against gold ones.
    pub fn compute<G, P>(gold: &[G], predicted: &[P]) -> Result<Self>
    where
        G: AsRef<[String]>,
        P: AsRef<[String]>,
    {
        if gold.len() != predicted.len() {
            return Err(SeqTagError::LengthMismatch {
                what: "gold vs predicted sequences",
                expected: gold.len(),
                found: predicted.len(),
            });
        }

        let mut gold_chunks = HashSet::new();
        let mut pred_chunks = HashSet::new();
        for (sentence, (g, p)) in gold.iter().zip(predicted).enumerate() {
            let (g, p) = (g.as_ref(), p.as_ref());
            if g.len() != p.len() {
                return Err(SeqTagError::LengthMismatch {
                    what: "gold vs predicted tags in a sentence",
                    expected: g.len(),
                    found: p.len(),
                });
            }
            gold_chunks.extend(get_entities(g).into_iter().map(|c| (sentence, c)));
            pred_chunks.extend(get_entities(p).into_iter().map(|c| (sentence, c)));
        }

        // type -> (true positives, predicted, gold)
        let mut counts: BTreeMap<String, (usize, usize, usize)> = BTreeMap::new();
        for (_, chunk) in &gold_chunks {
            counts.entry(chunk.entity_type.clone()).or_default().2 += 1;
        }
        for key in &pred_chunks {
            let entry = counts.entry(key.1.entity_type.clone()).or_default();
            entry.1 += 1;
            if gold_chunks.contains(key) {
                entry.0 += 1;
            }
        }

        let (tp, pred, gold_total) = counts
            .values()
            .fold((0, 0, 0), |acc, c| (acc.0 + c.0, acc.1 + c.1, acc.2 + c.2));

        Ok(Self {
            per_type: counts
                .into_iter()
                .map(|(ty, (tp, pred, gold))| (ty, Score::from_counts(tp, pred, gold)))
                .collect(),
            micro: Score::from_counts(tp, pred, gold_total),
        })
    }

    pub fn f1(&self) -> f64 {
        self.micro.f1
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>12} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        for (ty, score) in &self.per_type {
            writeln!(
                f,
                "{:>12} {:>9.4} {:>9.4} {:>9.4} {:>9}",
                ty, score.precision, score.recall, score.f1, score.support
            )?;
        }
        write!(
            f,
            "{:>12} {:>9.4} {:>9.4} {:>9.4} {:>9}",
            "micro avg", self.micro.precision, self.micro.recall, self.micro.f1, self.micro.support
        )
    }
}
