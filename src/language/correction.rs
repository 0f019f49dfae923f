//! Layered spelling correction for finger-spelled words.
//!
//! Strategies run in order and the first hit wins:
//! exact dictionary entry, confusable-character substitution, phonetic
//! digraph rewrite, fuzzy match above the auto-correct score, shortest prefix
//! completion. A word nothing matches is kept as spelled.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::dictionary::Dictionary;
use super::similarity::ratio;
use crate::config::tuning::CorrectionTuning;

/// Which strategy produced a correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionSource {
    Exact,
    Substitution,
    Phonetic,
    Fuzzy,
    Prefix,
    Verbatim,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    pub word: String,
    pub source: CorrectionSource,
}

#[derive(Debug, Clone)]
pub struct Corrector {
    dictionary: Arc<Dictionary>,
    tuning: CorrectionTuning,
}

impl Corrector {
    pub fn new(dictionary: Arc<Dictionary>, tuning: CorrectionTuning) -> Self {
        Self { dictionary, tuning }
    }

    /// Run the correction strategies on `word` (case-insensitive).
    pub fn correct(&self, word: &str) -> Correction {
        let word = word.to_ascii_uppercase();
        let hit = |word: String, source: CorrectionSource| Correction { word, source };

        if word.is_empty() || self.dictionary.contains(&word) {
            return hit(word, CorrectionSource::Exact);
        }
        if let Some(fixed) = self.substitute(&word) {
            return hit(fixed, CorrectionSource::Substitution);
        }

        let rewritten = self.phonetic(&word);
        if rewritten != word && self.dictionary.contains(&rewritten) {
            return hit(rewritten, CorrectionSource::Phonetic);
        }

        if let Some((best, score)) = self.best_fuzzy(&word)
            && score >= self.tuning.auto_correct_threshold
        {
            debug!("Fuzzy correction {} -> {} ({:.3})", word, best, score);
            return hit(best.to_string(), CorrectionSource::Fuzzy);
        }

        if let Some(completion) = self.prefix_matches(&word).first() {
            return hit(completion.to_string(), CorrectionSource::Prefix);
        }

        hit(word, CorrectionSource::Verbatim)
    }

    /// Try each substitution row in turn, replacing every occurrence of the
    /// confusable character with each alternative.
    fn substitute(&self, word: &str) -> Option<String> {
        self.tuning.substitutions.iter().filter(|row| word.contains(row.from)).find_map(|row| {
            row.to.iter().map(|&to| word.replace(row.from, &to.to_string())).find(|variant| self.dictionary.contains(variant))
        })
    }

    /// Apply every digraph rewrite in table order.
    fn phonetic(&self, word: &str) -> String {
        self.tuning.phonetic.iter().fold(word.to_string(), |acc, rule| acc.replace(&rule.pattern, &rule.replacement))
    }

    /// Similarity ratio adjusted for a shared prefix and length difference.
    pub fn fuzzy_score(&self, word: &str, candidate: &str) -> f32 {
        let t = &self.tuning;
        let mut score = ratio(word, candidate);

        let (w, c) = (word.as_bytes(), candidate.as_bytes());
        if w.len() >= 2 && c.len() >= 2 {
            if w[..2] == c[..2] {
                score += t.prefix_bonus_two;
            } else if w[0] == c[0] {
                score += t.prefix_bonus_one;
            }
        }

        score - word.len().abs_diff(candidate.len()) as f32 * t.length_penalty
    }

    /// Highest-scoring entry at or above the suggestion threshold. Earlier
    /// entries win ties.
    fn best_fuzzy(&self, word: &str) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for candidate in self.dictionary.iter() {
            let score = self.fuzzy_score(word, candidate);
            if score >= self.tuning.suggestion_threshold && best.is_none_or(|(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }
        best
    }

    /// Dictionary entries completing a partial word, shortest first.
    pub fn prefix_matches(&self, word: &str) -> Vec<&str> {
        if word.len() < self.tuning.min_partial_length {
            return Vec::new();
        }
        self.dictionary.with_prefix(word)
    }

    /// Completions first, then close spellings by descending similarity.
    pub fn suggestions(&self, word: &str) -> Vec<String> {
        let word = word.to_ascii_uppercase();
        let max = self.tuning.max_suggestions;

        let mut out: Vec<String> = self.prefix_matches(&word).into_iter().take(max).map(str::to_string).collect();
        if out.len() < max && word.len() >= self.tuning.min_partial_length {
            let mut fuzzy: Vec<(&str, f32)> = self
                .dictionary
                .iter()
                .filter(|c| !c.starts_with(word.as_str()))
                .map(|c| (c, ratio(&word, c)))
                .filter(|(_, sim)| *sim >= self.tuning.fuzzy_suggestion_threshold)
                .collect();
            fuzzy.sort_by(|a, b| b.1.total_cmp(&a.1));
            out.extend(fuzzy.into_iter().take(max - out.len()).map(|(c, _)| c.to_string()));
        }
        out
    }

    pub fn is_valid(&self, word: &str) -> bool {
        self.dictionary.contains(&word.to_ascii_uppercase())
    }

    pub fn suggestion_threshold(&self) -> f32 {
        self.tuning.suggestion_threshold
    }

    /// Clamped to `[0, 1]`. Non-finite values are refused and leave the
    /// threshold unchanged. Returns the threshold now in effect when applied.
    pub fn set_suggestion_threshold(&mut self, threshold: f32) -> Option<f32> {
        if !threshold.is_finite() {
            warn!("Ignoring non-finite suggestion threshold {}", threshold);
            return None;
        }
        self.tuning.suggestion_threshold = threshold.clamp(0.0, 1.0);
        Some(self.tuning.suggestion_threshold)
    }
}
