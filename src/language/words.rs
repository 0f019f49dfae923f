//! Word formation: accumulates accepted letters into words and words into a
//! sentence.

use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::correction::Corrector;
use crate::config::tuning::WordTuning;

/// A finalized word.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormedWord {
    pub corrected_word: String,
    pub original_word: String,
    pub average_confidence: f32,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Spell-check view of the word in progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpellCheck {
    pub current_word: String,
    pub suggestions: Vec<String>,
    pub is_valid_word: bool,
    pub confidence: f32,
    pub auto_correct_suggestion: Option<String>,
    pub word_length: usize,
    pub max_length: usize,
}

pub struct WordFormationEngine {
    tuning: WordTuning,
    corrector: Corrector,
    auto_correct: bool,
    current: String,
    confidences: Vec<f32>, // One per letter of `current`
    last_letter: Option<Instant>,
    suggestions: Vec<String>,
    sentence: Vec<FormedWord>,
}

impl WordFormationEngine {
    pub fn new(tuning: WordTuning, corrector: Corrector, auto_correct: bool) -> Self {
        Self {
            tuning,
            corrector,
            auto_correct,
            current: String::new(),
            confidences: Vec::new(),
            last_letter: None,
            suggestions: Vec::new(),
            sentence: Vec::new(),
        }
    }

    pub fn add_letter(&mut self, letter: char, confidence: f32) {
        self.add_letter_at(letter, confidence, Instant::now());
    }

    /// Append a letter accepted at `now`. A gap longer than the word timeout
    /// finalizes the previous word first. Letters past the length cap are dropped.
    pub fn add_letter_at(&mut self, letter: char, confidence: f32, now: Instant) {
        let timeout = Duration::from_secs_f32(self.tuning.word_timeout_secs);
        if let Some(last) = self.last_letter
            && now.saturating_duration_since(last) > timeout
        {
            debug!("Word timeout after {:.1}s", now.saturating_duration_since(last).as_secs_f32());
            self.finalize();
        }

        if self.current.len() >= self.tuning.max_word_length {
            debug!("Word length cap reached, dropping '{}'", letter);
            return;
        }

        self.current.push(letter.to_ascii_uppercase());
        self.confidences.push(confidence);
        self.last_letter = Some(now);
        self.refresh_suggestions();
    }

    /// Close the current word: correct it and append it to the sentence.
    /// Returns `None` when there was nothing to finalize.
    pub fn finalize(&mut self) -> Option<&FormedWord> {
        if self.current.is_empty() {
            return None;
        }

        let original = std::mem::take(&mut self.current);
        let average_confidence = mean(&self.confidences);
        self.confidences.clear();
        self.suggestions.clear();

        let correction = self.corrector.correct(&original);
        info!("📝 Word formed: {} -> {} ({:?})", original, correction.word, correction.source);

        self.sentence.push(FormedWord {
            corrected_word: correction.word,
            original_word: original,
            average_confidence,
            timestamp: OffsetDateTime::now_utc(),
        });
        self.sentence.last()
    }

    /// Same as [`finalize`](Self::finalize).
    pub fn add_space(&mut self) -> Option<&FormedWord> {
        self.finalize()
    }

    /// Drop the last letter, or the last formed word when no word is in progress.
    pub fn backspace(&mut self) {
        if self.current.pop().is_some() {
            self.confidences.pop();
            self.refresh_suggestions();
        } else if let Some(word) = self.sentence.pop() {
            debug!("Removed word {}", word.corrected_word);
        }
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.confidences.clear();
        self.last_letter = None;
        self.suggestions.clear();
        self.sentence.clear();
    }

    /// Replace the word in progress with a dictionary word the user picked.
    /// Confidences are truncated or padded with their mean to the new length.
    /// Returns false for words outside the dictionary.
    pub fn apply_suggestion(&mut self, word: &str) -> bool {
        let word = word.trim().to_ascii_uppercase();
        if !self.corrector.is_valid(&word) {
            return false;
        }

        let fill = if self.confidences.is_empty() { 0.5 } else { mean(&self.confidences) };
        self.confidences.resize(word.len(), fill);
        self.current = word;
        self.refresh_suggestions();
        true
    }

    pub fn spell_check(&self) -> SpellCheck {
        let is_valid_word = !self.current.is_empty() && self.corrector.is_valid(&self.current);
        let auto_correct_suggestion = if !self.current.is_empty() && !is_valid_word && self.auto_correct {
            Some(self.corrector.correct(&self.current).word).filter(|fixed| *fixed != self.current)
        } else {
            None
        };

        SpellCheck {
            current_word: self.current.clone(),
            suggestions: self.suggestions.clone(),
            is_valid_word,
            confidence: mean(&self.confidences),
            auto_correct_suggestion,
            word_length: self.current.len(),
            max_length: self.tuning.max_word_length,
        }
    }

    pub fn toggle_auto_correct(&mut self) -> bool {
        self.auto_correct = !self.auto_correct;
        self.auto_correct
    }

    pub fn auto_correct(&self) -> bool {
        self.auto_correct
    }

    pub fn set_suggestion_threshold(&mut self, threshold: f32) -> Option<f32> {
        self.corrector.set_suggestion_threshold(threshold)
    }

    pub fn current_word(&self) -> &str {
        &self.current
    }

    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    pub fn formed_words(&self) -> &[FormedWord] {
        &self.sentence
    }

    /// Corrected words joined by spaces.
    pub fn sentence(&self) -> String {
        self.sentence.iter().map(|w| w.corrected_word.as_str()).collect::<Vec<_>>().join(" ")
    }

    /// Letters and confidences held for the word in progress.
    pub fn buffered(&self) -> (usize, usize) {
        (self.current.len(), self.confidences.len())
    }

    fn refresh_suggestions(&mut self) {
        self.suggestions = self.corrector.suggestions(&self.current);
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() { 0.0 } else { values.iter().sum::<f32>() / values.len() as f32 }
}
