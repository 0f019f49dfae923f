//! Tuned constants for every pipeline stage.
//!
//! These values were fitted against one trained checkpoint and one camera
//! setup. They are data, not logic: every field can be overridden from a JSON
//! file (`--tuning`), and a partial file only replaces the fields it names.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// All tunable parameters, grouped by pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    pub localizer: LocalizerTuning,
    pub calibration: Calibration,
    pub stabilizer: StabilizerTuning,
    pub activation: ActivationTuning,
    pub words: WordTuning,
    pub correction: CorrectionTuning,
}

/// Hand bounding-box geometry (pixels unless noted).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerTuning {
    /// Hands with a landmark-extent area below this use `small_pad_ratio`.
    pub small_hand_area: u32,
    pub small_pad_ratio: f32,
    pub pad_ratio: f32,
    /// Absolute padding floor per side.
    pub min_pad: u32,
    /// Hands narrower or shorter than this are padded up to it.
    pub min_hand_size: u32,
    /// Boxes must be strictly larger than this on both axes.
    pub min_box_size: u32,
    /// Extra padding around a two-hand union, capped here.
    pub max_union_pad: u32,
    /// Union padding is `span / union_pad_divisor` before the cap.
    pub union_pad_divisor: u32,
    pub max_hands: usize,
    /// Consecutive hand-less frames before the status escalates to a warning.
    pub no_hand_warning_frames: u32,
}

impl Default for LocalizerTuning {
    fn default() -> Self {
        Self {
            small_hand_area: 5000,
            small_pad_ratio: 0.4,
            pad_ratio: 0.3,
            min_pad: 40,
            min_hand_size: 80,
            min_box_size: 20,
            max_union_pad: 30,
            union_pad_divisor: 10,
            max_hands: 2,
            no_hand_warning_frames: 30,
        }
    }
}

/// Confidence boost applied when the top-1/top-2 margin exceeds `min_margin`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginBoost {
    pub min_margin: f32,
    pub factor: f32,
}

/// Inference-time calibration nudges. Not part of the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Checked in order; the first step whose margin is exceeded applies.
    pub margin_boosts: Vec<MarginBoost>,
    pub digit_factor: f32,
    pub confusable: Vec<char>,
    pub confusable_factor: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            margin_boosts: vec![MarginBoost { min_margin: 0.2, factor: 1.10 }, MarginBoost { min_margin: 0.1, factor: 1.05 }],
            digit_factor: 1.05,
            confusable: vec!['M', 'N', 'S', 'T'],
            confusable_factor: 0.95,
        }
    }
}

impl Calibration {
    /// Adjust the top-1 probability of `label` given the runner-up probability.
    pub fn adjust(&self, label: char, top1: f32, top2: f32) -> f32 {
        let margin = top1 - top2;
        let mut confidence = self
            .margin_boosts
            .iter()
            .find(|step| margin > step.min_margin)
            .map(|step| (top1 * step.factor).min(1.0))
            .unwrap_or(top1);

        if label.is_ascii_digit() {
            confidence = (confidence * self.digit_factor).min(1.0);
        }
        if self.confusable.contains(&label) {
            confidence *= self.confusable_factor;
        }
        confidence
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerTuning {
    pub window_size: usize,
    /// Vote weight is `confidence.powf(confidence_exponent)`.
    pub confidence_exponent: f32,
    /// Aggregated confidence a winner needs before it can be stable.
    pub acceptance_threshold: f32,
    /// Consecutive pushes with the same winner before a letter is accepted.
    pub min_run: usize,
    /// Raw predictions below this never enter the window.
    pub min_frame_confidence: f32,
}

impl Default for StabilizerTuning {
    fn default() -> Self {
        Self { window_size: 7, confidence_exponent: 0.3, acceptance_threshold: 0.5, min_run: 4, min_frame_confidence: 0.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationTuning {
    pub letter: char,
    pub required_count: u32,
    /// Skip the activation ritual entirely.
    pub start_active: bool,
}

impl Default for ActivationTuning {
    fn default() -> Self {
        Self { letter: 'A', required_count: 3, start_active: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WordTuning {
    pub max_word_length: usize,
    /// Idle gap after which the current word is finalized before a new letter.
    pub word_timeout_secs: f32,
    pub history_size: usize,
}

impl Default for WordTuning {
    fn default() -> Self {
        Self { max_word_length: 15, word_timeout_secs: 3.0, history_size: 200 }
    }
}

/// One row of the confusable-character table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub from: char,
    pub to: Vec<char>,
}

/// One digraph rewrite, applied left to right across the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneticRule {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionTuning {
    pub auto_correct: bool,
    pub substitutions: Vec<Substitution>,
    pub phonetic: Vec<PhoneticRule>,
    /// Fuzzy candidates below this score are not considered at all.
    pub suggestion_threshold: f32,
    /// Fuzzy candidates at or above this score replace the word.
    pub auto_correct_threshold: f32,
    /// Minimum plain similarity for fuzzy entries in the suggestion list.
    pub fuzzy_suggestion_threshold: f32,
    pub max_suggestions: usize,
    pub prefix_bonus_two: f32,
    pub prefix_bonus_one: f32,
    /// Subtracted per character of length difference.
    pub length_penalty: f32,
    /// Partial words shorter than this get no prefix completion or suggestions.
    pub min_partial_length: usize,
}

impl Default for CorrectionTuning {
    fn default() -> Self {
        let sub = |from: char, to: &[char]| Substitution { from, to: to.to_vec() };
        let rule = |pattern: &str, replacement: &str| PhoneticRule { pattern: pattern.to_string(), replacement: replacement.to_string() };
        Self {
            auto_correct: true,
            substitutions: vec![
                sub('O', &['0', 'Q']),
                sub('0', &['O', 'Q']),
                sub('I', &['1', 'L']),
                sub('1', &['I', 'L']),
                sub('S', &['5']),
                sub('5', &['S']),
                sub('B', &['8']),
                sub('8', &['B']),
                sub('G', &['6']),
                sub('6', &['G']),
                sub('Z', &['2']),
                sub('2', &['Z']),
            ],
            phonetic: vec![
                rule("PH", "F"),
                rule("GH", "F"),
                rule("CK", "K"),
                rule("QU", "KW"),
                rule("TH", "T"),
                rule("SH", "S"),
                rule("CH", "C"),
                rule("WH", "W"),
            ],
            suggestion_threshold: 0.5,
            auto_correct_threshold: 0.8,
            fuzzy_suggestion_threshold: 0.6,
            max_suggestions: 5,
            prefix_bonus_two: 0.1,
            prefix_bonus_one: 0.05,
            length_penalty: 0.05,
            min_partial_length: 2,
        }
    }
}

impl Tuning {
    /// Load overrides from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read tuning file {}", path.display()))?;
        let tuning: Tuning = serde_json::from_str(&raw).with_context(|| format!("Invalid tuning file {}", path.display()))?;
        tuning.validate()?;
        Ok(tuning)
    }

    /// Reject values that would stall or break a stage.
    pub fn validate(&self) -> Result<()> {
        if self.stabilizer.window_size == 0 {
            anyhow::bail!("stabilizer.window_size must be at least 1");
        }
        if self.stabilizer.min_run == 0 {
            anyhow::bail!("stabilizer.min_run must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.stabilizer.acceptance_threshold) {
            anyhow::bail!("stabilizer.acceptance_threshold must be between 0.0 and 1.0");
        }
        if self.activation.required_count == 0 {
            anyhow::bail!("activation.required_count must be at least 1");
        }
        if self.words.max_word_length == 0 {
            anyhow::bail!("words.max_word_length must be at least 1");
        }
        if self.words.word_timeout_secs <= 0.0 {
            anyhow::bail!("words.word_timeout_secs must be positive");
        }
        if self.localizer.union_pad_divisor == 0 {
            anyhow::bail!("localizer.union_pad_divisor must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_winner_is_boosted() {
        let cal = Calibration::default();
        let adjusted = cal.adjust('B', 0.7, 0.1);
        assert!((adjusted - 0.77).abs() < 1e-5);
    }

    #[test]
    fn test_boost_is_capped_and_confusable_penalized() {
        let cal = Calibration::default();
        assert_eq!(cal.adjust('A', 0.98, 0.01), 1.0);
        let adjusted = cal.adjust('M', 0.5, 0.45);
        assert!((adjusted - 0.475).abs() < 1e-5);
    }

    #[test]
    fn test_digit_boost() {
        let cal = Calibration::default();
        let adjusted = cal.adjust('7', 0.6, 0.55);
        assert!((adjusted - 0.63).abs() < 1e-5);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let tuning: Tuning = serde_json::from_str(r#"{"stabilizer": {"min_run": 6}}"#).unwrap();
        assert_eq!(tuning.stabilizer.min_run, 6);
        assert_eq!(tuning.stabilizer.window_size, 7);
        assert_eq!(tuning.activation.letter, 'A');
        assert_eq!(tuning.correction.substitutions.len(), 12);
        assert!(tuning.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut tuning = Tuning::default();
        tuning.stabilizer.window_size = 0;
        assert!(tuning.validate().is_err());
    }
}
