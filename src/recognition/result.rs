//! Outward-facing records returned to callers.

use serde::Serialize;
use time::OffsetDateTime;

use super::activation::RecognitionState;
use crate::language::{FormedWord, SpellCheck};
use crate::translate::Translations;
use crate::vision::{BoundingBox, HandLandmarks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Info,
    Warning,
    Success,
}

/// Everything a caller needs to render one processed frame.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionResult {
    pub letter: Option<char>,
    pub confidence: f32,
    pub is_stable: bool,
    pub current_text: String,
    pub current_word: String,
    pub bbox: Option<BoundingBox>,
    pub hand_detected: bool,
    pub hand_count: usize,
    pub both_hands: bool,
    pub hand_landmarks: Vec<HandLandmarks>,
    pub recognition_active: bool,
    pub recognition_state: RecognitionState,
    pub status_messages: Vec<String>,
    pub warning_level: WarningLevel,
    pub word_suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spell_check: Option<SpellCheck>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translations: Option<Translations>,
    /// Mean seconds per processed frame for this session.
    pub avg_processing_time: f64,
}

/// A letter that made it into the word engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub letter: char,
    pub confidence: f32,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub processing_time: f64,
}

/// Text after a manual edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextUpdate {
    pub current_text: String,
    pub current_word: String,
}

/// Full text state of a session.
#[derive(Debug, Clone, Serialize)]
pub struct TextState {
    pub current_text: String,
    pub current_word: String,
    pub formed_words: Vec<FormedWord>,
    pub prediction_history: Vec<PredictionRecord>,
}

/// Diagnostics about the classifier and one session.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_loaded: bool,
    pub model_path: String,
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
    pub num_classes: usize,
    pub classes: Vec<char>,
    pub landmark_detector: &'static str,
    pub max_hands: usize,
    pub activation_letter: char,
    pub recognition_active: bool,
    pub activation_progress: String,
    pub frames_processed: u64,
    pub avg_processing_time: f64,
}
