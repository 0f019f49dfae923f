//! Per-session pipeline state and the registry that owns it.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;
use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::activation::{ActivationMachine, RecognitionState};
use super::result::{PredictionRecord, RecognitionResult, TextState, TextUpdate, WarningLevel};
use super::stabilizer::Stabilizer;
use crate::config::Tuning;
use crate::config::tuning::Calibration;
use crate::language::{Corrector, Dictionary, SpellCheck, WordFormationEngine};
use crate::model::{LetterClassifier, top_prediction};
use crate::vision::{HandDetection, HandLandmarks, HandLocalizer};

pub const ACTIVATED_MESSAGE: &str = "✅ Recognition activated! Start signing.";

/// Mutable state of one signer: everything a frame can change.
pub struct SessionState {
    localizer: HandLocalizer,
    stabilizer: Stabilizer,
    activation: ActivationMachine,
    words: WordFormationEngine,
    calibration: Calibration,
    min_frame_confidence: f32,
    acceptance_threshold: f32,
    history: VecDeque<PredictionRecord>, // Accepted letters, newest last
    history_size: usize,
    frames: u64,
    total_time: Duration,
}

impl SessionState {
    pub fn new(tuning: &Tuning, dictionary: Arc<Dictionary>) -> Self {
        let corrector = Corrector::new(dictionary, tuning.correction.clone());
        Self {
            localizer: HandLocalizer::new(tuning.localizer.clone()),
            stabilizer: Stabilizer::new(tuning.stabilizer.clone()),
            activation: ActivationMachine::new(tuning.activation.clone()),
            words: WordFormationEngine::new(tuning.words.clone(), corrector, tuning.correction.auto_correct),
            calibration: tuning.calibration.clone(),
            min_frame_confidence: tuning.stabilizer.min_frame_confidence,
            acceptance_threshold: tuning.stabilizer.acceptance_threshold,
            history: VecDeque::new(),
            history_size: tuning.words.history_size,
            frames: 0,
            total_time: Duration::ZERO,
        }
    }

    /// Run one frame through localization, classification, stabilization,
    /// the activation gate and word formation.
    ///
    /// Frames without a usable prediction (inference failed, or calibrated
    /// confidence under the floor) only update metrics and hand bookkeeping.
    pub fn process(&mut self, frame: &RgbImage, hands: Vec<HandLandmarks>, classifier: &dyn LetterClassifier, started: Instant) -> RecognitionResult {
        let detection = self.localizer.locate(frame, hands);
        let input = detection.crop.as_ref().unwrap_or(frame);

        let raw = match classifier.classify(input) {
            Ok(probs) => top_prediction(&probs, &self.calibration),
            Err(e) => {
                warn!("Skipping frame, inference failed: {}", e);
                None
            }
        };

        let was_active = self.activation.is_active();
        let (mut messages, mut level) = self.hand_status(&detection);

        let Some(prediction) = raw.filter(|p| p.confidence >= self.min_frame_confidence) else {
            self.record_frame(started);
            let confidence = raw.map_or(0.0, |p| p.confidence);
            return self.build_result(detection, raw.map(|p| p.label), confidence, false, messages, level, Vec::new());
        };

        if !was_active {
            // Dormant frames only drive the gate. The smoothing window stays untouched.
            if prediction.confidence >= self.acceptance_threshold && self.activation.observe(prediction.label) {
                // The activating gesture is consumed, not spelled.
                self.stabilizer.push(prediction.label, prediction.confidence);
                self.stabilizer.latch();
                messages = vec![ACTIVATED_MESSAGE.to_string()];
                level = WarningLevel::Success;
            } else if self.activation.state() == RecognitionState::Arming {
                let (count, required) = self.activation.progress();
                messages.push(format!("⏳ Activation {}/{}: keep showing '{}'", count, required, self.activation.letter()));
            }

            self.record_frame(started);
            let suggestions = self.words.suggestions().to_vec();
            return self.build_result(detection, Some(prediction.label), prediction.confidence, false, messages, level, suggestions);
        }

        let smoothed = self.stabilizer.push(prediction.label, prediction.confidence);
        if smoothed.accepted
            && let Some(label) = smoothed.label
        {
            self.words.add_letter(label, smoothed.confidence);
            self.push_history(label, smoothed.confidence);
        }

        self.record_frame(started);
        let suggestions = self.words.suggestions().to_vec();
        self.build_result(detection, smoothed.label, smoothed.confidence, smoothed.is_stable, messages, level, suggestions)
    }

    fn hand_status(&self, detection: &HandDetection) -> (Vec<String>, WarningLevel) {
        let active = self.activation.is_active();
        let letter = self.activation.letter();

        let (message, level) = match detection.hand_count {
            0 if self.localizer.should_warn() => ("⚠️ No hands detected. Please show both hands to the camera.".to_string(), WarningLevel::Warning),
            0 => ("👋 Looking for hands...".to_string(), WarningLevel::Info),
            1 if active => ("👋 One hand detected. Some signs may need both hands".to_string(), WarningLevel::Info),
            1 => (format!("🅰️ One hand detected. Show sign '{}' with both hands to start", letter), WarningLevel::Info),
            _ if active => ("🙌 Both hands ready for ISL recognition".to_string(), WarningLevel::Success),
            _ => (format!("🅰️ Both hands detected! Show sign '{}' to start recognition", letter), WarningLevel::Info),
        };
        (vec![message], level)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_result(
        &self,
        detection: HandDetection,
        letter: Option<char>,
        confidence: f32,
        is_stable: bool,
        status_messages: Vec<String>,
        warning_level: WarningLevel,
        word_suggestions: Vec<String>,
    ) -> RecognitionResult {
        RecognitionResult {
            letter,
            confidence: (confidence * 1000.0).round() / 1000.0,
            is_stable,
            current_text: self.words.sentence(),
            current_word: self.words.current_word().to_string(),
            bbox: detection.bbox,
            hand_detected: detection.hands_present,
            hand_count: detection.hand_count,
            both_hands: detection.hand_count >= 2,
            hand_landmarks: detection.landmarks,
            recognition_active: self.activation.is_active(),
            recognition_state: self.activation.state(),
            status_messages,
            warning_level,
            word_suggestions,
            spell_check: Some(self.words.spell_check()),
            translations: None,
            avg_processing_time: self.avg_processing_time(),
        }
    }

    fn record_frame(&mut self, started: Instant) {
        self.frames += 1;
        self.total_time += started.elapsed();
    }

    fn push_history(&mut self, letter: char, confidence: f32) {
        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(PredictionRecord {
            letter,
            confidence,
            timestamp: OffsetDateTime::now_utc(),
            processing_time: self.avg_processing_time(),
        });
    }

    /// Mean seconds per frame, rounded to 0.1 ms.
    pub fn avg_processing_time(&self) -> f64 {
        if self.frames == 0 {
            return 0.0;
        }
        let avg = self.total_time.as_secs_f64() / self.frames as f64;
        (avg * 10_000.0).round() / 10_000.0
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames
    }

    pub fn activation(&self) -> &ActivationMachine {
        &self.activation
    }

    pub fn add_space(&mut self) -> TextUpdate {
        self.words.add_space();
        self.text_update()
    }

    pub fn force_word_completion(&mut self) -> TextUpdate {
        self.words.finalize();
        self.text_update()
    }

    pub fn backspace(&mut self) -> TextUpdate {
        self.words.backspace();
        self.text_update()
    }

    /// Drop all text, the smoothing window and the letter history.
    pub fn clear_text(&mut self) -> TextUpdate {
        self.words.clear();
        self.stabilizer.clear();
        self.history.clear();
        debug!("Session text cleared");
        self.text_update()
    }

    /// Back to dormant. Text is kept.
    pub fn reset_recognition(&mut self) {
        self.activation.reset();
        self.localizer.reset();
        info!("🔄 Recognition reset, show sign '{}' to reactivate", self.activation.letter());
    }

    pub fn apply_suggestion(&mut self, word: &str) -> bool {
        self.words.apply_suggestion(word)
    }

    pub fn spell_check(&self) -> SpellCheck {
        self.words.spell_check()
    }

    pub fn suggestions(&self) -> &[String] {
        self.words.suggestions()
    }

    pub fn toggle_auto_correct(&mut self) -> bool {
        self.words.toggle_auto_correct()
    }

    pub fn set_suggestion_threshold(&mut self, threshold: f32) -> Option<f32> {
        self.words.set_suggestion_threshold(threshold)
    }

    pub fn text_update(&self) -> TextUpdate {
        TextUpdate { current_text: self.words.sentence(), current_word: self.words.current_word().to_string() }
    }

    pub fn text_state(&self) -> TextState {
        TextState {
            current_text: self.words.sentence(),
            current_word: self.words.current_word().to_string(),
            formed_words: self.words.formed_words().to_vec(),
            prediction_history: self.history.iter().cloned().collect(),
        }
    }

    /// True when no text, window entries or history remain.
    pub fn is_cleared(&self) -> bool {
        self.stabilizer.is_empty() && self.words.buffered() == (0, 0) && self.words.formed_words().is_empty() && self.history.is_empty()
    }
}

/// Session states by id. Sessions are created on first use and never share state.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
    tuning: Tuning,
    dictionary: Arc<Dictionary>,
}

impl SessionRegistry {
    pub fn new(tuning: Tuning, dictionary: Arc<Dictionary>) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), tuning, dictionary }
    }

    pub fn get_or_create(&self, id: &str) -> Arc<Mutex<SessionState>> {
        if let Some(state) = self.sessions.read().get(id) {
            return Arc::clone(state);
        }

        let mut sessions = self.sessions.write();
        let state = sessions.entry(id.to_string()).or_insert_with(|| {
            debug!("Creating session '{}'", id);
            Arc::new(Mutex::new(SessionState::new(&self.tuning, Arc::clone(&self.dictionary))))
        });
        Arc::clone(state)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RecognitionError, Result};
    use crate::model::{NUM_CLASSES, class_index};
    use crate::vision::Landmark;

    /// Replays a fixed script of (label, probability) predictions.
    struct Scripted {
        script: Vec<(char, f32)>,
        next: Mutex<usize>,
    }

    impl Scripted {
        fn new(word: &str, probability: f32) -> Self {
            Self { script: word.chars().map(|c| (c, probability)).collect(), next: Mutex::new(0) }
        }
    }

    impl LetterClassifier for Scripted {
        fn classify(&self, _image: &RgbImage) -> Result<Vec<f32>> {
            let mut next = self.next.lock();
            let (label, p) = self.script[*next % self.script.len()];
            *next += 1;

            let idx = class_index(label).ok_or_else(|| RecognitionError::UnknownClass(label.to_string()))?;
            let rest = (1.0 - p) / (NUM_CLASSES - 1) as f32;
            let mut probs = vec![rest; NUM_CLASSES];
            probs[idx] = p;
            Ok(probs)
        }

        fn device_name(&self) -> String {
            "scripted".to_string()
        }
    }

    struct Broken;

    impl LetterClassifier for Broken {
        fn classify(&self, _image: &RgbImage) -> Result<Vec<f32>> {
            Err(RecognitionError::Inference("device lost".to_string()))
        }

        fn device_name(&self) -> String {
            "broken".to_string()
        }
    }

    fn state() -> SessionState {
        SessionState::new(&Tuning::default(), Arc::new(Dictionary::builtin()))
    }

    fn frame() -> RgbImage {
        RgbImage::new(640, 480)
    }

    fn one_hand() -> Vec<HandLandmarks> {
        vec![vec![Landmark::new(0.4, 0.4, 0.0), Landmark::new(0.6, 0.6, 0.0)]]
    }

    /// Process `frames` frames with one hand in view.
    fn run(state: &mut SessionState, classifier: &dyn LetterClassifier, frames: usize) -> Vec<RecognitionResult> {
        (0..frames).map(|_| state.process(&frame(), one_hand(), classifier, Instant::now())).collect()
    }

    #[test]
    fn test_activation_gesture_is_not_spelled() {
        let mut s = state();
        let results = run(&mut s, &Scripted::new("A", 0.9), 8);

        assert!(!results[1].recognition_active);
        assert_eq!(results[1].recognition_state, RecognitionState::Arming);
        assert!(results[2].recognition_active);
        assert_eq!(results[2].status_messages, vec![ACTIVATED_MESSAGE.to_string()]);
        assert_eq!(results[2].warning_level, WarningLevel::Success);
        assert_eq!(s.text_update().current_word, "");
    }

    #[test]
    fn test_letters_flow_after_activation() {
        let mut s = state();
        run(&mut s, &Scripted::new("A", 0.9), 3);
        assert!(s.activation().is_active());

        for letter in ["H", "I"] {
            run(&mut s, &Scripted::new(letter, 0.9), 8);
        }
        assert_eq!(s.text_update().current_word, "HI");
        assert_eq!(s.text_state().prediction_history.len(), 2);

        let update = s.add_space();
        assert_eq!(update.current_text, "HI");
        assert_eq!(update.current_word, "");
    }

    #[test]
    fn test_dormant_session_ignores_letters() {
        let mut s = state();
        let results = run(&mut s, &Scripted::new("B", 0.9), 10);
        assert!(results.iter().all(|r| !r.is_stable && r.current_word.is_empty()));
        assert_eq!(results[9].letter, Some('B'));
        assert_eq!(s.activation().progress(), (0, 3));
        assert!(s.stabilizer.is_empty());
    }

    #[test]
    fn test_other_letter_interrupts_arming() {
        let mut s = state();
        run(&mut s, &Scripted::new("A", 0.9), 2);
        assert_eq!(s.activation().state(), RecognitionState::Arming);

        let result = s.process(&frame(), one_hand(), &Scripted::new("B", 0.9), Instant::now());
        assert_eq!(result.recognition_state, RecognitionState::Dormant);
        assert_eq!(s.activation().progress(), (0, 3));
        assert!(s.stabilizer.is_empty());

        // A fresh streak of the full length is needed again
        let results = run(&mut s, &Scripted::new("A", 0.9), 3);
        assert!(!results[1].recognition_active);
        assert!(results[2].recognition_active);
    }

    #[test]
    fn test_idle_signing_does_not_delay_activation() {
        let mut s = state();
        run(&mut s, &Scripted::new("B", 0.9), 7);
        let results = run(&mut s, &Scripted::new("A", 0.9), 3);
        assert_eq!(results.iter().filter(|r| r.recognition_active).count(), 1);
        assert!(results[2].recognition_active);
    }

    #[test]
    fn test_low_confidence_frame_is_diagnostic_only() {
        let mut s = state();
        // calibrated 0.1 is under the 0.2 floor
        let results = run(&mut s, &Scripted::new("K", 0.1), 3);
        assert_eq!(results[0].letter, Some('K'));
        assert!(!results[0].is_stable);
        assert!(results[0].word_suggestions.is_empty());
        assert_eq!(s.frames_processed(), 3);
        assert!(s.stabilizer.is_empty());
    }

    #[test]
    fn test_inference_failure_is_tolerated() {
        let mut s = state();
        let result = s.process(&frame(), Vec::new(), &Broken, Instant::now());
        assert_eq!(result.letter, None);
        assert_eq!(result.confidence, 0.0);
        assert!(!result.hand_detected);
        assert_eq!(result.status_messages, vec!["👋 Looking for hands...".to_string()]);
    }

    #[test]
    fn test_no_hand_warning_escalates() {
        let mut s = state();
        let mut last = None;
        for _ in 0..31 {
            last = Some(s.process(&frame(), Vec::new(), &Broken, Instant::now()));
        }
        let last = last.unwrap();
        assert_eq!(last.warning_level, WarningLevel::Warning);
        assert!(last.status_messages[0].starts_with("⚠️"));
    }

    #[test]
    fn test_clear_text_empties_buffers() {
        let mut s = state();
        run(&mut s, &Scripted::new("A", 0.9), 3);
        run(&mut s, &Scripted::new("G", 0.9), 8);
        s.force_word_completion();
        run(&mut s, &Scripted::new("O", 0.9), 8);
        assert!(!s.is_cleared());

        let update = s.clear_text();
        assert_eq!(update, TextUpdate { current_text: String::new(), current_word: String::new() });
        assert!(s.is_cleared());
        assert!(s.text_state().formed_words.is_empty());
        assert!(s.activation().is_active());
    }

    #[test]
    fn test_reset_recognition_keeps_text() {
        let mut s = state();
        run(&mut s, &Scripted::new("A", 0.9), 3);
        run(&mut s, &Scripted::new("G", 0.9), 8);
        s.reset_recognition();
        assert_eq!(s.activation().state(), RecognitionState::Dormant);
        assert_eq!(s.text_update().current_word, "G");
    }

    #[test]
    fn test_registry_isolates_sessions() {
        let registry = SessionRegistry::new(Tuning::default(), Arc::new(Dictionary::builtin()));
        let a = registry.get_or_create("a");
        let again = registry.get_or_create("a");
        let b = registry.get_or_create("b");
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));

        run(&mut a.lock(), &Scripted::new("A", 0.9), 3);
        assert!(a.lock().activation().is_active());
        assert!(!b.lock().activation().is_active());

        assert!(registry.remove("a"));
        assert_eq!(registry.len(), 1);
    }
}
