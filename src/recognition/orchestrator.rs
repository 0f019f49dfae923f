//! The recognizer context and per-session handles.
//!
//! A [`Recognizer`] is built once at startup and shared by reference. It owns
//! the classifier slot, the landmark detector, the session registry and the
//! optional collaborators (translation, sample storage). Callers address a
//! session through a short-lived [`Session`] handle; frames for one session
//! are serialized by that session's lock, sessions never block each other.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use image::RgbImage;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::result::{ModelInfo, RecognitionResult, TextState, TextUpdate};
use super::session::{SessionRegistry, SessionState};
use crate::config::{AppConfig, Tuning};
use crate::error::{RecognitionError, Result};
use crate::language::{Dictionary, SpellCheck};
use crate::model::{CLASSES, ModelSlot, NUM_CLASSES};
use crate::samples::SampleStore;
use crate::translate::{TranslationCache, Translator};
use crate::vision::frame::validate_frame;
use crate::vision::{HandLandmarks, LandmarkDetector, NoLandmarks, decode_base64_frame};

const TRANSLATION_CACHE_SIZE: usize = 256;

pub struct Recognizer {
    model: ModelSlot,
    detector: Arc<dyn LandmarkDetector>,
    sessions: SessionRegistry,
    translations: Option<TranslationCache>,
    samples: Option<SampleStore>,
}

impl Recognizer {
    pub fn new(model: ModelSlot, tuning: Tuning, dictionary: Dictionary) -> Self {
        Self {
            model,
            detector: Arc::new(NoLandmarks),
            sessions: SessionRegistry::new(tuning, Arc::new(dictionary)),
            translations: None,
            samples: None,
        }
    }

    /// Build the recognizer described by the CLI configuration.
    ///
    /// The checkpoint is loaded eagerly unless `--lazy-model` is set. A load
    /// failure is logged, not returned: the recognizer stays up and reports
    /// itself not ready.
    ///
    /// # Errors
    /// Returns an error if the tuning or dictionary files can't be read.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let tuning = config.load_tuning().context("Failed to load tuning")?;
        let dictionary = match &config.dictionary {
            Some(path) => Dictionary::with_file(path)?,
            None => Dictionary::builtin(),
        };
        info!("📖 Dictionary: {} words", dictionary.len());

        let model = ModelSlot::new(config.checkpoint_path(), config.effective_provider());
        let recognizer = Self::new(model, tuning, dictionary).with_sample_store(SampleStore::new(&config.sample_dir));

        if !config.lazy_model
            && let Err(e) = recognizer.model.get()
        {
            warn!("⚠️ Recognition unavailable: {}", e);
        }
        Ok(recognizer)
    }

    pub fn with_detector(mut self, detector: Arc<dyn LandmarkDetector>) -> Self {
        info!("Hand landmarks from '{}'", detector.name());
        self.detector = detector;
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        info!("Translating sentences via '{}'", translator.name());
        self.translations = Some(TranslationCache::new(translator, TRANSLATION_CACHE_SIZE));
        self
    }

    pub fn with_sample_store(mut self, store: SampleStore) -> Self {
        self.samples = Some(store);
        self
    }

    /// Handle for a session, created on first use.
    pub fn session(&self, id: &str) -> Session<'_> {
        Session { recognizer: self, id: id.to_string(), state: self.sessions.get_or_create(id) }
    }

    /// Forget a session and all of its text.
    pub fn end_session(&self, id: &str) -> bool {
        self.sessions.remove(id)
    }

    pub fn is_ready(&self) -> bool {
        self.model.is_loaded()
    }

    pub fn model(&self) -> &ModelSlot {
        &self.model
    }

    /// Store an (image, label) pair for later training. No session state is touched.
    ///
    /// # Errors
    /// Fails when no sample store is configured, the label isn't a known class,
    /// or the image can't be written.
    pub fn collect_sample(&self, frame: &RgbImage, label: &str) -> Result<PathBuf> {
        let store = self.samples.as_ref().ok_or_else(|| RecognitionError::SampleStore("sample collection is disabled".to_string()))?;
        validate_frame(frame)?;
        store.collect(frame, label)
    }

    pub fn collect_encoded(&self, payload: &str, label: &str) -> Result<PathBuf> {
        let frame = decode_base64_frame(payload)?;
        self.collect_sample(&frame, label)
    }

    pub fn sample_store(&self) -> Option<&SampleStore> {
        self.samples.as_ref()
    }

    fn detect_hands(&self, frame: &RgbImage) -> Vec<HandLandmarks> {
        match self.detector.detect(frame) {
            Ok(hands) => hands,
            Err(e) => {
                warn!("Hand detection failed, classifying whole frame: {}", e);
                Vec::new()
            }
        }
    }
}

/// One session's view of the recognizer.
pub struct Session<'a> {
    recognizer: &'a Recognizer,
    id: String,
    state: Arc<Mutex<SessionState>>,
}

impl Session<'_> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Process one frame end to end.
    ///
    /// `landmarks` are used as-is when the client already ran a hand model;
    /// otherwise the recognizer's detector runs on the frame.
    ///
    /// # Errors
    /// [`RecognitionError::InvalidFrame`] for unusable frames and
    /// [`RecognitionError::ModelNotLoaded`] while the classifier is unavailable.
    /// Everything else degrades into the result.
    pub fn predict_frame(&self, frame: &RgbImage, landmarks: Option<Vec<HandLandmarks>>) -> Result<RecognitionResult> {
        let started = Instant::now();
        validate_frame(frame)?;
        let classifier = self.recognizer.model.get()?;

        let mut result = {
            let mut state = self.state.lock();
            let hands = landmarks.unwrap_or_else(|| self.recognizer.detect_hands(frame));
            state.process(frame, hands, classifier.as_ref(), started)
        };

        if let Some(cache) = &self.recognizer.translations
            && !result.current_text.is_empty()
        {
            result.translations = Some(cache.translate_sentence(&result.current_text));
        }
        Ok(result)
    }

    /// Decode a base64 (or data-URL) frame and process it.
    pub fn predict_encoded(&self, payload: &str, landmarks: Option<Vec<HandLandmarks>>) -> Result<RecognitionResult> {
        let frame = decode_base64_frame(payload)?;
        self.predict_frame(&frame, landmarks)
    }

    pub fn add_space(&self) -> TextUpdate {
        self.state.lock().add_space()
    }

    pub fn backspace(&self) -> TextUpdate {
        self.state.lock().backspace()
    }

    pub fn clear_text(&self) -> TextUpdate {
        self.state.lock().clear_text()
    }

    pub fn force_word_completion(&self) -> TextUpdate {
        self.state.lock().force_word_completion()
    }

    pub fn get_text(&self) -> TextState {
        self.state.lock().text_state()
    }

    pub fn reset_recognition(&self) {
        self.state.lock().reset_recognition();
    }

    pub fn apply_suggestion(&self, word: &str) -> bool {
        self.state.lock().apply_suggestion(word)
    }

    pub fn suggestions(&self) -> Vec<String> {
        self.state.lock().suggestions().to_vec()
    }

    pub fn spell_check(&self) -> SpellCheck {
        self.state.lock().spell_check()
    }

    pub fn toggle_auto_correct(&self) -> bool {
        self.state.lock().toggle_auto_correct()
    }

    /// `None` when the threshold isn't a finite number.
    pub fn set_suggestion_threshold(&self, threshold: f32) -> Option<f32> {
        self.state.lock().set_suggestion_threshold(threshold)
    }

    pub fn get_model_info(&self) -> ModelInfo {
        let model = &self.recognizer.model;
        let state = self.state.lock();
        let activation = state.activation();
        let (count, required) = activation.progress();

        ModelInfo {
            model_loaded: model.is_loaded(),
            model_path: model.path().display().to_string(),
            device: model.device(),
            load_error: model.load_error(),
            num_classes: NUM_CLASSES,
            classes: CLASSES.to_vec(),
            landmark_detector: self.recognizer.detector.name(),
            max_hands: self.recognizer.sessions.tuning().localizer.max_hands,
            activation_letter: activation.letter(),
            recognition_active: activation.is_active(),
            activation_progress: format!("{}/{}", count, required),
            frames_processed: state.frames_processed(),
            avg_processing_time: state.avg_processing_time(),
        }
    }
}
