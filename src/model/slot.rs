//! Lazily loaded, shared classifier.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

use super::classifier::{GestureClassifier, LetterClassifier};
use crate::config::Provider;
use crate::error::{RecognitionError, Result};

enum SlotState {
    Unloaded,
    Ready(Arc<dyn LetterClassifier>),
    Failed(String),
}

/// Holds the classifier behind double-checked locking.
///
/// The first caller to need the model takes the write lock and loads it; every
/// later caller clones the `Arc` under a read lock. A failed load is remembered
/// so frames fail fast until [`ModelSlot::reload`] is called.
pub struct ModelSlot {
    path: PathBuf,
    provider: Provider,
    state: RwLock<SlotState>,
}

impl ModelSlot {
    pub fn new(path: PathBuf, provider: Provider) -> Self {
        Self { path, provider, state: RwLock::new(SlotState::Unloaded) }
    }

    /// A slot that already holds a classifier.
    pub fn with_classifier(classifier: Arc<dyn LetterClassifier>) -> Self {
        Self { path: PathBuf::new(), provider: Provider::Cpu, state: RwLock::new(SlotState::Ready(classifier)) }
    }

    /// Get the classifier, loading it on first use.
    ///
    /// # Errors
    /// Returns [`RecognitionError::ModelNotLoaded`] if loading failed now or earlier.
    pub fn get(&self) -> Result<Arc<dyn LetterClassifier>> {
        match &*self.state.read() {
            SlotState::Ready(classifier) => return Ok(Arc::clone(classifier)),
            SlotState::Failed(_) => return Err(RecognitionError::ModelNotLoaded),
            SlotState::Unloaded => {}
        }

        let mut state = self.state.write();
        match &*state {
            SlotState::Ready(classifier) => return Ok(Arc::clone(classifier)),
            SlotState::Failed(_) => return Err(RecognitionError::ModelNotLoaded),
            SlotState::Unloaded => {}
        }

        match GestureClassifier::load(&self.path, self.provider) {
            Ok(classifier) => {
                let classifier: Arc<dyn LetterClassifier> = Arc::new(classifier);
                *state = SlotState::Ready(Arc::clone(&classifier));
                Ok(classifier)
            }
            Err(e) => {
                error!("❌ Failed to load gesture classifier: {}", e);
                *state = SlotState::Failed(e.to_string());
                Err(RecognitionError::ModelNotLoaded)
            }
        }
    }

    /// Forget any cached classifier or failure and load again.
    pub fn reload(&self) -> Result<()> {
        info!("🔄 Reloading gesture classifier");
        *self.state.write() = SlotState::Unloaded;
        self.get().map(|_| ())
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.read(), SlotState::Ready(_))
    }

    /// Reason the last load attempt failed, if it did.
    pub fn load_error(&self) -> Option<String> {
        match &*self.state.read() {
            SlotState::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn device(&self) -> Option<String> {
        match &*self.state.read() {
            SlotState::Ready(classifier) => Some(classifier.device_name()),
            _ => None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
